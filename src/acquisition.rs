//! ==============================================================================
//! acquisition.rs - per-view acquisition loop (live / simulated)
//! ==============================================================================
//!
//! purpose:
//!     owns one view's mode switch, polling cadence and reading history.
//!     one AcquisitionLoop per view; nothing here is shared across views.
//!
//! state machine:
//!
//!     ┌──────────────┐   set_mode(Simulated)   ┌──────────────┐
//!     │     Live     │ ──────────────────────▶ │  Simulated   │
//!     │ fetch every  │ ◀────────────────────── │ synth every  │
//!     │ live_interval│     set_mode(Live)      │ sim_interval │
//!     └──────────────┘                         └──────────────┘
//!
//!     every transition clears the history, aborts the running task and
//!     bumps the generation counter before the next task is spawned.
//!
//! cancellation:
//!     - the task handle is aborted on every mode change, on stop() and
//!       when the loop is dropped.
//!     - a fetch that completes after its generation was superseded is
//!       discarded without touching state.
//!
//! relationships:
//!     - uses: source.rs (SourceAdapter), simulate.rs, store.rs
//!     - used by: server.rs (status, snapshots, mode switches), main.rs
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{Mode, Reading, Variant};
use crate::normalize::now_ms;
use crate::simulate;
use crate::source::{DataSource, FetchOutcome, SourceAdapter};
use crate::store::{ReadingStore, DEFAULT_CAP};

/// how a successful live fetch lands in the history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// the fetched rows are the whole data set (spreadsheets)
    Replace,
    /// the fetch returns the newest row only; append it (managed table)
    AppendLatest,
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub live_interval: Duration,
    pub simulated_interval: Duration,
    pub history_cap: usize,
    pub refresh: RefreshPolicy,
    /// log every acquired reading
    pub show_sensor_data: bool,
}

impl LoopSettings {
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            live_interval: Duration::from_secs(5),
            simulated_interval: simulate::default_interval(variant),
            history_cap: DEFAULT_CAP,
            refresh: match variant {
                Variant::General => RefreshPolicy::AppendLatest,
                _ => RefreshPolicy::Replace,
            },
            show_sensor_data: false,
        }
    }
}

// ==============================================================================
// view state
// ==============================================================================

#[derive(Debug)]
pub struct ViewState {
    pub mode: Mode,
    pub store: ReadingStore,
    pub connected: bool,
    /// a fetch is in flight
    pub loading: bool,
    /// true from entering live until the first successful fetch
    pub initial_load: bool,
    /// reload trigger, bumped once per live poll
    pub reload_trigger: u64,
    pub last_error: Option<String>,
    /// unix ms of the last applied change
    pub last_update_ms: u64,
}

impl ViewState {
    fn new(mode: Mode, cap: usize) -> Self {
        Self {
            mode,
            store: ReadingStore::new(cap),
            connected: true,
            loading: false,
            initial_load: false,
            reload_trigger: 0,
            last_error: None,
            last_update_ms: 0,
        }
    }

    /// reset for a fresh mode; sources are never merged
    fn enter(&mut self, mode: Mode) {
        self.mode = mode;
        self.store.clear();
        self.last_error = None;
        self.connected = true;
        match mode {
            Mode::Live => {
                self.initial_load = true;
                self.loading = true;
            }
            Mode::Simulated => {
                self.initial_load = false;
                self.loading = false;
            }
        }
    }

    fn apply(&mut self, outcome: FetchOutcome, policy: RefreshPolicy) {
        self.loading = false;
        if !outcome.connected {
            // keep whatever we had; the next tick retries
            self.connected = false;
            self.last_error = outcome.error;
            return;
        }

        self.connected = true;
        self.initial_load = false;
        self.last_error = None;
        self.last_update_ms = now_ms();
        match policy {
            RefreshPolicy::Replace => self.store.replace(outcome.readings),
            RefreshPolicy::AppendLatest => {
                // limit=1 desc: the first row is the newest
                if let Some(latest) = outcome.readings.into_iter().next() {
                    let duplicate = self
                        .store
                        .latest()
                        .is_some_and(|r| r.timestamp == latest.timestamp);
                    if !duplicate {
                        self.store.push(latest);
                    }
                }
            }
        }
    }
}

/// serializable view summary for the api
#[derive(Clone, Debug, Serialize)]
pub struct ViewStatus {
    pub name: String,
    pub variant: Variant,
    pub mode: Mode,
    pub source: String,
    pub connected: bool,
    pub loading: bool,
    pub initial_load: bool,
    pub reload_trigger: u64,
    pub readings: usize,
    pub history_cap: usize,
    pub latest: Option<Reading>,
    pub last_error: Option<String>,
    pub last_update_ms: u64,
}

// ==============================================================================
// shared loop context
// ==============================================================================

struct Shared<S> {
    name: String,
    variant: Variant,
    settings: LoopSettings,
    adapter: SourceAdapter<S>,
    state: RwLock<ViewState>,
    generation: AtomicU64,
}

impl<S: DataSource> Shared<S> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// one live poll: bump the trigger, fetch, apply if still relevant
    async fn refresh(&self, generation: u64) {
        let trigger = {
            let mut st = self.state.write().await;
            if !self.is_current(generation) {
                return;
            }
            st.reload_trigger += 1;
            st.loading = true;
            st.reload_trigger
        };

        let outcome = self.adapter.load(trigger).await;

        let mut st = self.state.write().await;
        if !self.is_current(generation) {
            debug!(view = %self.name, trigger = outcome.trigger, "discarding stale fetch");
            return;
        }
        let fetched = outcome.readings.len();
        let connected = outcome.connected;
        st.apply(outcome, self.settings.refresh);
        if connected && self.settings.show_sensor_data {
            if let Some(latest) = st.store.latest() {
                info!(view = %self.name, trigger, fetched, latest = ?latest, "live data");
            }
        }
    }

    /// one simulated tick
    async fn synthesize(&self, generation: u64) {
        let reading = simulate::synthesize(self.variant, &mut rand::thread_rng(), Utc::now());
        let mut st = self.state.write().await;
        if !self.is_current(generation) {
            return;
        }
        if self.settings.show_sensor_data {
            info!(view = %self.name, reading = ?reading, "simulated reading");
        }
        st.store.push(reading);
        st.last_update_ms = now_ms();
    }

    async fn run(self: Arc<Self>, generation: u64, mode: Mode) {
        match mode {
            Mode::Live => {
                let period = self.settings.live_interval.max(Duration::from_millis(1));
                // first tick fires immediately
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !self.is_current(generation) {
                        break;
                    }
                    self.refresh(generation).await;
                }
            }
            Mode::Simulated => {
                let period = self.settings.simulated_interval.max(Duration::from_millis(1));
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !self.is_current(generation) {
                        break;
                    }
                    self.synthesize(generation).await;
                }
            }
        }
    }
}

// ==============================================================================
// acquisition loop - public handle
// ==============================================================================

pub struct AcquisitionLoop<S> {
    shared: Arc<Shared<S>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DataSource> AcquisitionLoop<S> {
    /// build an idle loop; nothing runs until `start`
    pub fn new(name: impl Into<String>, variant: Variant, adapter: SourceAdapter<S>, settings: LoopSettings) -> Self {
        let state = ViewState::new(Mode::Simulated, settings.history_cap);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                variant,
                settings,
                adapter,
                state: RwLock::new(state),
                generation: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn variant(&self) -> Variant {
        self.shared.variant
    }

    pub async fn start(&self, mode: Mode) {
        self.set_mode(mode).await;
    }

    /// switch modes: stop the running task, reset state, spawn the new one
    pub async fn set_mode(&self, mode: Mode) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shared.state.write().await.enter(mode);
        info!(
            view = %self.shared.name,
            variant = %self.shared.variant,
            %mode,
            generation,
            "acquisition mode set"
        );

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(shared.run(generation, mode)));
    }

    /// stop acquiring; history is left as it was
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            // an aborted fetch never reports back
            self.shared.state.write().await.loading = false;
            info!(view = %self.shared.name, "acquisition stopped");
        }
    }

    pub async fn mode(&self) -> Mode {
        self.shared.state.read().await.mode
    }

    pub async fn status(&self) -> ViewStatus {
        let st = self.shared.state.read().await;
        ViewStatus {
            name: self.shared.name.clone(),
            variant: self.shared.variant,
            mode: st.mode,
            source: self.shared.adapter.describe(),
            connected: st.connected,
            loading: st.loading,
            initial_load: st.initial_load,
            reload_trigger: st.reload_trigger,
            readings: st.store.len(),
            history_cap: st.store.cap(),
            latest: st.store.latest().cloned(),
            last_error: st.last_error.clone(),
            last_update_ms: st.last_update_ms,
        }
    }

    /// owned copy of the whole history, oldest first
    pub async fn snapshot(&self) -> Vec<Reading> {
        self.shared.state.read().await.store.snapshot()
    }

    /// the most recent `n` readings, oldest first
    pub async fn recent(&self, n: usize) -> Vec<Reading> {
        self.shared.state.read().await.store.recent(n)
    }
}

impl<S> Drop for AcquisitionLoop<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
            warn!(view = %self.shared.name, "acquisition loop dropped while running");
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReadingSource, ReadingStatus};
    use crate::source::testing::{sheet, ScriptedSource};
    use crate::source::{ColumnMap, RowSet};

    const HYDRO: &[&str] = &["Timestamp (UTC)", "Waktu (WIB)", "Suhu", "FlowL/M", "pH"];

    fn hydro_rows(n: usize) -> RowSet {
        let times: Vec<String> = (0..n).map(|i| format!("08:{:02}:00", i)).collect();
        let rows: Vec<Vec<&str>> = times
            .iter()
            .map(|t| vec!["2024-01-25", t.as_str(), "24,5", "1.5", "6.8"])
            .collect();
        let refs: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        sheet(HYDRO, &refs)
    }

    fn settings(cap: usize) -> LoopSettings {
        LoopSettings {
            live_interval: Duration::from_secs(5),
            simulated_interval: Duration::from_secs(2),
            history_cap: cap,
            refresh: RefreshPolicy::Replace,
            show_sensor_data: false,
        }
    }

    fn hydro_loop(source: ScriptedSource, cap: usize) -> AcquisitionLoop<ScriptedSource> {
        let adapter = SourceAdapter::new(source, Variant::Hydroponic, ColumnMap::default_for(Variant::Hydroponic)).unwrap();
        AcquisitionLoop::new("hidroponik", Variant::Hydroponic, adapter, settings(cap))
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_mode_appends_and_caps() {
        let view = hydro_loop(ScriptedSource::default(), 5);
        view.start(Mode::Simulated).await;

        advance(2.5).await;
        assert_eq!(view.snapshot().await.len(), 1);

        advance(20.0).await;
        let history = view.snapshot().await;
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|r| r.source == ReadingSource::Simulated && r.status == ReadingStatus::Dummy));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_modes_never_merges_sources() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(2))]);
        let view = hydro_loop(source, 50);
        view.start(Mode::Simulated).await;
        advance(7.0).await;
        assert_eq!(view.snapshot().await.len(), 3);

        view.set_mode(Mode::Live).await;
        let status = view.status().await;
        assert_eq!(status.readings, 0, "simulated readings cleared on entering live");
        assert!(status.initial_load);

        advance(0.5).await;
        let history = view.snapshot().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.source == ReadingSource::Live));
        assert!(!view.status().await.initial_load);

        view.set_mode(Mode::Simulated).await;
        assert!(view.snapshot().await.is_empty(), "nothing resurrected");
        advance(2.5).await;
        let history = view.snapshot().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source, ReadingSource::Simulated);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_previous_data() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(3)), Err("sheet unreachable".into())]);
        let view = hydro_loop(source, 50);
        view.start(Mode::Live).await;

        advance(1.0).await;
        let before = view.snapshot().await;
        assert_eq!(before.len(), 3);
        assert!(view.status().await.connected);

        advance(5.0).await;
        let status = view.status().await;
        assert_eq!(status.reload_trigger, 2);
        assert!(!status.connected);
        assert!(status.last_error.unwrap().contains("sheet unreachable"));
        assert_eq!(view.snapshot().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_fetch_keeps_initial_load() {
        let source = ScriptedSource::new(vec![Err("sheet unreachable".into()), Ok(hydro_rows(2))]);
        let view = hydro_loop(source, 50);
        view.start(Mode::Live).await;

        advance(1.0).await;
        let status = view.status().await;
        assert!(status.initial_load);
        assert!(!status.loading);
        assert!(!status.connected);

        advance(5.0).await;
        let status = view.status().await;
        assert!(!status.initial_load);
        assert_eq!(status.readings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_fetch_clears_loading() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(2))]).with_delay(Duration::from_secs(3));
        let view = hydro_loop(source, 50);
        view.start(Mode::Live).await;
        advance(1.0).await;
        assert!(view.status().await.loading);

        view.stop().await;
        assert!(!view.status().await.loading);
        advance(5.0).await;
        let status = view.status().await;
        assert!(!status.loading);
        assert_eq!(status.readings, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_polls_on_the_interval() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(1)), Ok(hydro_rows(4))]);
        let calls = source.clone();
        let view = hydro_loop(source, 50);
        view.start(Mode::Live).await;

        advance(0.1).await;
        assert_eq!(calls.calls(), 1);
        advance(5.0).await;
        assert_eq!(calls.calls(), 2);
        // sheet replaces history wholesale
        assert_eq!(view.snapshot().await.len(), 4);
        advance(10.0).await;
        assert_eq!(calls.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fetch_is_discarded() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(2))]).with_delay(Duration::from_secs(3));
        let view = hydro_loop(source, 50);
        view.start(Mode::Simulated).await;
        let generation = view.shared.generation.load(Ordering::SeqCst);

        // a fetch started under the current generation...
        let shared = Arc::clone(&view.shared);
        let inflight = tokio::spawn(async move { shared.refresh(generation).await });
        advance(1.0).await;
        // ...is superseded by a mode change before it resolves
        view.set_mode(Mode::Simulated).await;
        inflight.await.unwrap();

        let history = view.snapshot().await;
        assert!(history.iter().all(|r| r.source == ReadingSource::Simulated));
        assert_eq!(view.status().await.reload_trigger, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_during_inflight_fetch_drops_it() {
        let source = ScriptedSource::new(vec![Ok(hydro_rows(2))]).with_delay(Duration::from_secs(3));
        let view = hydro_loop(source, 50);
        view.start(Mode::Live).await;
        advance(1.0).await;
        assert!(view.status().await.loading);

        view.set_mode(Mode::Simulated).await;
        advance(4.5).await;
        let history = view.snapshot().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.source == ReadingSource::Simulated));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_drop_end_the_task() {
        let view = hydro_loop(ScriptedSource::default(), 50);
        view.start(Mode::Simulated).await;
        advance(4.5).await;
        view.stop().await;
        let len = view.snapshot().await.len();
        advance(10.0).await;
        assert_eq!(view.snapshot().await.len(), len);

        view.start(Mode::Simulated).await;
        let weak = Arc::downgrade(&view.shared);
        drop(view);
        advance(0.1).await;
        assert!(weak.upgrade().is_none(), "task released the shared state");
    }

    #[tokio::test(start_paused = true)]
    async fn managed_table_appends_only_new_rows() {
        let row = |ts: &str, t: &str| sheet(&["created_at", "temperature", "humidity"], &[&[ts, t, "60"]]);
        let source = ScriptedSource::new(vec![
            Ok(row("2024-01-25T14:30:00Z", "25")),
            Ok(row("2024-01-25T14:30:00Z", "25")),
            Ok(row("2024-01-25T14:30:05Z", "26.5")),
        ]);
        let adapter = SourceAdapter::new(source, Variant::General, ColumnMap::default_for(Variant::General)).unwrap();
        let mut s = settings(50);
        s.refresh = RefreshPolicy::AppendLatest;
        let view = AcquisitionLoop::new("monitoring", Variant::General, adapter, s);
        view.start(Mode::Live).await;

        advance(11.0).await;
        let history = view.snapshot().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].temperature, Some(26.5));
        assert_eq!(view.status().await.reload_trigger, 3);
    }
}
