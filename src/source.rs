//! ==============================================================================
//! source.rs - data source adapter (spreadsheets, managed tables)
//! ==============================================================================
//!
//! purpose:
//!     fetches the full current row set from a remote tabular source and
//!     maps its headers onto canonical Reading fields.
//!
//! design:
//!     - `DataSource` is the seam: the acquisition loop only sees rows.
//!     - `ColumnMap` is an explicit header table per variant. it is checked
//!       when the adapter is built and against every fetched header row.
//!     - `SourceAdapter::load` never returns an error. failures come back
//!       as `connected = false` plus a message; the caller keeps its data.
//!
//! relationships:
//!     - used by: acquisition.rs (live polling)
//!     - uses: normalize.rs (cell parsing), reqwest, csv
//!
//! ==============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Metric, Reading, ReadingSource, ReadingStatus, Variant};
use crate::normalize::{parse_number, reconstruct_timestamp};

/// one source row: header -> raw cell text
pub type RawRow = BTreeMap<String, String>;

/// rows plus the header row they were read under
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status { status: u16, url: String },
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("source not configured: {0}")]
    NotConfigured(String),
    #[error("missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColumnMapError {
    #[error("column for `{0}` is blank")]
    BlankHeader(String),
    #[error("header `{0}` is mapped more than once")]
    DuplicateHeader(String),
    #[error("unknown field `{0}` in column overrides")]
    UnknownField(String),
    #[error("field `{field}` is not carried by the {variant} variant")]
    FieldNotInVariant { field: String, variant: Variant },
}

/// a remote tabular source
pub trait DataSource: Send + Sync + 'static {
    /// short human label for logs
    fn describe(&self) -> String;

    /// fetch the full current row set
    fn fetch(&self) -> impl Future<Output = Result<RowSet, SourceError>> + Send;
}

// ==============================================================================
// column map
// ==============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMap {
    /// date (or full timestamp) column
    pub date: String,
    /// separate time-of-day column, if the sheet splits them
    pub time: Option<String>,
    /// device id column; a blank cell marks the row disconnected
    pub status: Option<String>,
    pub metrics: Vec<(Metric, String)>,
}

impl ColumnMap {
    /// the headers the existing sheets and tables actually use
    pub fn default_for(variant: Variant) -> Self {
        let metrics = |pairs: &[(Metric, &str)]| -> Vec<(Metric, String)> {
            pairs.iter().map(|(m, h)| (*m, h.to_string())).collect()
        };
        match variant {
            Variant::General => Self {
                date: "created_at".into(),
                time: None,
                status: None,
                metrics: metrics(&[(Metric::Temperature, "temperature"), (Metric::Humidity, "humidity")]),
            },
            Variant::DripIrrigation => Self {
                date: "Timestamp".into(),
                time: Some("Waktu".into()),
                status: Some("ESP_ID".into()),
                metrics: metrics(&[
                    (Metric::Temperature, "Suhu Tanah"),
                    (Metric::AirTemperature, "Suhu Udara"),
                    (Metric::Humidity, "Kelembaban Udara"),
                    (Metric::SoilMoisture, "Kelembapan Tanah"),
                    (Metric::Ph, "pH"),
                    (Metric::FlowRate, "Flow Rate"),
                ]),
            },
            Variant::Hydroponic => Self {
                date: "Timestamp (UTC)".into(),
                time: Some("Waktu (WIB)".into()),
                status: None,
                metrics: metrics(&[
                    (Metric::Temperature, "Suhu"),
                    (Metric::FlowRate, "FlowL/M"),
                    (Metric::Ph, "pH"),
                ]),
            },
        }
    }

    /// apply per-view header overrides keyed by canonical field name
    /// (`timestamp`, `time`, `status` or a metric key)
    pub fn with_overrides(
        mut self,
        variant: Variant,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, ColumnMapError> {
        for (field, header) in overrides {
            match field.as_str() {
                "timestamp" | "date" => self.date = header.clone(),
                "time" => self.time = Some(header.clone()),
                "status" => self.status = Some(header.clone()),
                other => {
                    let metric = variant
                        .metrics()
                        .iter()
                        .find(|m| m.key() == other)
                        .copied();
                    let Some(metric) = metric else {
                        if ALL_METRIC_KEYS.contains(&other) {
                            return Err(ColumnMapError::FieldNotInVariant {
                                field: other.to_string(),
                                variant,
                            });
                        }
                        return Err(ColumnMapError::UnknownField(other.to_string()));
                    };
                    if let Some(slot) = self.metrics.iter_mut().find(|(m, _)| *m == metric) {
                        slot.1 = header.clone();
                    }
                }
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ColumnMapError> {
        let mut seen = BTreeSet::new();
        for (field, header) in self.fields() {
            if header.trim().is_empty() {
                return Err(ColumnMapError::BlankHeader(field.to_string()));
            }
            if !seen.insert(header) {
                return Err(ColumnMapError::DuplicateHeader(header.to_string()));
            }
        }
        Ok(())
    }

    /// every mapped header, in a stable order
    pub fn headers(&self) -> Vec<&str> {
        self.fields().map(|(_, h)| h).collect()
    }

    /// mapped headers absent from a fetched header row
    pub fn missing_from(&self, headers: &[String]) -> Vec<String> {
        self.headers()
            .into_iter()
            .filter(|h| !headers.iter().any(|have| have.trim() == *h))
            .map(str::to_string)
            .collect()
    }

    fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        std::iter::once(("timestamp", self.date.as_str()))
            .chain(self.time.as_deref().map(|h| ("time", h)))
            .chain(self.status.as_deref().map(|h| ("status", h)))
            .chain(self.metrics.iter().map(|(m, h)| (m.key(), h.as_str())))
    }

    /// map one raw row, `None` when the row carries no time information
    /// on a sheet that requires it
    pub fn map_row(&self, variant: Variant, row: &RawRow) -> Option<Reading> {
        let date = cell(row, &self.date);
        let time = self.time.as_deref().and_then(|h| cell(row, h));
        if variant == Variant::DripIrrigation && date.is_none() && time.is_none() {
            return None;
        }

        let ts = reconstruct_timestamp(date, time, Utc::now());
        let status = match self.status.as_deref() {
            Some(header) if cell(row, header).is_some() => ReadingStatus::Connected,
            Some(_) => ReadingStatus::Disconnected,
            None => ReadingStatus::Connected,
        };

        let mut reading = Reading::new(ts.value, status, ReadingSource::Live);
        reading.timestamp_fabricated = ts.fabricated;
        for (metric, header) in &self.metrics {
            reading.set_metric(*metric, row.get(header).map(|c| parse_number(c)).unwrap_or(0.0));
        }
        Some(reading)
    }
}

/// a non-blank cell
fn cell<'a>(row: &'a RawRow, header: &str) -> Option<&'a str> {
    row.get(header).map(String::as_str).filter(|c| !c.trim().is_empty())
}

const ALL_METRIC_KEYS: &[&str] = &["temperature", "air_temperature", "humidity", "soil_moisture", "ph", "flow_rate"];

// ==============================================================================
// adapter
// ==============================================================================

/// result of one reload trigger
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOutcome {
    pub trigger: u64,
    pub readings: Vec<Reading>,
    pub connected: bool,
    pub error: Option<String>,
}

pub struct SourceAdapter<S> {
    source: S,
    variant: Variant,
    columns: ColumnMap,
}

impl<S: DataSource> SourceAdapter<S> {
    pub fn new(source: S, variant: Variant, columns: ColumnMap) -> Result<Self, ColumnMapError> {
        columns.validate()?;
        Ok(Self { source, variant, columns })
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// fetch and map the current row set for `trigger`
    pub async fn load(&self, trigger: u64) -> FetchOutcome {
        match self.fetch_readings().await {
            Ok(readings) => {
                debug!(source = %self.source.describe(), trigger, rows = readings.len(), "fetch ok");
                FetchOutcome { trigger, readings, connected: true, error: None }
            }
            Err(e) => {
                warn!(source = %self.source.describe(), trigger, error = %e, "fetch failed");
                FetchOutcome { trigger, readings: Vec::new(), connected: false, error: Some(e.to_string()) }
            }
        }
    }

    async fn fetch_readings(&self) -> Result<Vec<Reading>, SourceError> {
        let set = self.source.fetch().await?;
        // an empty managed table has no header row at all
        if !set.headers.is_empty() {
            let missing = self.columns.missing_from(&set.headers);
            if !missing.is_empty() {
                return Err(SourceError::MissingColumns(missing));
            }
        }
        Ok(set
            .rows
            .iter()
            .filter_map(|row| self.columns.map_row(self.variant, row))
            .collect())
    }
}

// ==============================================================================
// spreadsheet source (published csv export)
// ==============================================================================

pub const DEFAULT_SHEETS_BASE: &str = "https://docs.google.com/spreadsheets";

pub struct SpreadsheetSource {
    client: reqwest::Client,
    url: String,
}

impl SpreadsheetSource {
    pub fn new(client: reqwest::Client, base_url: &str, spreadsheet_id: &str, gid: u64) -> Self {
        let url = format!(
            "{}/d/{}/export?format=csv&gid={}",
            base_url.trim_end_matches('/'),
            spreadsheet_id,
            gid
        );
        Self { client, url }
    }
}

impl DataSource for SpreadsheetSource {
    fn describe(&self) -> String {
        format!("spreadsheet {}", self.url)
    }

    async fn fetch(&self) -> Result<RowSet, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status { status: response.status().as_u16(), url: self.url.clone() });
        }
        let body = response.text().await?;
        parse_csv(&body)
    }
}

/// parse a csv export with a header row; short rows simply lack cells
pub fn parse_csv(text: &str) -> Result<RowSet, SourceError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        if row.values().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(row);
    }
    Ok(RowSet { headers, rows })
}

// ==============================================================================
// managed table source (postgrest-style rest endpoint)
// ==============================================================================

pub struct ManagedTableSource {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ManagedTableSource {
    /// latest row of `table`, newest first by `order_column`
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        table: &str,
        order_column: &str,
        api_key: Option<String>,
    ) -> Self {
        let url = format!(
            "{}/rest/v1/{}?select=*&order={}.desc&limit=1",
            base_url.trim_end_matches('/'),
            table,
            order_column
        );
        Self { client, url, api_key }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl DataSource for ManagedTableSource {
    fn describe(&self) -> String {
        format!("table {}", self.url)
    }

    async fn fetch(&self) -> Result<RowSet, SourceError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(SourceError::NotConfigured("no api key for managed table".into()));
        };
        let response = self
            .client
            .get(&self.url)
            .header("apikey", key)
            .bearer_auth(key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status { status: response.status().as_u16(), url: self.url.clone() });
        }
        let objects: Vec<serde_json::Map<String, serde_json::Value>> = response.json().await?;
        Ok(rows_from_json(objects))
    }
}

/// flatten json objects into string rows; headers are the union of keys
pub fn rows_from_json(objects: Vec<serde_json::Map<String, serde_json::Value>>) -> RowSet {
    let mut headers = BTreeSet::new();
    let rows = objects
        .into_iter()
        .map(|obj| {
            obj.into_iter()
                .map(|(k, v)| {
                    headers.insert(k.clone());
                    let cell = match v {
                        serde_json::Value::Null => String::new(),
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, cell)
                })
                .collect()
        })
        .collect();
    RowSet { headers: headers.into_iter().collect(), rows }
}

// ==============================================================================
// configured source (what main wires up)
// ==============================================================================

pub enum AnySource {
    Spreadsheet(SpreadsheetSource),
    ManagedTable(ManagedTableSource),
}

impl AnySource {
    /// false when the source cannot possibly fetch (missing credentials)
    pub fn is_configured(&self) -> bool {
        match self {
            AnySource::Spreadsheet(_) => true,
            AnySource::ManagedTable(t) => t.is_configured(),
        }
    }
}

impl DataSource for AnySource {
    fn describe(&self) -> String {
        match self {
            AnySource::Spreadsheet(s) => s.describe(),
            AnySource::ManagedTable(t) => t.describe(),
        }
    }

    async fn fetch(&self) -> Result<RowSet, SourceError> {
        match self {
            AnySource::Spreadsheet(s) => s.fetch().await,
            AnySource::ManagedTable(t) => t.fetch().await,
        }
    }
}

/// shared http client; every request is bounded by `timeout`
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("farm-monitor/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

// ==============================================================================
// scripted source (tests)
// ==============================================================================
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// replays queued responses; repeats the last one once drained
    #[derive(Clone, Default)]
    pub struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Result<RowSet, String>>>>,
        last: Arc<Mutex<Option<Result<RowSet, String>>>>,
        delay: Option<Duration>,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub fn new(script: Vec<Result<RowSet, String>>) -> Self {
            Self { script: Arc::new(Mutex::new(script.into())), ..Default::default() }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DataSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn fetch(&self) -> Result<RowSet, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = {
                let mut script = self.script.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                match script.pop_front() {
                    Some(step) => {
                        *last = Some(step.clone());
                        step
                    }
                    None => last.clone().unwrap_or_else(|| Ok(RowSet::default())),
                }
            };
            next.map_err(SourceError::NotConfigured)
        }
    }

    /// build a row set from a header line and cell lines
    pub fn sheet(headers: &[&str], rows: &[&[&str]]) -> RowSet {
        RowSet {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|cells| {
                    headers
                        .iter()
                        .zip(cells.iter())
                        .map(|(h, c)| (h.to_string(), c.to_string()))
                        .collect()
                })
                .collect(),
        }
    }
}
