//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the dashboard listens.
//!     - HttpConfig: outbound request timeout for every source fetch.
//!     - LoggingConfig: filter level, json output, per-reading logging.
//!     - ViewConfig: one entry per monitoring view (variant, source, cadence).
//!
//! ==============================================================================

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::info;

use crate::acquisition::LoopSettings;
use crate::domain::{Mode, Variant};
use crate::source::DEFAULT_SHEETS_BASE;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_views")]
    pub views: Vec<ViewConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub request_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { request_timeout_seconds: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false, show_sensor_data: false }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    pub name: String,
    pub variant: Variant,
    /// omitted: live when the source is usable, simulated otherwise
    #[serde(default)]
    pub start_mode: Option<Mode>,
    pub source: SourceConfig,
    #[serde(default)]
    pub live_interval_seconds: Option<u64>,
    #[serde(default)]
    pub simulated_interval_seconds: Option<u64>,
    #[serde(default)]
    pub history_cap: Option<usize>,
    /// header overrides keyed by canonical field name
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceConfig {
    Spreadsheet {
        spreadsheet_id: String,
        #[serde(default)]
        gid: u64,
        #[serde(default = "default_sheets_base")]
        base_url: String,
    },
    ManagedTable {
        base_url: String,
        table: String,
        #[serde(default = "default_order_column")]
        order_column: String,
        /// environment variable holding the api key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
    },
}

fn default_sheets_base() -> String {
    DEFAULT_SHEETS_BASE.to_string()
}

fn default_order_column() -> String {
    "created_at".to_string()
}

fn default_api_key_env() -> String {
    "SUPABASE_ANON_KEY".to_string()
}

fn default_views() -> Vec<ViewConfig> {
    let view = |name: &str, variant: Variant, start_mode: Option<Mode>, source: SourceConfig| ViewConfig {
        name: name.to_string(),
        variant,
        start_mode,
        source,
        live_interval_seconds: None,
        simulated_interval_seconds: None,
        history_cap: None,
        columns: BTreeMap::new(),
    };
    vec![
        view(
            "monitoring",
            Variant::General,
            None,
            SourceConfig::ManagedTable {
                base_url: "http://localhost:54321".to_string(),
                table: "sensor_data".to_string(),
                order_column: default_order_column(),
                api_key_env: default_api_key_env(),
            },
        ),
        view(
            "irigasi-tetes",
            Variant::DripIrrigation,
            Some(Mode::Simulated),
            SourceConfig::Spreadsheet {
                spreadsheet_id: "1Y_LrC7kzvRlMPthtowIohP3ubRVGYDLoZEvjR2YPt1g".to_string(),
                gid: 0,
                base_url: default_sheets_base(),
            },
        ),
        view(
            "hidroponik",
            Variant::Hydroponic,
            Some(Mode::Simulated),
            SourceConfig::Spreadsheet {
                spreadsheet_id: "1rL0v_f4yI4cWr6g0uTwHQSqG-ASnI4cnYw0WArDbDx".to_string(),
                gid: 0,
                base_url: default_sheets_base(),
            },
        ),
    ]
}

impl ViewConfig {
    /// loop settings: variant defaults with config overrides applied
    pub fn settings(&self, show_sensor_data: bool) -> LoopSettings {
        let mut settings = LoopSettings::for_variant(self.variant);
        if let Some(secs) = self.live_interval_seconds {
            settings.live_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.simulated_interval_seconds {
            settings.simulated_interval = Duration::from_secs(secs);
        }
        if let Some(cap) = self.history_cap {
            settings.history_cap = cap;
        }
        settings.show_sensor_data = show_sensor_data;
        settings
    }

    pub fn initial_mode(&self, source_configured: bool) -> Mode {
        match self.start_mode {
            Some(mode) => mode,
            None if source_configured => Mode::Live,
            None => Mode::Simulated,
        }
    }
}

/// where the effective configuration came from
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: MonitorConfig,
    pub origin: Option<PathBuf>,
    /// problems met while searching, reported once logging is up
    pub warnings: Vec<String>,
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: MonitorConfig = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> LoadedConfig {
        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        let mut warnings = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::load(&path) {
                Ok(config) => return LoadedConfig { config, origin: Some(path), warnings },
                Err(e) => warnings.push(format!("failed to load {}: {:#}", path.display(), e)),
            }
        }

        warnings.push("no usable config file found - using defaults".to_string());
        LoadedConfig { config: Self::default(), origin: None, warnings }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.views.is_empty() {
            bail!("at least one view must be configured");
        }
        if self.http.request_timeout_seconds == 0 {
            bail!("http.request_timeout_seconds must be positive");
        }
        let mut names = BTreeSet::new();
        for view in &self.views {
            if view.name.trim().is_empty() {
                bail!("view names must not be blank");
            }
            if !names.insert(view.name.as_str()) {
                bail!("duplicate view name `{}`", view.name);
            }
            if view.live_interval_seconds == Some(0) || view.simulated_interval_seconds == Some(0) {
                bail!("view `{}`: intervals must be positive", view.name);
            }
            if view.history_cap == Some(0) {
                bail!("view `{}`: history_cap must be positive", view.name);
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_seconds)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind,
            request_timeout_s = self.http.request_timeout_seconds,
            level = %self.logging.level,
            views = self.views.len(),
            "configuration"
        );
        for view in &self.views {
            info!(
                view = %view.name,
                variant = %view.variant,
                start_mode = ?view.start_mode,
                "configured view"
            );
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            views: default_views(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_three_views() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        let names: Vec<_> = config.views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["monitoring", "irigasi-tetes", "hidroponik"]);
        assert_eq!(config.views[1].initial_mode(true), Mode::Simulated);
        assert_eq!(config.views[0].initial_mode(false), Mode::Simulated);
        assert_eq!(config.views[0].initial_mode(true), Mode::Live);
    }

    #[test]
    fn parses_a_full_file() {
        let config = MonitorConfig::parse(
            r#"
            [server]
            bind = "127.0.0.1:8080"

            [logging]
            level = "debug"
            json = true

            [[views]]
            name = "greenhouse"
            variant = "hydroponic"
            start_mode = "live"
            live_interval_seconds = 10
            history_cap = 200
            source = { kind = "spreadsheet", spreadsheet_id = "abc", gid = 3 }
            columns = { ph = "pH Air" }
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(config.logging.json);
        assert_eq!(config.http.request_timeout_seconds, 10);

        let view = &config.views[0];
        assert_eq!(view.variant, Variant::Hydroponic);
        assert_eq!(view.start_mode, Some(Mode::Live));
        assert_eq!(
            view.source,
            SourceConfig::Spreadsheet { spreadsheet_id: "abc".into(), gid: 3, base_url: DEFAULT_SHEETS_BASE.into() }
        );
        assert_eq!(view.columns["ph"], "pH Air");

        let settings = view.settings(true);
        assert_eq!(settings.live_interval, Duration::from_secs(10));
        assert_eq!(settings.simulated_interval, Duration::from_secs(3));
        assert_eq!(settings.history_cap, 200);
        assert!(settings.show_sensor_data);
    }

    #[test]
    fn managed_table_defaults() {
        let config = MonitorConfig::parse(
            r#"
            [[views]]
            name = "monitoring"
            variant = "general"
            source = { kind = "managed-table", base_url = "https://x.supabase.co", table = "sensor_data" }
            "#,
        )
        .unwrap();
        match &config.views[0].source {
            SourceConfig::ManagedTable { order_column, api_key_env, .. } => {
                assert_eq!(order_column, "created_at");
                assert_eq!(api_key_env, "SUPABASE_ANON_KEY");
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_names_and_zero_intervals() {
        let dup = r#"
            [[views]]
            name = "a"
            variant = "general"
            source = { kind = "spreadsheet", spreadsheet_id = "x" }
            [[views]]
            name = "a"
            variant = "hydroponic"
            source = { kind = "spreadsheet", spreadsheet_id = "y" }
        "#;
        assert!(MonitorConfig::parse(dup).is_err());

        let zero = r#"
            [[views]]
            name = "a"
            variant = "general"
            simulated_interval_seconds = 0
            source = { kind = "spreadsheet", spreadsheet_id = "x" }
        "#;
        assert!(MonitorConfig::parse(zero).is_err());
    }
}
