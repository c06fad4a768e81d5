//! ==============================================================================
//! main.rs - farm monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     polls farm sensor feeds (spreadsheet exports, a managed table) or
//!     simulates them, and serves the results as charts, tables and csv.
//!
//! responsibilities:
//!     - load configuration and initialize logging
//!     - build one source adapter + acquisition loop per configured view
//!     - start each loop in its configured mode
//!     - serve the dashboard until ctrl-c, then stop every loop
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                      host (this file)                       │
//!     │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//!     │  │ view loop    │  │ view loop    │  │ view loop    │  ...  │
//!     │  │ (monitoring) │  │ (irigasi)    │  │ (hidroponik) │       │
//!     │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘       │
//!     │         │ fetch / synth   │                 │               │
//!     │         ▼                 ▼                 ▼               │
//!     │   managed table      spreadsheet       spreadsheet          │
//!     │                                                             │
//!     │  ┌──────────────────────────────────────────────────────┐   │
//!     │  │ web server (axum): snapshots -> render -> json/csv   │   │
//!     │  └──────────────────────────────────────────────────────┘   │
//!     └─────────────────────────────────────────────────────────────┘
//!
//! relationships:
//!     - uses: config.rs, source.rs, acquisition.rs, server.rs
//!
//! ==============================================================================

mod acquisition;
mod config;
mod domain;
mod normalize;
mod render;
mod server;
mod simulate;
mod source;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::acquisition::AcquisitionLoop;
use crate::config::{LoggingConfig, SourceConfig, ViewConfig};
use crate::domain::Mode;
use crate::source::{AnySource, ColumnMap, ManagedTableSource, SourceAdapter, SpreadsheetSource};

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration; logging depends on it
    let loaded = config::MonitorConfig::load_or_default();
    let config = loaded.config;
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "farm monitor starting");
    if let Some(path) = &loaded.origin {
        info!(path = %path.display(), "loaded config");
    }
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    config.log_summary();

    // step 2: one shared http client for every source
    let client = source::build_client(config.request_timeout()).context("failed to build http client")?;

    // step 3: build and start one loop per view
    let mut views = Vec::with_capacity(config.views.len());
    for view_config in &config.views {
        let (view, mode) = build_view(view_config, &client, config.logging.show_sensor_data)?;
        view.start(mode).await;
        views.push(Arc::new(view));
    }
    let views = Arc::new(views);

    // step 4: serve until ctrl-c
    server::serve(&config.server.bind, Arc::clone(&views), shutdown_signal())
        .await
        .with_context(|| format!("web server on {} failed", config.server.bind))?;

    for view in views.iter() {
        view.stop().await;
    }
    info!("farm monitor stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// wire a view's source, column map and loop; returns the mode to start in
fn build_view(
    view: &ViewConfig,
    client: &reqwest::Client,
    show_sensor_data: bool,
) -> Result<(AcquisitionLoop<AnySource>, Mode)> {
    let source = match &view.source {
        SourceConfig::Spreadsheet { spreadsheet_id, gid, base_url } => {
            AnySource::Spreadsheet(SpreadsheetSource::new(client.clone(), base_url, spreadsheet_id, *gid))
        }
        SourceConfig::ManagedTable { base_url, table, order_column, api_key_env } => {
            let api_key = std::env::var(api_key_env).ok().filter(|k| !k.trim().is_empty());
            if api_key.is_none() {
                warn!(view = %view.name, env = %api_key_env, "managed table api key not set, live mode unavailable");
            }
            AnySource::ManagedTable(ManagedTableSource::new(client.clone(), base_url, table, order_column, api_key))
        }
    };
    let configured = source.is_configured();

    let columns = ColumnMap::default_for(view.variant)
        .with_overrides(view.variant, &view.columns)
        .with_context(|| format!("view `{}`: invalid column overrides", view.name))?;
    let adapter = SourceAdapter::new(source, view.variant, columns)
        .with_context(|| format!("view `{}`: invalid column map", view.name))?;

    let settings = view.settings(show_sensor_data);
    let mode = view.initial_mode(configured);
    Ok((AcquisitionLoop::new(view.name.clone(), view.variant, adapter, settings), mode))
}
