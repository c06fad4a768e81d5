//! ==============================================================================
//! server.rs - dashboard and json/csv api
//! ==============================================================================
//!
//! purpose:
//!     exposes every acquisition loop over http. handlers only read
//!     snapshots and hand them to render.rs; the one write is a mode switch.
//!
//! routes:
//!     GET  /                              html overview of all views
//!     GET  /api/views                     status of every view
//!     GET  /api/views/:name               status of one view
//!     GET  /api/views/:name/chart         last readings as chart series
//!     GET  /api/views/:name/table         filtered, paginated history
//!     GET  /api/views/:name/export        csv download of the history
//!     POST /api/views/:name/mode?mode=    switch live / simulated
//!
//! ==============================================================================

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::acquisition::{AcquisitionLoop, ViewStatus};
use crate::domain::Mode;
use crate::normalize::format_local;
use crate::render::{self, ChartView, ExportError, StatusFilter, TablePage, TableQuery, CHART_WINDOW};
use crate::source::DataSource;

/// every configured view, in config order
pub type Views<S> = Arc<Vec<Arc<AcquisitionLoop<S>>>>;

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown view `{0}`")]
    UnknownView(String),
    #[error("unknown mode `{0}`, expected live or simulated")]
    BadMode(String),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownView(_) => StatusCode::NOT_FOUND,
            ApiError::BadMode(_) => StatusCode::BAD_REQUEST,
            ApiError::Export(ExportError::Empty) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ==============================================================================
// router
// ==============================================================================

pub fn router<S: DataSource>(views: Views<S>) -> Router {
    Router::new()
        .route("/", get(index_handler::<S>))
        .route("/api/views", get(list_handler::<S>))
        .route("/api/views/:name", get(status_handler::<S>))
        .route("/api/views/:name/chart", get(chart_handler::<S>))
        .route("/api/views/:name/table", get(table_handler::<S>))
        .route("/api/views/:name/export", get(export_handler::<S>))
        .route("/api/views/:name/mode", post(mode_handler::<S>))
        .layer(CorsLayer::permissive())
        .with_state(views)
}

/// bind and serve until `shutdown` resolves
pub async fn serve<S: DataSource>(
    bind: &str,
    views: Views<S>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "dashboard listening");
    axum::serve(listener, router(views))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn find<S: DataSource>(views: &[Arc<AcquisitionLoop<S>>], name: &str) -> Result<Arc<AcquisitionLoop<S>>, ApiError> {
    views
        .iter()
        .find(|v| v.name() == name)
        .cloned()
        .ok_or_else(|| ApiError::UnknownView(name.to_string()))
}

// ==============================================================================
// json api
// ==============================================================================

async fn list_handler<S: DataSource>(State(views): State<Views<S>>) -> Json<Vec<ViewStatus>> {
    let mut out = Vec::with_capacity(views.len());
    for view in views.iter() {
        out.push(view.status().await);
    }
    Json(out)
}

async fn status_handler<S: DataSource>(
    State(views): State<Views<S>>,
    Path(name): Path<String>,
) -> Result<Json<ViewStatus>, ApiError> {
    let view = find(&views, &name)?;
    Ok(Json(view.status().await))
}

async fn chart_handler<S: DataSource>(
    State(views): State<Views<S>>,
    Path(name): Path<String>,
) -> Result<Json<ChartView>, ApiError> {
    let view = find(&views, &name)?;
    let readings = view.recent(CHART_WINDOW).await;
    Ok(Json(render::chart(view.variant(), view.mode().await, &readings)))
}

#[derive(Debug, Deserialize)]
struct TableParams {
    page: Option<usize>,
    search: Option<String>,
    status: Option<String>,
}

async fn table_handler<S: DataSource>(
    State(views): State<Views<S>>,
    Path(name): Path<String>,
    Query(params): Query<TableParams>,
) -> Result<Json<TablePage>, ApiError> {
    let view = find(&views, &name)?;
    let query = TableQuery {
        search: params.search.unwrap_or_default(),
        status: params.status.as_deref().map(StatusFilter::parse).unwrap_or(StatusFilter::All),
        page: params.page.unwrap_or(1),
    };
    let readings = view.snapshot().await;
    Ok(Json(render::table(&readings, &query)))
}

async fn export_handler<S: DataSource>(
    State(views): State<Views<S>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let view = find(&views, &name)?;
    let readings = view.snapshot().await;
    let export = render::export_csv(view.variant(), &readings, Utc::now()).map_err(|e| {
        warn!(view = %name, error = %e, "csv export rejected");
        e
    })?;
    info!(view = %name, rows = readings.len(), file = %export.filename, "csv export");

    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", export.filename)),
    ];
    Ok((headers, export.body).into_response())
}

#[derive(Debug, Deserialize)]
struct ModeParams {
    mode: String,
}

/// mode switch endpoint
/// POST /api/views/:name/mode?mode=live|simulated
async fn mode_handler<S: DataSource>(
    State(views): State<Views<S>>,
    Path(name): Path<String>,
    Query(params): Query<ModeParams>,
) -> Result<Json<ViewStatus>, ApiError> {
    let view = find(&views, &name)?;
    let mode = Mode::parse(&params.mode).ok_or_else(|| ApiError::BadMode(params.mode.clone()))?;
    view.set_mode(mode).await;
    Ok(Json(view.status().await))
}

// ==============================================================================
// html overview
// ==============================================================================

async fn index_handler<S: DataSource>(State(views): State<Views<S>>) -> Html<String> {
    let mut cards = String::new();
    for view in views.iter() {
        cards.push_str(&view_card(&view.status().await));
    }
    Html(format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="5">
<title>farm monitor</title>
</head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h1>farm monitor</h1>
    {cards}
</body>
</html>"#
    ))
}

fn view_card(status: &ViewStatus) -> String {
    let name = html_escape(&status.name);
    let connection = match (status.mode, status.connected) {
        (Mode::Simulated, _) => "simulated",
        (Mode::Live, true) => "connected",
        (Mode::Live, false) => "disconnected",
    };

    let mut metrics = String::new();
    match &status.latest {
        Some(latest) => {
            for metric in status.variant.metrics() {
                let value = latest
                    .metric(*metric)
                    .map(|v| format!("{:.2} {}", v, metric.unit()))
                    .unwrap_or_else(|| "--".to_string());
                metrics.push_str(&format!("<li>{}: {}</li>", metric.key(), html_escape(&value)));
            }
            metrics.push_str(&format!(
                "<li>updated: {}</li>",
                html_escape(&format_local(&latest.timestamp))
            ));
        }
        None if status.initial_load => metrics.push_str("<li>loading...</li>"),
        None => metrics.push_str("<li>no data yet</li>"),
    }

    let error = status
        .last_error
        .as_deref()
        .map(|e| format!(r#"<p style="color: #ff6b6b;">{}</p>"#, html_escape(e)))
        .unwrap_or_default();

    format!(
        r#"<section style="background: #16213e; padding: 1rem; border-radius: 8px; margin-bottom: 1rem;">
    <h2>{name} <small>({variant}, {mode}, {connection})</small></h2>
    <ul>{metrics}</ul>
    {error}
    <p>{readings}/{cap} readings from {source}</p>
    <p>
        <a href="/api/views/{name}/chart">chart</a> |
        <a href="/api/views/{name}/table">table</a> |
        <a href="/api/views/{name}/export">export csv</a>
    </p>
    <form method="post" action="/api/views/{name}/mode?mode=live" style="display: inline;"><button>live</button></form>
    <form method="post" action="/api/views/{name}/mode?mode=simulated" style="display: inline;"><button>simulated</button></form>
</section>
"#,
        variant = status.variant,
        mode = status.mode,
        readings = status.readings,
        cap = status.history_cap,
        source = html_escape(&status.source),
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
