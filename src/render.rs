//! ==============================================================================
//! render.rs - chart series, table pages and csv export
//! ==============================================================================
//!
//! purpose:
//!     pure transformations of a reading snapshot. nothing here touches the
//!     acquisition state; server.rs hands in a copy and serializes the result.
//!
//! ==============================================================================

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Metric, Mode, Reading, ReadingStatus, Variant};
use crate::normalize::{format_clock, format_local, parse_instant};

// ==============================================================================
// chart
// ==============================================================================

/// readings shown per chart
pub const CHART_WINDOW: usize = 20;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSeries {
    pub metric: Metric,
    pub unit: &'static str,
    pub values: Vec<f64>,
    /// mean over the window
    pub average: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChartView {
    /// nothing to plot yet
    Waiting { message: String },
    Series { labels: Vec<String>, series: Vec<MetricSeries> },
}

/// the last `CHART_WINDOW` readings as one series per variant metric
pub fn chart(variant: Variant, mode: Mode, readings: &[Reading]) -> ChartView {
    if readings.is_empty() {
        let message = match mode {
            Mode::Live => "waiting for data from the live source",
            Mode::Simulated => "waiting for simulated data",
        };
        return ChartView::Waiting { message: message.to_string() };
    }

    let window = &readings[readings.len().saturating_sub(CHART_WINDOW)..];
    let labels = window.iter().map(|r| format_clock(&r.timestamp)).collect();
    let series = variant
        .metrics()
        .iter()
        .map(|metric| {
            let values: Vec<f64> = window.iter().map(|r| r.metric(*metric).unwrap_or(0.0)).collect();
            let average = values.iter().sum::<f64>() / values.len() as f64;
            MetricSeries { metric: *metric, unit: metric.unit(), values, average }
        })
        .collect();
    ChartView::Series { labels, series }
}

// ==============================================================================
// table
// ==============================================================================

pub const PAGE_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(ReadingStatus),
}

impl StatusFilter {
    /// `all`, empty or unknown values mean no filter
    pub fn parse(s: &str) -> Self {
        ReadingStatus::parse(s).map(StatusFilter::Only).unwrap_or(StatusFilter::All)
    }

    fn matches(&self, status: ReadingStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableQuery {
    pub search: String,
    pub status: StatusFilter,
    /// 1-based
    pub page: usize,
}

impl Default for TableQuery {
    fn default() -> Self {
        Self { search: String::new(), status: StatusFilter::All, page: 1 }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TableRow {
    /// formatted timestamp the search runs against
    pub time: String,
    #[serde(flatten)]
    pub reading: Reading,
}

#[derive(Clone, Debug, Serialize)]
pub struct TablePage {
    pub rows: Vec<TableRow>,
    pub page: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    pub page_size: usize,
    pub has_prev: bool,
    pub has_next: bool,
    /// 1-based range of rows on this page, 0..0 when empty
    pub first_row: usize,
    pub last_row: usize,
    pub empty_message: Option<String>,
}

/// filter, sort newest first, then slice out one page
pub fn table(readings: &[Reading], query: &TableQuery) -> TablePage {
    let needle = query.search.trim().to_lowercase();
    let mut rows: Vec<TableRow> = readings
        .iter()
        .filter(|r| query.status.matches(r.status))
        .map(|r| TableRow { time: format_local(&r.timestamp), reading: r.clone() })
        .filter(|row| needle.is_empty() || row.time.to_lowercase().contains(&needle))
        .collect();
    // unparseable timestamps sink to the end
    rows.sort_by_key(|row| Reverse(parse_instant(&row.reading.timestamp)));

    let total_rows = rows.len();
    let total_pages = total_rows.div_ceil(PAGE_SIZE);
    let page = query.page.clamp(1, total_pages.max(1));
    let start = ((page - 1) * PAGE_SIZE).min(total_rows);
    let end = (start + PAGE_SIZE).min(total_rows);

    let empty_message = if readings.is_empty() {
        Some("no data yet".to_string())
    } else if total_rows == 0 {
        Some("no rows match the filter".to_string())
    } else {
        None
    };

    TablePage {
        rows: rows.drain(start..end).collect(),
        page,
        total_pages,
        total_rows,
        page_size: PAGE_SIZE,
        has_prev: page > 1,
        has_next: page < total_pages,
        first_row: if end > start { start + 1 } else { 0 },
        last_row: end,
        empty_message,
    }
}

// ==============================================================================
// csv export
// ==============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsvField {
    Timestamp,
    Metric(Metric),
}

#[derive(Clone, Copy, Debug)]
pub struct CsvColumn {
    pub header: &'static str,
    pub field: CsvField,
    /// decimals for numeric fields
    pub precision: usize,
}

const fn col(header: &'static str, metric: Metric, precision: usize) -> CsvColumn {
    CsvColumn { header, field: CsvField::Metric(metric), precision }
}

const TIMESTAMP: CsvColumn = CsvColumn { header: "Timestamp", field: CsvField::Timestamp, precision: 0 };

const GENERAL_SCHEMA: &[CsvColumn] = &[
    TIMESTAMP,
    col("Temperature(°C)", Metric::Temperature, 1),
    col("Humidity(%)", Metric::Humidity, 1),
];

const DRIP_SCHEMA: &[CsvColumn] = &[
    TIMESTAMP,
    col("Suhu Tanah", Metric::Temperature, 1),
    col("Suhu Udara", Metric::AirTemperature, 1),
    col("Kelembaban Udara", Metric::Humidity, 1),
    col("Kelembapan Tanah", Metric::SoilMoisture, 1),
    col("pH", Metric::Ph, 2),
    col("Flow Rate", Metric::FlowRate, 2),
];

const HYDRO_SCHEMA: &[CsvColumn] = &[
    TIMESTAMP,
    col("Suhu (°C)", Metric::Temperature, 1),
    col("FlowL/M", Metric::FlowRate, 2),
    col("pH", Metric::Ph, 2),
];

pub fn schema(variant: Variant) -> &'static [CsvColumn] {
    match variant {
        Variant::General => GENERAL_SCHEMA,
        Variant::DripIrrigation => DRIP_SCHEMA,
        Variant::Hydroponic => HYDRO_SCHEMA,
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("there is no data to export yet")]
    Empty,
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to finish csv: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub body: String,
}

/// serialize the history in storage order; refuses an empty history
pub fn export_csv(variant: Variant, readings: &[Reading], now: DateTime<Utc>) -> Result<CsvExport, ExportError> {
    if readings.is_empty() {
        return Err(ExportError::Empty);
    }

    let columns = schema(variant);
    let mut body = header(variant)?;
    let mut writer = csv_writer();
    for reading in readings {
        writer.write_record(columns.iter().map(|c| format_cell(c, reading)))?;
    }
    body.push_str(&finish(writer)?);

    Ok(CsvExport { filename: export_filename(variant, now), body })
}

/// the header row alone, newline terminated; independent of any data
pub fn header(variant: Variant) -> Result<String, ExportError> {
    let mut writer = csv_writer();
    writer.write_record(schema(variant).iter().map(|c| c.header))?;
    finish(writer)
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn format_cell(column: &CsvColumn, reading: &Reading) -> String {
    match column.field {
        CsvField::Timestamp => reading.timestamp.clone(),
        CsvField::Metric(metric) => reading
            .metric(metric)
            .map(|v| format!("{:.*}", column.precision, v))
            .unwrap_or_default(),
    }
}

pub fn export_filename(variant: Variant, now: DateTime<Utc>) -> String {
    match variant {
        Variant::General => format!("monitoring-data-{}.csv", now.format("%Y-%m-%d")),
        Variant::DripIrrigation => format!("data-irigasi-{}.csv", now.format("%Y%m%d-%H%M%S")),
        Variant::Hydroponic => format!("hidroponik_data_{}.csv", now.timestamp_millis()),
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReadingSource;
    use chrono::TimeZone;

    fn general(ts: &str, t: f64, h: f64) -> Reading {
        Reading::new(ts, ReadingStatus::Connected, ReadingSource::Live)
            .with_metric(Metric::Temperature, t)
            .with_metric(Metric::Humidity, h)
    }

    fn minutes(n: usize) -> Vec<Reading> {
        (0..n)
            .map(|i| general(&format!("2024-01-25T{:02}:{:02}:00", 8 + i / 60, i % 60), 20.0 + i as f64, 50.0))
            .collect()
    }

    #[test]
    fn csv_matches_schema_and_precision() {
        let readings = vec![
            general("2024-01-25T14:30:00", 25.0, 60.0),
            general("2024-01-25T14:30:05", 26.5, 61.2),
        ];
        let now = Utc.with_ymd_and_hms(2024, 1, 25, 15, 0, 0).unwrap();
        let export = export_csv(Variant::General, &readings, now).unwrap();
        let lines: Vec<&str> = export.body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Timestamp,Temperature(°C),Humidity(%)",
                "2024-01-25T14:30:00,25.0,60.0",
                "2024-01-25T14:30:05,26.5,61.2",
            ]
        );
        assert_eq!(export.filename, "monitoring-data-2024-01-25.csv");
    }

    #[test]
    fn drip_csv_uses_sheet_headers() {
        let r = Reading::new("2024-01-25T14:30:00", ReadingStatus::Dummy, ReadingSource::Simulated)
            .with_metric(Metric::Temperature, 26.04)
            .with_metric(Metric::AirTemperature, 30.0)
            .with_metric(Metric::Humidity, 65.55)
            .with_metric(Metric::SoilMoisture, 40.0)
            .with_metric(Metric::Ph, 6.5)
            .with_metric(Metric::FlowRate, 3.456);
        let now = Utc.with_ymd_and_hms(2024, 1, 25, 15, 0, 0).unwrap();
        let export = export_csv(Variant::DripIrrigation, &[r], now).unwrap();
        let mut lines = export.body.lines();
        assert_eq!(lines.next(), Some("Timestamp,Suhu Tanah,Suhu Udara,Kelembaban Udara,Kelembapan Tanah,pH,Flow Rate"));
        assert_eq!(lines.next(), Some("2024-01-25T14:30:00,26.0,30.0,65.5,40.0,6.50,3.46"));
        assert_eq!(export.filename, "data-irigasi-20240125-150000.csv");
    }

    #[test]
    fn missing_metric_renders_blank() {
        let r = Reading::new("t", ReadingStatus::Connected, ReadingSource::Live).with_metric(Metric::Temperature, 21.0);
        let export = export_csv(Variant::Hydroponic, &[r], Utc::now()).unwrap();
        assert_eq!(export.body.lines().nth(1), Some("t,21.0,,"));
        assert!(export.filename.starts_with("hidroponik_data_"));
    }

    #[test]
    fn empty_export_is_rejected() {
        assert!(matches!(export_csv(Variant::General, &[], Utc::now()), Err(ExportError::Empty)));
    }

    #[test]
    fn header_row_exists_without_data() {
        assert_eq!(header(Variant::General).unwrap(), "Timestamp,Temperature(°C),Humidity(%)\n");
        assert_eq!(header(Variant::Hydroponic).unwrap(), "Timestamp,Suhu (°C),FlowL/M,pH\n");
        assert_eq!(
            header(Variant::DripIrrigation).unwrap(),
            "Timestamp,Suhu Tanah,Suhu Udara,Kelembaban Udara,Kelembapan Tanah,pH,Flow Rate\n"
        );
    }

    #[test]
    fn pagination_last_page() {
        let readings = minutes(25);
        let page = table(&readings, &TableQuery { page: 3, ..Default::default() });
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next);
        assert!(page.has_prev);
        assert_eq!((page.first_row, page.last_row), (21, 25));

        let first = table(&readings, &TableQuery::default());
        assert_eq!(first.rows.len(), 10);
        assert!(first.has_next && !first.has_prev);
    }

    #[test]
    fn table_sorts_newest_first_regardless_of_storage() {
        let mut readings = minutes(12);
        readings.reverse();
        readings.push(general("not a time", 0.0, 0.0));
        let page = table(&readings, &TableQuery::default());
        assert_eq!(page.rows[0].reading.timestamp, "2024-01-25T08:11:00");
        assert_eq!(page.rows[9].reading.timestamp, "2024-01-25T08:02:00");

        let last = table(&readings, &TableQuery { page: 2, ..Default::default() });
        assert_eq!(last.rows.last().unwrap().reading.timestamp, "not a time");
    }

    #[test]
    fn page_numbers_clamp() {
        let readings = minutes(5);
        assert_eq!(table(&readings, &TableQuery { page: 0, ..Default::default() }).page, 1);
        assert_eq!(table(&readings, &TableQuery { page: 9, ..Default::default() }).page, 1);

        let empty = table(&[], &TableQuery { page: 4, ..Default::default() });
        assert_eq!(empty.page, 1);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next && !empty.has_prev);
        assert_eq!(empty.empty_message.as_deref(), Some("no data yet"));
    }

    #[test]
    fn search_and_status_filters() {
        let mut readings = minutes(3);
        readings[1].status = ReadingStatus::Disconnected;

        let q = TableQuery { search: "08.01".into(), ..Default::default() };
        let page = table(&readings, &q);
        assert_eq!(page.total_rows, 1);
        assert_eq!(page.rows[0].time, "25/1/2024, 08.01.00");

        let q = TableQuery { status: StatusFilter::parse("connected"), ..Default::default() };
        assert_eq!(table(&readings, &q).total_rows, 2);

        let q = TableQuery { status: StatusFilter::parse("all"), search: "26/1".into(), page: 1 };
        let page = table(&readings, &q);
        assert_eq!(page.total_rows, 0);
        assert_eq!(page.empty_message.as_deref(), Some("no rows match the filter"));
    }

    #[test]
    fn chart_windows_last_twenty() {
        let readings = minutes(30);
        match chart(Variant::General, Mode::Live, &readings) {
            ChartView::Series { labels, series } => {
                assert_eq!(labels.len(), 20);
                assert_eq!(labels[0], "08:10:00");
                assert_eq!(series.len(), 2);
                assert_eq!(series[0].metric, Metric::Temperature);
                assert_eq!(series[0].values[0], 30.0);
                assert_eq!(series[0].unit, "°C");
                assert!((series[0].average - 39.5).abs() < 1e-9);
            }
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn empty_chart_waits() {
        let view = chart(Variant::Hydroponic, Mode::Simulated, &[]);
        assert_eq!(view, ChartView::Waiting { message: "waiting for simulated data".into() });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "waiting");
    }
}
