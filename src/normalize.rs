//! ==============================================================================
//! normalize.rs - numeric and timestamp normalization for sheet cells
//! ==============================================================================
//!
//! purpose:
//!     spreadsheet cells arrive as loosely formatted strings ("25,5 °C",
//!     "1.234,5", "", "n/a"). everything here is total: numbers default to
//!     0 and timestamps default to "now", nothing panics and nothing returns
//!     NaN.
//!
//! relationships:
//!     - used by: source.rs (row -> reading mapping)
//!     - used by: render.rs (sorting, table labels, chart labels)
//!
//! ==============================================================================

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// parse a loosely formatted numeric cell, 0 on failure
///
/// keeps only digits, `.`, `,` and `-`, resolves decimal vs thousands
/// separators, then reads the longest leading float.
pub fn parse_number(cell: &str) -> f64 {
    let cleaned: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    let canonical = resolve_separators(&cleaned);
    match leading_float(&canonical) {
        Some(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

fn resolve_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (None, None) => s.to_string(),
        // only dots: a single dot is a decimal point, several are grouping
        (None, Some(_)) => {
            if s.matches('.').count() > 1 {
                s.replace('.', "")
            } else {
                s.to_string()
            }
        }
        // only commas: one comma is a decimal comma, several are grouping
        (Some(_), None) => {
            if s.matches(',').count() > 1 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        // both: whichever comes last is the decimal separator
        (Some(comma), Some(dot)) => {
            if comma > dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
    }
}

fn leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if bytes.first() == Some(&b'-') {
        end = 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let int_digits = end - int_start;

    let mut frac_digits = 0;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut probe = end + 1;
        while probe < bytes.len() && bytes[probe].is_ascii_digit() {
            probe += 1;
        }
        frac_digits = probe - end - 1;
        if int_digits + frac_digits > 0 {
            end = probe;
        }
    }

    if int_digits + frac_digits == 0 {
        return None;
    }
    s[..end].parse().ok()
}

// ==============================================================================
// timestamps
// ==============================================================================

/// a reconstructed timestamp and whether it was made up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub value: String,
    /// true when neither cell was usable and "now" was substituted
    pub fabricated: bool,
}

/// join separate date and time cells into one ISO-8601 string
///
/// `YYYY-MM-DD` dates are used as-is, `DD/MM/YYYY` dates are reordered and
/// zero padded. with one cell missing the other is returned verbatim; with
/// both missing the result is `now`, flagged as fabricated.
pub fn reconstruct_timestamp(date: Option<&str>, time: Option<&str>, now: DateTime<Utc>) -> Timestamp {
    let date = date.map(str::trim).filter(|s| !s.is_empty());
    let time = time.map(str::trim).filter(|s| !s.is_empty());

    if let (Some(d), Some(t)) = (date, time) {
        if d.contains('-') {
            return Timestamp { value: format!("{d}T{t}"), fabricated: false };
        }
        if d.contains('/') {
            let parts: Vec<&str> = d.split('/').map(str::trim).collect();
            if let [day, month, year] = parts.as_slice() {
                return Timestamp {
                    value: format!("{year}-{month:0>2}-{day:0>2}T{t}"),
                    fabricated: false,
                };
            }
        }
    }

    match date.or(time) {
        Some(cell) => Timestamp { value: cell.to_string(), fabricated: false },
        None => Timestamp { value: iso_now(now), fabricated: true },
    }
}

/// `now` as RFC 3339 with millisecond precision and a `Z` suffix
pub fn iso_now(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// milliseconds since the unix epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// best-effort parse of a stored timestamp into wall-clock time
pub fn parse_instant(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// wall-clock time for display: instants with an offset are shown in the
/// host's local zone, offset-less sheet times as written
fn display_instant(value: &str) -> Option<NaiveDateTime> {
    match DateTime::parse_from_rfc3339(value.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Local).naive_local()),
        Err(_) => parse_instant(value),
    }
}

/// table label in the id-ID style, e.g. `25/1/2024, 14.30.00`
pub fn format_local(value: &str) -> String {
    match display_instant(value) {
        Some(dt) => dt.format("%-d/%-m/%Y, %H.%M.%S").to_string(),
        None => value.to_string(),
    }
}

/// chart axis label `HH:MM:SS`, `--` when unparseable
pub fn format_clock(value: &str) -> String {
    match display_instant(value) {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => "--".to_string(),
    }
}
