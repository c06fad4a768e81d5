//! ==============================================================================
//! domain.rs - canonical reading model shared by every view
//! ==============================================================================
//!
//! purpose:
//!     one Reading type for live and simulated data alike. the `source`
//!     discriminant tells them apart so renderers only need one code path.
//!
//! relationships:
//!     - produced by: source.rs (live rows), simulate.rs (dummy rows)
//!     - stored by: store.rs
//!     - consumed by: render.rs, server.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// connectivity tag carried by every reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Connected,
    Disconnected,
    Dummy,
}

impl ReadingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connected" => Some(ReadingStatus::Connected),
            "disconnected" => Some(ReadingStatus::Disconnected),
            "dummy" => Some(ReadingStatus::Dummy),
            _ => None,
        }
    }
}

/// where a reading came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingSource {
    Live,
    Simulated,
}

/// acquisition mode of a view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Simulated,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Some(Mode::Live),
            "simulated" | "simulation" | "dummy" => Some(Mode::Simulated),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Live => write!(f, "live"),
            Mode::Simulated => write!(f, "simulated"),
        }
    }
}

/// the monitoring variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// temperature + humidity from the managed table
    General,
    /// chili drip irrigation sheet
    DripIrrigation,
    /// lettuce hydroponic sheet
    Hydroponic,
}

impl Variant {
    /// metrics this variant carries, in display order
    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            Variant::General => &[Metric::Temperature, Metric::Humidity],
            Variant::DripIrrigation => &[
                Metric::Temperature,
                Metric::AirTemperature,
                Metric::Humidity,
                Metric::SoilMoisture,
                Metric::Ph,
                Metric::FlowRate,
            ],
            Variant::Hydroponic => &[Metric::Temperature, Metric::FlowRate, Metric::Ph],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Variant::General => "general",
            Variant::DripIrrigation => "drip-irrigation",
            Variant::Hydroponic => "hydroponic",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// a measurable quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// soil temperature on the drip sheet, water/room temperature elsewhere
    Temperature,
    AirTemperature,
    Humidity,
    SoilMoisture,
    Ph,
    FlowRate,
}

impl Metric {
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::AirTemperature => "air_temperature",
            Metric::Humidity => "humidity",
            Metric::SoilMoisture => "soil_moisture",
            Metric::Ph => "ph",
            Metric::FlowRate => "flow_rate",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature | Metric::AirTemperature => "°C",
            Metric::Humidity | Metric::SoilMoisture => "%",
            Metric::Ph => "",
            Metric::FlowRate => "L/min",
        }
    }
}

/// one normalized sensor observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// ISO-8601 instant, possibly without offset (sheet local time)
    pub timestamp: String,
    /// true when the normalizer had to fill in "now"
    #[serde(default)]
    pub timestamp_fabricated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_rate: Option<f64>,
    pub status: ReadingStatus,
    pub source: ReadingSource,
}

impl Reading {
    /// an empty reading with no metrics set
    pub fn new(timestamp: impl Into<String>, status: ReadingStatus, source: ReadingSource) -> Self {
        Self {
            timestamp: timestamp.into(),
            timestamp_fabricated: false,
            temperature: None,
            air_temperature: None,
            humidity: None,
            soil_moisture: None,
            ph: None,
            flow_rate: None,
            status,
            source,
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::AirTemperature => self.air_temperature,
            Metric::Humidity => self.humidity,
            Metric::SoilMoisture => self.soil_moisture,
            Metric::Ph => self.ph,
            Metric::FlowRate => self.flow_rate,
        }
    }

    pub fn set_metric(&mut self, metric: Metric, value: f64) {
        let slot = match metric {
            Metric::Temperature => &mut self.temperature,
            Metric::AirTemperature => &mut self.air_temperature,
            Metric::Humidity => &mut self.humidity,
            Metric::SoilMoisture => &mut self.soil_moisture,
            Metric::Ph => &mut self.ph,
            Metric::FlowRate => &mut self.flow_rate,
        };
        *slot = Some(value);
    }

    #[cfg(test)]
    pub fn with_metric(mut self, metric: Metric, value: f64) -> Self {
        self.set_metric(metric, value);
        self
    }
}
