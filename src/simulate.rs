//! simulated readings for views without a live feed.
//!
//! values jitter inside fixed bands around plausible baselines per variant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::domain::{Metric, Reading, ReadingSource, ReadingStatus, Variant};
use crate::normalize::iso_now;

/// cadence of the dummy generator per variant
pub fn default_interval(variant: Variant) -> Duration {
    match variant {
        Variant::General => Duration::from_secs(2),
        Variant::DripIrrigation => Duration::from_secs(4),
        Variant::Hydroponic => Duration::from_secs(3),
    }
}

/// the band each simulated metric is drawn from
pub fn band(variant: Variant, metric: Metric) -> (f64, f64) {
    match (variant, metric) {
        (Variant::General, Metric::Temperature) => (23.0, 27.0),
        (Variant::General, Metric::Humidity) => (60.0, 70.0),
        (Variant::DripIrrigation, Metric::Temperature) => (25.0, 30.0),
        (Variant::DripIrrigation, Metric::AirTemperature) => (28.0, 32.0),
        (Variant::DripIrrigation, Metric::Humidity) => (60.0, 70.0),
        (Variant::DripIrrigation, Metric::SoilMoisture) => (35.0, 50.0),
        (Variant::DripIrrigation, Metric::Ph) => (6.0, 7.0),
        (Variant::DripIrrigation, Metric::FlowRate) => (0.0, 10.0),
        (Variant::Hydroponic, Metric::Temperature) => (20.0, 30.0),
        (Variant::Hydroponic, Metric::FlowRate) => (1.0, 4.0),
        (Variant::Hydroponic, Metric::Ph) => (5.5, 7.5),
        _ => (0.0, 0.0),
    }
}

/// synthesize one reading stamped `now`
pub fn synthesize<R: Rng + ?Sized>(variant: Variant, rng: &mut R, now: DateTime<Utc>) -> Reading {
    let mut reading = Reading::new(iso_now(now), ReadingStatus::Dummy, ReadingSource::Simulated);
    for metric in variant.metrics() {
        let (lo, hi) = band(variant, *metric);
        let mut value = if hi > lo { rng.gen_range(lo..hi) } else { lo };
        // the general dashboard shows one decimal, so it generates one
        if variant == Variant::General {
            value = (value * 10.0).round() / 10.0;
        }
        reading.set_metric(*metric, value);
    }
    reading
}
