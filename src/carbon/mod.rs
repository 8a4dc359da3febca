//! Grid carbon intensity analysis.
//!
//! Classification bands (gCO2/kWh): below 100 is `Low`, above 400 is `High`,
//! everything in between (both ends inclusive) is `Moderate`. Inputs are not
//! range-checked here; any number is classified by the same rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Below this intensity the grid is considered clean.
pub const CARBON_LOW_THRESHOLD: f64 = 100.0;
/// Above this intensity the grid is considered dirty.
pub const CARBON_HIGH_THRESHOLD: f64 = 400.0;

/// Operating band of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Low,
    Moderate,
    High,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Low => "LOW",
            Classification::Moderate => "MODERATE",
            Classification::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonReading {
    pub timestamp: DateTime<Utc>,
    pub intensity: f64,
}

/// Short-horizon intensity forecast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarbonForecast {
    pub readings: Vec<CarbonReading>,
}

impl CarbonForecast {
    pub fn new(readings: Vec<CarbonReading>) -> Self {
        Self { readings }
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Lowest forecast point; the earliest one wins a tie.
    pub fn minimum(&self) -> Option<&CarbonReading> {
        self.readings.iter().fold(None, |best, r| match best {
            Some(b) if b.intensity <= r.intensity => Some(b),
            _ => Some(r),
        })
    }

    pub fn average(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        let sum: f64 = self.readings.iter().map(|r| r.intensity).sum();
        Some(sum / self.readings.len() as f64)
    }
}

/// What a carbon sensor reports: the live intensity plus its forecast window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarbonReport {
    pub current: f64,
    #[serde(default)]
    pub forecast: Vec<CarbonReading>,
}

impl CarbonReport {
    pub fn analyze(&self) -> CarbonSample {
        analyze(self.current, &CarbonForecast::new(self.forecast.clone()))
    }
}

/// Classified carbon state for one decision cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSample {
    pub current_intensity: f64,
    pub forecast_min: f64,
    pub forecast_avg: f64,
    /// When the forecast minimum occurs, if a forecast was supplied.
    pub forecast_min_time: Option<DateTime<Utc>>,
    pub classification: Classification,
    /// `current_intensity - forecast_avg`, signed.
    pub delta: f64,
}

/// Classify an intensity into its operating band.
pub fn classify_intensity(intensity: f64) -> Classification {
    if intensity < CARBON_LOW_THRESHOLD {
        Classification::Low
    } else if intensity > CARBON_HIGH_THRESHOLD {
        Classification::High
    } else {
        Classification::Moderate
    }
}

/// Build a sample from an intensity and pre-computed forecast statistics.
pub fn classify(current: f64, forecast_min: f64, forecast_avg: f64) -> CarbonSample {
    CarbonSample {
        current_intensity: current,
        forecast_min,
        forecast_avg,
        forecast_min_time: None,
        classification: classify_intensity(current),
        delta: current - forecast_avg,
    }
}

/// Build a sample from an intensity and a forecast window.
///
/// With no forecast points, both statistics collapse to `current`.
pub fn analyze(current: f64, forecast: &CarbonForecast) -> CarbonSample {
    let min_reading = forecast.minimum();
    let forecast_min = min_reading.map(|r| r.intensity).unwrap_or(current);
    let forecast_avg = forecast.average().unwrap_or(current);

    let mut sample = classify(current, forecast_min, forecast_avg);
    sample.forecast_min_time = min_reading.map(|r| r.timestamp);
    sample
}
