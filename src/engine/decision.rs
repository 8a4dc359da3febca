//! Decision records and the power modes they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::carbon::Classification;
use crate::config::HardwareConfig;
use crate::telemetry::clamp_tdp;

/// Reason attached to a decision forced by the anti-hang boundary.
pub const REASON_TIMEOUT: &str = "timeout";
/// Reason attached to a submission that can never fit.
pub const REASON_EXCEEDS_CAPACITY: &str = "vram_exceeds_capacity";

/// Confidence of a decision forced by the anti-hang boundary.
pub const CONFIDENCE_TIMEOUT: f64 = 0.3;
/// Confidence of a cycle that found nothing to dispatch.
pub const CONFIDENCE_IDLE: f64 = 0.5;
/// Confidence of a capacity rejection; the job can never fit.
pub const CONFIDENCE_REJECT: f64 = 0.9;

/// Heuristic confidence in a dispatch, in `[0, 1]`.
///
/// Starts at 0.7, gains 0.1 each for a supplied forecast and for live
/// (non-fail-safe) telemetry, and loses 0.1 when the job takes more than 80 %
/// of the free VRAM.
pub fn dispatch_confidence(
    has_forecast: bool,
    telemetry_failsafe: bool,
    vram_req_gb: f64,
    available_vram_gb: f64,
) -> f64 {
    let mut score: f64 = 0.7;
    if has_forecast {
        score += 0.1;
    }
    if !telemetry_failsafe {
        score += 0.1;
    }
    if vram_req_gb > available_vram_gb * 0.8 {
        score -= 0.1;
    }
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Dispatch,
    Defer,
    Reject,
    Noop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Dispatch => "DISPATCH",
            Action::Defer => "DEFER",
            Action::Reject => "REJECT",
            Action::Noop => "NOOP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DISPATCH" => Some(Action::Dispatch),
            "DEFER" => Some(Action::Defer),
            "REJECT" => Some(Action::Reject),
            "NOOP" => Some(Action::Noop),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sticky power policy of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerMode {
    /// TDP held at half the nominal cap, conservative P-state.
    Efficiency,
    /// Full nominal TDP, top P-state (boost allowed).
    Performance,
}

impl PowerMode {
    /// Mode after observing `classification` while in `self`.
    ///
    /// Only the outer bands move the mode; `Moderate` keeps whatever was
    /// active so intensity hovering near a threshold cannot thrash it.
    pub fn next(self, classification: Classification) -> PowerMode {
        match classification {
            Classification::High => PowerMode::Efficiency,
            Classification::Low => PowerMode::Performance,
            Classification::Moderate => self,
        }
    }

    pub fn tdp_fraction(&self) -> f64 {
        match self {
            PowerMode::Efficiency => 0.50,
            PowerMode::Performance => 1.00,
        }
    }

    pub fn p_state(&self) -> u8 {
        match self {
            PowerMode::Efficiency => 3,
            PowerMode::Performance => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerMode::Efficiency => "Efficiency Mode",
            PowerMode::Performance => "Performance Mode (PBO)",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::Efficiency => "EFFICIENCY",
            PowerMode::Performance => "PERFORMANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EFFICIENCY" => Some(PowerMode::Efficiency),
            "PERFORMANCE" => Some(PowerMode::Performance),
            _ => None,
        }
    }

    /// Hardware settings this mode asks for.
    pub fn tuning(&self, hw: &HardwareConfig) -> PowerTuning {
        let nominal = clamp_tdp(hw.nominal_tdp_watts, hw.max_tdp_watts);
        PowerTuning {
            target_tdp_watts: clamp_tdp(nominal * self.tdp_fraction(), hw.max_tdp_watts).round(),
            p_state: self.p_state(),
        }
    }

    /// Grams of CO2 avoided over one hour by running below nominal TDP.
    pub fn carbon_saved_est_grams(&self, hw: &HardwareConfig, intensity: f64) -> f64 {
        let nominal = clamp_tdp(hw.nominal_tdp_watts, hw.max_tdp_watts);
        let reduction_watts = (nominal - self.tuning(hw).target_tdp_watts).max(0.0);
        let kwh = reduction_watts / 1000.0;
        (kwh * intensity.max(0.0) * 100.0).round() / 100.0
    }
}

impl std::fmt::Display for PowerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerTuning {
    pub target_tdp_watts: f64,
    pub p_state: u8,
}

/// What was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action: Action,
    pub task_id: Option<String>,
    pub mode: PowerMode,
    pub reason: String,
    pub tuning: PowerTuning,
}

/// Context the decision was taken in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionMetrics {
    pub carbon_saved_est_grams: f64,
    pub elapsed_ms: f64,
    pub available_vram_gb: Option<f64>,
    pub telemetry_failsafe: bool,
    #[serde(default)]
    pub confidence_score: f64,
}

/// One immutable entry of the decision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "decision")]
    pub outcome: Outcome,
    pub metrics: DecisionMetrics,
}

impl Decision {
    pub fn new(
        action: Action,
        task_id: Option<String>,
        mode: PowerMode,
        reason: impl Into<String>,
        hw: &HardwareConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            outcome: Outcome {
                action,
                task_id,
                mode,
                reason: reason.into(),
                tuning: mode.tuning(hw),
            },
            metrics: DecisionMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: DecisionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn action(&self) -> Action {
        self.outcome.action
    }

    pub fn task_id(&self) -> Option<&str> {
        self.outcome.task_id.as_deref()
    }

    pub fn mode(&self) -> PowerMode {
        self.outcome.mode
    }

    pub fn reason(&self) -> &str {
        &self.outcome.reason
    }
}
