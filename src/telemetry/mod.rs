//! Hardware telemetry validation and clamping.
//!
//! [`TelemetryMonitor::sample`] never fails. A reading that is missing,
//! malformed or outside sane bounds is replaced by the [`FallbackTable`] and
//! flagged with `is_failsafe`. Every field that leaves the monitor is clamped
//! to its physical range, whatever its origin.

pub mod fallback;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::HardwareConfig;

pub use self::fallback::FallbackTable;

/// Highest core temperature accepted as a real reading (°C).
pub const MAX_CORE_TEMP_C: f64 = 150.0;

/// A reading as reported by the hardware collaborator. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTelemetry {
    pub current_watts: Option<f64>,
    pub core_temp_c: Option<f64>,
    pub tdp_cap_watts: Option<f64>,
    pub clock_mhz: Option<f64>,
    pub vram_used_gb: Option<f64>,
}

/// Validated, clamped hardware state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub current_watts: f64,
    pub core_temp_c: f64,
    pub tdp_cap_watts: f64,
    pub clock_mhz: f64,
    pub vram_used_gb: f64,
    pub vram_total_gb: f64,
    /// Draw over cap in percent, clamped to `[0, 100]` for display.
    pub tdp_utilization_pct: f64,
    /// Unclamped draw/cap ratio from the reading, used by the engine's checks.
    pub tdp_utilization_ratio: f64,
    pub is_failsafe: bool,
}

impl TelemetrySample {
    pub fn vram_free_gb(&self) -> f64 {
        (self.vram_total_gb - self.vram_used_gb).max(0.0)
    }
}

/// Why a raw reading was refused.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryRejection {
    #[error("field `{0}` missing")]
    Missing(&'static str),

    #[error("field `{field}` is not a finite non-negative number ({value})")]
    Malformed { field: &'static str, value: f64 },

    #[error("field `{field}` = {value} exceeds bound {bound}")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        bound: f64,
    },
}

/// Clamp a TDP figure to the hardware ceiling.
pub fn clamp_tdp(watts: f64, max_tdp_watts: f64) -> f64 {
    clamp_range(watts, max_tdp_watts)
}

/// Clamp a clock figure to the hardware ceiling.
pub fn clamp_clock(mhz: f64, max_clock_mhz: f64) -> f64 {
    clamp_range(mhz, max_clock_mhz)
}

/// Clamp into `[0, max]`; NaN collapses to 0.
fn clamp_range(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.max(0.0).min(max.max(0.0))
}

struct Reading {
    current_watts: f64,
    core_temp_c: f64,
    tdp_cap_watts: f64,
    clock_mhz: f64,
    vram_used_gb: f64,
}

/// Turns raw or absent readings into samples the engine can trust.
#[derive(Debug, Clone)]
pub struct TelemetryMonitor {
    hardware: HardwareConfig,
    fallback: FallbackTable,
}

impl TelemetryMonitor {
    pub fn new(hardware: HardwareConfig, fallback: FallbackTable) -> Self {
        Self { hardware, fallback }
    }

    pub fn fallback(&self) -> &FallbackTable {
        &self.fallback
    }

    /// Produce a sample from `raw`, substituting fallback values when it is
    /// absent or invalid.
    pub fn sample(&self, raw: Option<&RawTelemetry>) -> TelemetrySample {
        match raw.map(|r| self.validate(r)) {
            Some(Ok(reading)) => self.finish(reading, false),
            Some(Err(rejection)) => {
                warn!(%rejection, "telemetry reading rejected, using fail-safe constants");
                self.failsafe()
            }
            None => {
                warn!("telemetry unavailable, using fail-safe constants");
                self.failsafe()
            }
        }
    }

    /// The fail-safe sample built purely from the fallback table.
    pub fn failsafe(&self) -> TelemetrySample {
        let fb = &self.fallback;
        self.finish(
            Reading {
                current_watts: fb.current_watts,
                core_temp_c: fb.core_temp_c,
                tdp_cap_watts: fb.tdp_cap_watts,
                clock_mhz: fb.clock_mhz(),
                vram_used_gb: fb.vram_used_gb,
            },
            true,
        )
    }

    fn validate(&self, raw: &RawTelemetry) -> Result<Reading, TelemetryRejection> {
        let current_watts = required("current_watts", raw.current_watts)?;
        let core_temp_c = required("core_temp_c", raw.core_temp_c)?;
        let tdp_cap_watts = required("tdp_cap_watts", raw.tdp_cap_watts)?;
        let vram_used_gb = required("vram_used_gb", raw.vram_used_gb)?;
        let clock_mhz = match raw.clock_mhz {
            Some(v) => finite_non_negative("clock_mhz", v)?,
            None => self.fallback.clock_mhz(),
        };

        if tdp_cap_watts == 0.0 {
            return Err(TelemetryRejection::Malformed {
                field: "tdp_cap_watts",
                value: tdp_cap_watts,
            });
        }
        within("current_watts", current_watts, tdp_cap_watts)?;
        within("core_temp_c", core_temp_c, MAX_CORE_TEMP_C)?;
        within("vram_used_gb", vram_used_gb, self.hardware.vram_total_gb)?;

        Ok(Reading {
            current_watts,
            core_temp_c,
            tdp_cap_watts,
            clock_mhz,
            vram_used_gb,
        })
    }

    fn finish(&self, r: Reading, is_failsafe: bool) -> TelemetrySample {
        let hw = &self.hardware;
        let tdp_cap_watts = clamp_tdp(r.tdp_cap_watts, hw.max_tdp_watts);
        let current_watts = clamp_range(r.current_watts, tdp_cap_watts);

        let tdp_utilization_ratio = if tdp_cap_watts > 0.0 {
            r.current_watts / tdp_cap_watts
        } else {
            0.0
        };
        let pct = (tdp_utilization_ratio * 100.0).clamp(0.0, 100.0);

        TelemetrySample {
            current_watts,
            core_temp_c: clamp_range(r.core_temp_c, MAX_CORE_TEMP_C),
            tdp_cap_watts,
            clock_mhz: clamp_clock(r.clock_mhz, hw.max_clock_mhz),
            vram_used_gb: clamp_range(r.vram_used_gb, hw.vram_total_gb),
            vram_total_gb: hw.vram_total_gb,
            tdp_utilization_pct: (pct * 10.0).round() / 10.0,
            tdp_utilization_ratio,
            is_failsafe,
        }
    }
}

fn required(field: &'static str, value: Option<f64>) -> Result<f64, TelemetryRejection> {
    let v = value.ok_or(TelemetryRejection::Missing(field))?;
    finite_non_negative(field, v)
}

fn finite_non_negative(field: &'static str, value: f64) -> Result<f64, TelemetryRejection> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(TelemetryRejection::Malformed { field, value })
    }
}

fn within(field: &'static str, value: f64, bound: f64) -> Result<(), TelemetryRejection> {
    if value > bound {
        return Err(TelemetryRejection::OutOfBounds { field, value, bound });
    }
    Ok(())
}
