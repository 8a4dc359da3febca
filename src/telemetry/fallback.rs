//! Fail-safe constants substituted when a sensor is missing or lying.
//!
//! The values are conservative Zen 4 / Instinct defaults. They are data, not
//! code: the table is loaded from the `[fallback]` config section and handed to
//! the monitor and the engine, so tests can swap it freely.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTable {
    /// TDP cap assumed when none can be read (W).
    pub tdp_cap_watts: f64,
    /// Power draw assumed when none can be read (W).
    pub current_watts: f64,
    /// Core frequency recorded for diagnostics (GHz).
    pub freq_ghz: f64,
    /// Nominal safe core temperature (°C).
    pub core_temp_c: f64,
    /// Accelerator memory in use (GB).
    pub vram_used_gb: f64,
    /// Grid intensity assumed when no carbon reading exists (gCO2/kWh).
    pub carbon_intensity_gco2: f64,
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self {
            tdp_cap_watts: 120.0,
            current_watts: 120.0,
            freq_ghz: 2.0,
            core_temp_c: 65.0,
            vram_used_gb: 0.0,
            carbon_intensity_gco2: 200.0,
        }
    }
}

impl FallbackTable {
    pub fn clock_mhz(&self) -> f64 {
        self.freq_ghz * 1000.0
    }
}
