//! Process-wide scheduler state owned by the engine.

use std::time::Duration;

use tokio::time::Instant;

use crate::carbon::{self, CarbonSample};
use crate::engine::decision::PowerMode;
use crate::queue::JobQueue;
use crate::telemetry::{TelemetryMonitor, TelemetrySample};

/// A sample plus the moment it was taken.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub value: T,
    pub at: Instant,
}

impl<T> Stamped<T> {
    pub fn now(value: T) -> Self {
        Self {
            value,
            at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.at.elapsed() <= max_age
    }
}

/// Inputs gathered during SAMPLING.
#[derive(Debug, Clone)]
pub struct Observation {
    pub carbon: CarbonSample,
    /// The carbon sample came from the source this cycle.
    pub carbon_fresh: bool,
    pub telemetry: TelemetrySample,
    /// The telemetry sample came from the source this cycle (it may still be
    /// fail-safe if the reading was invalid).
    pub telemetry_fresh: bool,
}

/// Queue, active power mode and the latest inputs.
///
/// Mutated only by the engine: by a cycle under the cycle guard, or by job
/// submission and removal.
#[derive(Debug)]
pub struct SchedulerState {
    pub queue: JobQueue,
    pub mode: PowerMode,
    /// Samples the most recent cycle decided on.
    pub carbon: CarbonSample,
    pub telemetry: TelemetrySample,
    last_valid_carbon: Option<Stamped<CarbonSample>>,
    last_valid_telemetry: Option<Stamped<TelemetrySample>>,
}

impl SchedulerState {
    /// Fresh state: empty queue, `Efficiency` mode, fallback-derived inputs.
    pub fn new(monitor: &TelemetryMonitor) -> Self {
        let telemetry = monitor.failsafe();
        let carbon = carbon::analyze(
            monitor.fallback().carbon_intensity_gco2,
            &carbon::CarbonForecast::default(),
        );
        Self {
            queue: JobQueue::new(telemetry.vram_total_gb),
            mode: PowerMode::Efficiency,
            carbon,
            telemetry,
            last_valid_carbon: None,
            last_valid_telemetry: None,
        }
    }

    pub fn last_valid_carbon(&self, max_age: Duration) -> Option<&CarbonSample> {
        self.last_valid_carbon
            .as_ref()
            .filter(|s| s.is_fresh(max_age))
            .map(|s| &s.value)
    }

    pub fn last_valid_telemetry(&self, max_age: Duration) -> Option<&TelemetrySample> {
        self.last_valid_telemetry
            .as_ref()
            .filter(|s| s.is_fresh(max_age))
            .map(|s| &s.value)
    }

    /// Adopt this cycle's inputs; only fresh, non-fail-safe ones become the
    /// new last-known-valid samples.
    pub fn observe(&mut self, obs: &Observation) {
        if obs.carbon_fresh {
            self.last_valid_carbon = Some(Stamped::now(obs.carbon.clone()));
        }
        if obs.telemetry_fresh && !obs.telemetry.is_failsafe {
            self.last_valid_telemetry = Some(Stamped::now(obs.telemetry.clone()));
        }
        self.carbon = obs.carbon.clone();
        self.telemetry = obs.telemetry.clone();
    }

    /// Apply mode hysteresis for the current carbon classification.
    pub fn update_mode(&mut self) -> PowerMode {
        self.mode = self.mode.next(self.carbon.classification);
        self.mode
    }

    /// VRAM headroom for new work.
    ///
    /// Telemetry may lag behind dispatches, so the headroom is also capped by
    /// what dispatched jobs have already reserved.
    pub fn available_vram_gb(&self) -> f64 {
        let total = self.telemetry.vram_total_gb;
        let observed = total - self.telemetry.vram_used_gb;
        let unreserved = total - self.queue.reserved_vram_gb();
        observed.min(unreserved).max(0.0)
    }
}
