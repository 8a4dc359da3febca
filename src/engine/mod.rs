//! Carbon-aware decision engine.
//!
//! One cycle runs `SAMPLING -> CLASSIFYING -> SELECTING -> (DISPATCHING | NOOP)
//! -> LOGGING` under a cycle guard, bounded by a wall-clock budget. A cycle
//! that overruns the budget aborts to a `DEFER` and leaves the queue as it was.

pub mod decision;
pub mod history;
pub mod state;
pub mod trigger;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::time::{error::Elapsed, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::carbon::{self, CarbonForecast, CarbonReport, CarbonSample};
use crate::config::{AppConfig, BusyPolicy, EngineConfig, HardwareConfig};
use crate::queue::{Job, JobRequest, QueueError};
use crate::sensor::{CarbonSource, SourceError, TelemetrySource};
use crate::storage::DecisionLog;
use crate::telemetry::{RawTelemetry, TelemetryMonitor, TelemetrySample};

pub use self::decision::{
    dispatch_confidence, Action, Decision, DecisionMetrics, Outcome, PowerMode, PowerTuning,
    CONFIDENCE_IDLE, CONFIDENCE_REJECT, CONFIDENCE_TIMEOUT, REASON_EXCEEDS_CAPACITY,
    REASON_TIMEOUT,
};
pub use self::history::DecisionHistory;
pub use self::state::{Observation, SchedulerState};
pub use self::trigger::run_cycle_loop;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("a decision cycle is already running")]
    Busy,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Read-only view of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub total_jobs: usize,
    pub queued: usize,
    pub reserved_vram_gb: f64,
    pub jobs: Vec<Job>,
}

/// Read-only view of the scheduler state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: PowerMode,
    pub mode_label: &'static str,
    pub tuning: PowerTuning,
    pub carbon: CarbonSample,
    pub telemetry: TelemetrySample,
    pub available_vram_gb: f64,
    pub queue: QueueSnapshot,
    pub decisions_made: usize,
    pub last_decision: Option<Decision>,
}

/// Cycle wall-clock budget.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started + budget,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

pub struct DecisionEngine {
    hardware: HardwareConfig,
    settings: EngineConfig,
    monitor: TelemetryMonitor,
    carbon_source: Arc<CarbonSource>,
    telemetry_source: Arc<TelemetrySource>,
    state: RwLock<SchedulerState>,
    cycle_guard: Mutex<PowerMode>,
    history: DecisionHistory,
}

impl DecisionEngine {
    pub fn new(
        config: &AppConfig,
        carbon_source: Arc<CarbonSource>,
        telemetry_source: Arc<TelemetrySource>,
        log: Arc<dyn DecisionLog>,
    ) -> Self {
        let monitor = TelemetryMonitor::new(config.hardware.clone(), config.fallback.clone());
        let state = SchedulerState::new(&monitor);
        let mode = state.mode;
        Self {
            hardware: config.hardware.clone(),
            settings: config.engine.clone(),
            monitor,
            carbon_source,
            telemetry_source,
            state: RwLock::new(state),
            cycle_guard: Mutex::new(mode),
            history: DecisionHistory::new(log, config.engine.history_retention),
        }
    }

    pub fn hardware(&self) -> &HardwareConfig {
        &self.hardware
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.settings.decision_timeout_ms)
    }

    fn sensor_budget(&self) -> Duration {
        Duration::from_millis(self.settings.sensor_timeout_ms)
    }

    fn sample_max_age(&self) -> Duration {
        Duration::from_secs(self.settings.sample_max_age_secs)
    }

    /// The guard holds the mode adopted by the latest cycle.
    async fn acquire_cycle(&self) -> Result<MutexGuard<'_, PowerMode>, EngineError> {
        match self.settings.busy_policy {
            BusyPolicy::Reject => self.cycle_guard.try_lock().map_err(|_| EngineError::Busy),
            BusyPolicy::Wait => Ok(self.cycle_guard.lock().await),
        }
    }

    /// Run one decision cycle.
    ///
    /// Never dispatches the same job twice: cycles are mutually exclusive and
    /// selection plus the status transition happen under one state lock.
    /// Returns [`EngineError::Busy`] when another cycle holds the guard and
    /// the busy policy is `reject`.
    pub async fn run_cycle(&self) -> Result<Decision, EngineError> {
        let mut cycle = self.acquire_cycle().await?;
        let deadline = Deadline::start(self.budget());

        // SAMPLING
        let (carbon_read, telemetry_read) = self.read_sources(deadline).await;
        let mut state = match timeout_at(deadline.at, self.state.write()).await {
            Ok(state) => state,
            Err(_) => return Ok(self.defer(*cycle, deadline, None, None).await),
        };
        let obs = self.resolve(carbon_read, telemetry_read, &state);
        debug!(elapsed_ms = deadline.elapsed_ms(), "sampling done");
        if deadline.expired() {
            drop(state);
            return Ok(self.defer(*cycle, deadline, None, Some(&obs)).await);
        }

        // CLASSIFYING
        state.observe(&obs);
        let previous = state.mode;
        let mode = state.update_mode();
        *cycle = mode;
        let classification = state.carbon.classification;
        if mode != previous {
            info!(from = %previous, to = %mode, %classification, "power mode changed");
        }
        if state.telemetry.tdp_utilization_ratio > 1.0 {
            warn!(
                ratio = state.telemetry.tdp_utilization_ratio,
                "power draw above the reported TDP cap"
            );
        }
        debug!(elapsed_ms = deadline.elapsed_ms(), %classification, "classified");
        if deadline.expired() {
            drop(state);
            return Ok(self.defer(mode, deadline, None, Some(&obs)).await);
        }

        // SELECTING
        let available = state.available_vram_gb();
        let candidate = state
            .queue
            .feasible_candidates(available)
            .first()
            .map(|job| (job.task_id.clone(), job.vram_req_gb));

        // DISPATCHING | NOOP
        let (action, task_id, reason, confidence) = match candidate {
            Some((task_id, vram_req_gb)) => {
                if deadline.expired() {
                    drop(state);
                    return Ok(self.defer(mode, deadline, Some(task_id), Some(&obs)).await);
                }
                state.queue.mark_dispatched(&task_id)?;
                let confidence = dispatch_confidence(
                    obs.carbon.forecast_min_time.is_some(),
                    obs.telemetry.is_failsafe,
                    vram_req_gb,
                    available,
                );
                (Action::Dispatch, Some(task_id), classification.to_string(), confidence)
            }
            None => {
                let reason = if state.queue.queued_count() == 0 {
                    format!("{classification}: queue empty")
                } else {
                    format!("{classification}: no job fits {available:.1} GB")
                };
                (Action::Noop, None, reason, CONFIDENCE_IDLE)
            }
        };
        drop(state);

        // LOGGING
        let metrics = DecisionMetrics {
            carbon_saved_est_grams: mode
                .carbon_saved_est_grams(&self.hardware, obs.carbon.current_intensity),
            elapsed_ms: deadline.elapsed_ms(),
            available_vram_gb: Some(available),
            telemetry_failsafe: obs.telemetry.is_failsafe,
            confidence_score: confidence,
        };
        let decision = Decision::new(action, task_id, mode, reason, &self.hardware)
            .with_metrics(metrics);
        let decision = self.history.record(decision).await;

        info!(
            id = %decision.id,
            action = %decision.action(),
            task_id = decision.task_id().unwrap_or("-"),
            mode = %decision.mode(),
            reason = decision.reason(),
            confidence = decision.metrics.confidence_score,
            "decision"
        );
        Ok(decision)
    }

    /// Abort the cycle with a `DEFER`. Any selected candidate stays `QUEUED`.
    async fn defer(
        &self,
        mode: PowerMode,
        deadline: Deadline,
        task_id: Option<String>,
        obs: Option<&Observation>,
    ) -> Decision {
        let metrics = DecisionMetrics {
            carbon_saved_est_grams: obs
                .map(|o| mode.carbon_saved_est_grams(&self.hardware, o.carbon.current_intensity))
                .unwrap_or(0.0),
            elapsed_ms: deadline.elapsed_ms(),
            available_vram_gb: None,
            telemetry_failsafe: obs.map(|o| o.telemetry.is_failsafe).unwrap_or(false),
            confidence_score: CONFIDENCE_TIMEOUT,
        };
        let decision = Decision::new(Action::Defer, task_id, mode, REASON_TIMEOUT, &self.hardware)
            .with_metrics(metrics);
        let decision = self.history.record(decision).await;

        warn!(
            id = %decision.id,
            elapsed_ms = decision.metrics.elapsed_ms,
            budget_ms = self.settings.decision_timeout_ms,
            candidate = decision.task_id().unwrap_or("-"),
            "decision cycle exceeded its budget, deferring"
        );
        decision
    }

    /// Read both sources concurrently. Each read is bounded by the sensor
    /// budget and never outlives the cycle deadline.
    async fn read_sources(&self, deadline: Deadline) -> (Option<CarbonReport>, Option<RawTelemetry>) {
        let cutoff = (Instant::now() + self.sensor_budget()).min(deadline.at);
        let (carbon_read, telemetry_read) = tokio::join!(
            timeout_at(cutoff, self.carbon_source.read()),
            timeout_at(cutoff, self.telemetry_source.read()),
        );
        (
            settle("carbon", carbon_read),
            settle("telemetry", telemetry_read),
        )
    }

    /// Turn this cycle's readings into an observation, standing in the
    /// last-known-valid sample or the fallback table for a missing source.
    fn resolve(
        &self,
        carbon_read: Option<CarbonReport>,
        telemetry_read: Option<RawTelemetry>,
        state: &SchedulerState,
    ) -> Observation {
        let max_age = self.sample_max_age();

        let (carbon, carbon_fresh) = match carbon_read {
            Some(report) if report.current.is_finite() && report.current >= 0.0 => {
                (report.analyze(), true)
            }
            Some(report) => {
                warn!(current = report.current, "carbon reading rejected, using fallback intensity");
                (self.fallback_carbon(), false)
            }
            None => match state.last_valid_carbon(max_age) {
                Some(last) => (last.clone(), false),
                None => {
                    warn!("no recent carbon sample, using fallback intensity");
                    (self.fallback_carbon(), false)
                }
            },
        };

        let (telemetry, telemetry_fresh) = match telemetry_read {
            Some(raw) => (self.monitor.sample(Some(&raw)), true),
            None => match state.last_valid_telemetry(max_age) {
                Some(last) => (last.clone(), false),
                None => (self.monitor.sample(None), false),
            },
        };

        Observation {
            carbon,
            carbon_fresh,
            telemetry,
            telemetry_fresh,
        }
    }

    fn fallback_carbon(&self) -> CarbonSample {
        carbon::analyze(
            self.monitor.fallback().carbon_intensity_gco2,
            &CarbonForecast::default(),
        )
    }

    /// Validate and enqueue a job.
    ///
    /// A job that could never fit the node is refused and recorded as a
    /// `REJECT` decision; other refusals leave no trace in the history.
    pub async fn submit_job(&self, request: JobRequest) -> Result<Job, EngineError> {
        let job = request.into_job()?;
        let mut state = self.state.write().await;

        match state.queue.submit(job.clone()) {
            Ok(()) => {
                info!(
                    task_id = %job.task_id,
                    priority = job.priority,
                    vram_req_gb = job.vram_req_gb,
                    "job queued"
                );
                Ok(job)
            }
            Err(e @ QueueError::ExceedsCapacity { .. }) => {
                let mode = state.mode;
                drop(state);
                let decision = Decision::new(
                    Action::Reject,
                    Some(job.task_id.clone()),
                    mode,
                    REASON_EXCEEDS_CAPACITY,
                    &self.hardware,
                )
                .with_metrics(DecisionMetrics {
                    confidence_score: CONFIDENCE_REJECT,
                    ..DecisionMetrics::default()
                });
                let decision = self.history.record(decision).await;
                warn!(id = %decision.id, task_id = %job.task_id, error = %e, "job rejected");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a queued job or retire a dispatched one, releasing its VRAM.
    pub async fn remove_job(&self, task_id: &str) -> Result<Job, EngineError> {
        let job = self.state.write().await.queue.remove(task_id)?;
        info!(task_id = %job.task_id, status = %job.status, "job removed");
        Ok(job)
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        let state = self.state.read().await;
        let queue = QueueSnapshot {
            total_jobs: state.queue.len(),
            queued: state.queue.queued_count(),
            reserved_vram_gb: state.queue.reserved_vram_gb(),
            jobs: state.queue.list().to_vec(),
        };
        let snapshot = StatusSnapshot {
            mode: state.mode,
            mode_label: state.mode.label(),
            tuning: state.mode.tuning(&self.hardware),
            carbon: state.carbon.clone(),
            telemetry: state.telemetry.clone(),
            available_vram_gb: state.available_vram_gb(),
            queue,
            decisions_made: 0,
            last_decision: None,
        };
        drop(state);

        StatusSnapshot {
            decisions_made: self.history.recorded().await,
            last_decision: self.history.last().await,
            ..snapshot
        }
    }

    /// Decisions oldest first; with `limit`, only the newest `limit`.
    pub async fn get_history(&self, limit: Option<usize>) -> Vec<Decision> {
        self.history.entries(limit).await
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.read().await.queue.list().to_vec()
    }
}

fn settle<T>(source: &'static str, read: Result<Result<T, SourceError>, Elapsed>) -> Option<T> {
    match read {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e @ SourceError::NoReading(_))) => {
            debug!(source, error = %e, "sensor has no reading");
            None
        }
        Ok(Err(e)) => {
            warn!(source, error = %e, "sensor read failed");
            None
        }
        Err(_) => {
            warn!(source, "sensor read timed out");
            None
        }
    }
}
