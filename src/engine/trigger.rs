use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::engine::{DecisionEngine, EngineError};

/// Periodic cycle trigger.
/// Fires `run_cycle` every `period`; a tick that finds a cycle in flight is skipped.
pub async fn run_cycle_loop(engine: Arc<DecisionEngine>, period: Duration) {
    info!(period_secs = period.as_secs(), "periodic decision trigger started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match engine.run_cycle().await {
            Ok(decision) => {
                debug!(id = %decision.id, action = %decision.action(), "periodic cycle finished");
            }
            Err(EngineError::Busy) => {
                debug!("cycle already in flight, skipping tick");
            }
            Err(e) => {
                error!(error = %e, "periodic cycle failed");
            }
        }
    }
}
