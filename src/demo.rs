//! Demo workload: five GPU jobs, a six-hour forecast and one telemetry reading.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::api::state::AppState;
use crate::carbon::{CarbonReading, CarbonReport};
use crate::config::AppConfig;
use crate::engine::{Decision, EngineError};
use crate::queue::JobRequest;
use crate::storage::MemoryDecisionLog;
use crate::telemetry::RawTelemetry;

/// Current grid intensity used by the seed (gCO2/kWh).
pub const SEED_INTENSITY: f64 = 345.0;

/// Forecast intensities, one every 30 minutes.
pub const SEED_FORECAST: [f64; 12] = [
    320.0, 280.0, 210.0, 150.0, 90.0, 130.0, 180.0, 250.0, 310.0, 350.0, 290.0, 220.0,
];

pub fn carbon_report(now: DateTime<Utc>) -> CarbonReport {
    carbon_report_at(SEED_INTENSITY, now)
}

fn carbon_report_at(current: f64, now: DateTime<Utc>) -> CarbonReport {
    let forecast = SEED_FORECAST
        .iter()
        .enumerate()
        .map(|(i, &intensity)| CarbonReading {
            timestamp: now + Duration::minutes(30 * i as i64),
            intensity,
        })
        .collect();
    CarbonReport { current, forecast }
}

pub fn telemetry() -> RawTelemetry {
    RawTelemetry {
        current_watts: Some(285.0),
        core_temp_c: Some(72.0),
        tdp_cap_watts: Some(400.0),
        clock_mhz: Some(1980.0),
        vram_used_gb: Some(64.0),
    }
}

pub fn jobs(now: DateTime<Utc>) -> Vec<JobRequest> {
    [
        ("LLM-TRAIN-7B", 1, 80.0, 4),
        ("IMG-INFER-BATCH", 2, 24.0, 1),
        ("RAG-INDEX-REBUILD", 3, 16.0, 6),
        ("FINE-TUNE-13B", 4, 120.0, 8),
        ("EMBEDDINGS-GEN", 5, 8.0, 2),
    ]
    .into_iter()
    .map(|(task_id, priority, vram_req_gb, hours)| JobRequest {
        task_id: task_id.to_string(),
        priority,
        vram_req_gb,
        deadline: now + Duration::hours(hours),
    })
    .collect()
}

/// Push the seed readings and submit the seed jobs.
pub async fn seed(state: &AppState) -> Result<()> {
    let now = Utc::now();
    state.carbon_feed.push(carbon_report(now)).await;
    state.telemetry_feed.push(telemetry()).await;

    for request in jobs(now) {
        let task_id = request.task_id.clone();
        match state.engine.submit_job(request).await {
            Ok(_) => {}
            Err(EngineError::Queue(crate::queue::QueueError::Duplicate(_))) => {
                info!(%task_id, "seed job already queued");
            }
            Err(e) => return Err(e).with_context(|| format!("failed to seed job {task_id}")),
        }
    }
    info!("demo data seeded");
    Ok(())
}

/// Seed an in-memory engine and run `cycles` decision cycles, replaying the
/// forecast as the live intensity so the mode moves through its bands.
pub async fn run(config: &AppConfig, cycles: usize) -> Result<Vec<Decision>> {
    let state = AppState::new(config, Arc::new(MemoryDecisionLog::default()));
    seed(&state).await?;

    let now = Utc::now();
    let mut decisions = Vec::with_capacity(cycles);
    for i in 0..cycles {
        let current = if i == 0 {
            SEED_INTENSITY
        } else {
            SEED_FORECAST[(i - 1) % SEED_FORECAST.len()]
        };
        state.carbon_feed.push(carbon_report_at(current, now)).await;
        decisions.push(state.engine.run_cycle().await?);
    }
    Ok(decisions)
}
