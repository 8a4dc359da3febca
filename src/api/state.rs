use std::sync::Arc;

use crate::carbon::CarbonReport;
use crate::config::AppConfig;
use crate::engine::DecisionEngine;
use crate::sensor::ManualSensor;
use crate::storage::DecisionLog;
use crate::telemetry::RawTelemetry;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DecisionEngine>,
    /// Readings pushed via `POST /carbon`.
    pub carbon_feed: Arc<ManualSensor<CarbonReport>>,
    /// Readings pushed via `POST /telemetry`.
    pub telemetry_feed: Arc<ManualSensor<RawTelemetry>>,
}

impl AppState {
    /// Wire an engine to push-fed sensors.
    pub fn new(config: &AppConfig, log: Arc<dyn DecisionLog>) -> Self {
        let carbon_feed: Arc<ManualSensor<CarbonReport>> = Arc::new(ManualSensor::new("carbon"));
        let telemetry_feed: Arc<ManualSensor<RawTelemetry>> = Arc::new(ManualSensor::new("telemetry"));
        let engine = Arc::new(DecisionEngine::new(
            config,
            carbon_feed.clone(),
            telemetry_feed.clone(),
            log,
        ));
        Self {
            engine,
            carbon_feed,
            telemetry_feed,
        }
    }
}
