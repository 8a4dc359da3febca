//! Decision engine scenarios: VRAM safety, dispatch exclusivity, tie-breaks,
//! hung sensors, fail-safe sampling and mode hysteresis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use antigravity::carbon::CarbonReport;
use antigravity::config::{AppConfig, BusyPolicy};
use antigravity::engine::{Action, DecisionEngine, EngineError, PowerMode};
use antigravity::queue::{JobRequest, JobStatus};
use antigravity::sensor::{ManualSensor, Sensor, SourceError};
use antigravity::storage::MemoryDecisionLog;
use antigravity::telemetry::RawTelemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Serves a fixed reading after a delay.
struct SlowSensor<T> {
    reading: T,
    delay: Duration,
}

impl<T> SlowSensor<T> {
    fn new(reading: T, delay: Duration) -> Self {
        Self { reading, delay }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Sensor<T> for SlowSensor<T> {
    async fn read(&self) -> Result<T, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reading.clone())
    }
}

/// Serves a fixed reading until `hung` is set, then never answers.
struct HangingSensor<T> {
    reading: T,
    hung: AtomicBool,
}

impl<T> HangingSensor<T> {
    fn new(reading: T) -> Self {
        Self {
            reading,
            hung: AtomicBool::new(false),
        }
    }

    fn hang(&self) {
        self.hung.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Sensor<T> for HangingSensor<T> {
    async fn read(&self) -> Result<T, SourceError> {
        if self.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.reading.clone())
    }
}

struct Node {
    engine: Arc<DecisionEngine>,
    carbon: Arc<ManualSensor<CarbonReport>>,
    telemetry: Arc<ManualSensor<RawTelemetry>>,
    log: Arc<MemoryDecisionLog>,
}

fn node_with(config: AppConfig) -> Node {
    let carbon: Arc<ManualSensor<CarbonReport>> = Arc::new(ManualSensor::new("carbon"));
    let telemetry: Arc<ManualSensor<RawTelemetry>> = Arc::new(ManualSensor::new("telemetry"));
    let log = Arc::new(MemoryDecisionLog::default());
    let engine = Arc::new(DecisionEngine::new(
        &config,
        carbon.clone(),
        telemetry.clone(),
        log.clone(),
    ));
    Node {
        engine,
        carbon,
        telemetry,
        log,
    }
}

fn node() -> Node {
    node_with(AppConfig::default())
}

fn used(vram_used_gb: f64) -> RawTelemetry {
    RawTelemetry {
        current_watts: Some(285.0),
        core_temp_c: Some(72.0),
        tdp_cap_watts: Some(400.0),
        clock_mhz: Some(1980.0),
        vram_used_gb: Some(vram_used_gb),
    }
}

fn grid(current: f64) -> CarbonReport {
    CarbonReport {
        current,
        forecast: vec![],
    }
}

fn job(task_id: &str, priority: i32, vram_req_gb: f64, deadline: DateTime<Utc>) -> JobRequest {
    JobRequest {
        task_id: task_id.to_string(),
        priority,
        vram_req_gb,
        deadline,
    }
}

fn in_one_hour() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::hours(1)
}

async fn status_of(engine: &DecisionEngine, task_id: &str) -> JobStatus {
    engine
        .jobs()
        .await
        .into_iter()
        .find(|j| j.task_id == task_id)
        .map(|j| j.status)
        .unwrap()
}

#[tokio::test]
async fn scenario_noop_until_vram_frees_then_dispatch_a() {
    let n = node();
    let deadline = in_one_hour();
    n.carbon.push(grid(250.0)).await;
    n.engine.submit_job(job("A", 1, 100.0, deadline)).await.unwrap();
    n.engine.submit_job(job("B", 2, 50.0, deadline)).await.unwrap();

    // 192 - 150 = 42 GB: neither job fits.
    n.telemetry.push(used(150.0)).await;
    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.action(), Action::Noop);
    assert!(d.task_id().is_none());
    assert_eq!(status_of(&n.engine, "A").await, JobStatus::Queued);
    assert_eq!(status_of(&n.engine, "B").await, JobStatus::Queued);

    // 192 - 50 = 142 GB: both fit, priority picks A.
    n.telemetry.push(used(50.0)).await;
    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.action(), Action::Dispatch);
    assert_eq!(d.task_id(), Some("A"));
    assert_eq!(status_of(&n.engine, "A").await, JobStatus::Dispatched);
    assert_eq!(status_of(&n.engine, "B").await, JobStatus::Queued);
}

#[tokio::test]
async fn exact_fit_is_feasible() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    n.telemetry.push(used(92.0)).await;
    n.engine.submit_job(job("EXACT", 1, 100.0, in_one_hour())).await.unwrap();

    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.action(), Action::Dispatch);
    assert_eq!(d.task_id(), Some("EXACT"));
}

#[tokio::test]
async fn tie_break_is_lexical_and_reproducible() {
    for _ in 0..5 {
        let n = node();
        let deadline = in_one_hour();
        n.carbon.push(grid(250.0)).await;
        n.telemetry.push(used(0.0)).await;
        for id in ["job-c", "job-a", "job-b"] {
            n.engine.submit_job(job(id, 3, 10.0, deadline)).await.unwrap();
        }

        let order: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let d = n.engine.run_cycle().await.unwrap();
                out.push(d.task_id().unwrap().to_string());
            }
            out
        };
        assert_eq!(order, vec!["job-a", "job-b", "job-c"]);
    }
}

#[tokio::test]
async fn earlier_deadline_breaks_priority_tie() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    n.telemetry.push(used(0.0)).await;
    let now = Utc::now();
    n.engine
        .submit_job(job("a-late", 1, 10.0, now + chrono::Duration::hours(5)))
        .await
        .unwrap();
    n.engine
        .submit_job(job("z-soon", 1, 10.0, now + chrono::Duration::hours(1)))
        .await
        .unwrap();

    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.task_id(), Some("z-soon"));
}

#[tokio::test]
async fn larger_urgent_job_does_not_block_smaller_fit() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    n.telemetry.push(used(150.0)).await;
    let deadline = in_one_hour();
    n.engine.submit_job(job("BIG", 1, 100.0, deadline)).await.unwrap();
    n.engine.submit_job(job("SMALL", 9, 40.0, deadline)).await.unwrap();

    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.task_id(), Some("SMALL"));
    assert_eq!(status_of(&n.engine, "BIG").await, JobStatus::Queued);
}

#[tokio::test]
async fn vram_safety_holds_across_cycles() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    // Telemetry never catches up with the dispatched allocations.
    n.telemetry.push(used(0.0)).await;

    let deadline = in_one_hour();
    let sizes = [70.0, 64.0, 50.0, 33.0, 20.0, 12.5, 8.0, 8.0, 4.0, 1.0];
    for (i, size) in sizes.iter().enumerate() {
        n.engine
            .submit_job(job(&format!("J{i:02}"), (i % 3) as i32, *size, deadline))
            .await
            .unwrap();
    }

    for _ in 0..sizes.len() + 2 {
        n.engine.run_cycle().await.unwrap();
        let status = n.engine.get_status().await;
        let dispatched: f64 = status
            .queue
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Dispatched)
            .map(|j| j.vram_req_gb)
            .sum();
        assert!(dispatched <= 192.0, "dispatched {dispatched} GB exceeds capacity");
    }

    let last = n.engine.get_history(Some(1)).await;
    assert_eq!(last[0].action(), Action::Noop);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_never_double_dispatch() {
    for policy in [BusyPolicy::Wait, BusyPolicy::Reject] {
        let mut config = AppConfig::default();
        config.engine.busy_policy = policy;
        let n = node_with(config);
        n.carbon.push(grid(250.0)).await;
        n.telemetry.push(used(0.0)).await;

        let deadline = in_one_hour();
        for id in ["A", "B", "C"] {
            n.engine.submit_job(job(id, 1, 60.0, deadline)).await.unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = n.engine.clone();
                tokio::spawn(async move { engine.run_cycle().await })
            })
            .collect();
        let results = futures::future::join_all(handles).await;

        for r in &results {
            match r.as_ref().unwrap() {
                Ok(_) => {}
                Err(EngineError::Busy) => assert_eq!(policy, BusyPolicy::Reject),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let mut dispatches: HashMap<String, usize> = HashMap::new();
        for d in n.engine.get_history(None).await {
            if d.action() == Action::Dispatch {
                *dispatches.entry(d.task_id().unwrap().to_string()).or_default() += 1;
            }
        }
        assert!(dispatches.values().all(|&c| c == 1), "{dispatches:?}");
        if policy == BusyPolicy::Wait {
            assert_eq!(dispatches.len(), 3);
        }
    }
}

#[tokio::test]
async fn busy_reject_while_cycle_in_flight() {
    let mut config = AppConfig::default();
    config.engine.decision_timeout_ms = 5_000;
    config.engine.sensor_timeout_ms = 4_000;
    let carbon = Arc::new(SlowSensor::new(grid(250.0), Duration::from_millis(300)));
    let engine = Arc::new(DecisionEngine::new(
        &config,
        carbon,
        Arc::new(ManualSensor::with_reading("telemetry", used(0.0))),
        Arc::new(MemoryDecisionLog::default()),
    ));

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(engine.run_cycle().await.unwrap_err(), EngineError::Busy);
    assert_eq!(first.await.unwrap().unwrap().action(), Action::Noop);
    assert_eq!(engine.get_history(None).await.len(), 1);
}

#[tokio::test]
async fn hung_telemetry_falls_back_to_last_valid_sample() {
    let telemetry = Arc::new(HangingSensor::new(used(0.0)));
    let log = Arc::new(MemoryDecisionLog::default());
    let engine = DecisionEngine::new(
        &AppConfig::default(),
        Arc::new(ManualSensor::with_reading("carbon", grid(250.0))),
        telemetry.clone(),
        log.clone(),
    );

    // Warm-up stores a valid telemetry sample.
    assert_eq!(engine.run_cycle().await.unwrap().action(), Action::Noop);

    engine.submit_job(job("A", 1, 10.0, in_one_hour())).await.unwrap();
    telemetry.hang();

    let started = std::time::Instant::now();
    let d = engine.run_cycle().await.unwrap();
    let took = started.elapsed();

    assert_eq!(d.action(), Action::Dispatch);
    assert_eq!(d.task_id(), Some("A"));
    assert!(!d.metrics.telemetry_failsafe);
    assert!(took < Duration::from_millis(250), "cycle ran {took:?}");
    assert_eq!(status_of(&engine, "A").await, JobStatus::Dispatched);

    // Still hung: later cycles keep deciding instead of deferring.
    for _ in 0..3 {
        assert_ne!(engine.run_cycle().await.unwrap().action(), Action::Defer);
    }
    assert_eq!(log.entries().await.len(), 5);
}

#[tokio::test]
async fn hung_sources_without_history_use_fallback_table() {
    let carbon = Arc::new(HangingSensor::new(grid(50.0)));
    let telemetry = Arc::new(HangingSensor::new(used(0.0)));
    carbon.hang();
    telemetry.hang();
    let engine = DecisionEngine::new(
        &AppConfig::default(),
        carbon,
        telemetry,
        Arc::new(MemoryDecisionLog::default()),
    );
    engine.submit_job(job("A", 1, 10.0, in_one_hour())).await.unwrap();

    let d = engine.run_cycle().await.unwrap();
    assert_eq!(d.action(), Action::Dispatch);
    assert_eq!(d.reason(), "MODERATE");
    assert!(d.metrics.telemetry_failsafe);

    let status = engine.get_status().await;
    assert_eq!(status.carbon.current_intensity, 200.0);
    assert!(status.telemetry.is_failsafe);
}

#[tokio::test]
async fn missing_telemetry_uses_failsafe_constants() {
    let n = node();
    n.carbon.push(grid(250.0)).await;

    let d = n.engine.run_cycle().await.unwrap();
    assert!(d.metrics.telemetry_failsafe);

    let t = n.engine.get_status().await.telemetry;
    assert!(t.is_failsafe);
    assert_eq!(t.tdp_cap_watts, 120.0);
    assert_eq!(t.clock_mhz, 2000.0);
    assert_eq!(t.vram_used_gb, 0.0);
    assert!(t.current_watts <= t.tdp_cap_watts);
}

#[tokio::test]
async fn out_of_bound_reading_uses_failsafe_constants() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    n.telemetry
        .push(RawTelemetry {
            core_temp_c: Some(900.0),
            ..used(10.0)
        })
        .await;

    n.engine.run_cycle().await.unwrap();
    let t = n.engine.get_status().await.telemetry;
    assert!(t.is_failsafe);
    assert_eq!(t.core_temp_c, 65.0);
}

#[tokio::test]
async fn moderate_keeps_performance_mode() {
    let n = node();
    n.telemetry.push(used(0.0)).await;

    n.carbon.push(grid(99.9)).await;
    assert_eq!(n.engine.run_cycle().await.unwrap().mode(), PowerMode::Performance);

    for current in [100.0, 250.0, 400.0] {
        n.carbon.push(grid(current)).await;
        let d = n.engine.run_cycle().await.unwrap();
        assert_eq!(d.mode(), PowerMode::Performance, "intensity {current}");
        assert_eq!(d.outcome.tuning.target_tdp_watts, 400.0);
    }

    n.carbon.push(grid(400.1)).await;
    let d = n.engine.run_cycle().await.unwrap();
    assert_eq!(d.mode(), PowerMode::Efficiency);
    assert_eq!(d.outcome.tuning.target_tdp_watts, 200.0);
    assert!(d.metrics.carbon_saved_est_grams > 0.0);
}

#[tokio::test]
async fn history_and_log_share_order() {
    let n = node();
    n.carbon.push(grid(250.0)).await;
    n.telemetry.push(used(0.0)).await;
    n.engine.submit_job(job("A", 1, 10.0, in_one_hour())).await.unwrap();
    let _ = n.engine.submit_job(job("HUGE", 1, 1000.0, in_one_hour())).await;
    n.engine.run_cycle().await.unwrap();
    n.engine.run_cycle().await.unwrap();

    let history = n.engine.get_history(None).await;
    let logged = n.log.entries().await;
    assert_eq!(history, logged);

    let actions: Vec<Action> = history.iter().map(|d| d.action()).collect();
    assert_eq!(actions, vec![Action::Reject, Action::Dispatch, Action::Noop]);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}
