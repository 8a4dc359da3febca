//! AntiGravity -- carbon-aware GPU job scheduling for a single accelerator node.
//!
//! This crate provides the decision engine (carbon classification, telemetry
//! fail-safe sampling, VRAM-feasible job selection, power-mode hysteresis),
//! decision persistence, and the HTTP surface that drives it.

pub mod api;
pub mod carbon;
pub mod config;
pub mod demo;
pub mod engine;
pub mod queue;
pub mod sensor;
pub mod storage;
pub mod telemetry;

use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::AppConfig;

/// Start the AntiGravity daemon: decision log, engine, optional periodic
/// trigger, and the API server.
pub async fn serve(config: AppConfig, seed: bool) -> Result<()> {
    // 1. Decision log
    let log = storage::open_decision_log(&config.decision_log)
        .await
        .context("failed to open decision log")?;

    // 2. Engine + sensor feeds
    let state = api::state::AppState::new(&config, log);
    if seed {
        demo::seed(&state).await?;
    }

    // 3. Periodic trigger (background task)
    if config.engine.cycle_interval_secs > 0 {
        let engine = state.engine.clone();
        let period = Duration::from_secs(config.engine.cycle_interval_secs);
        tokio::spawn(async move {
            engine::run_cycle_loop(engine, period).await;
        });
    }

    // 4. API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "antigravity listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
