//! TOML configuration for the AntiGravity scheduler.
//!
//! A layered model: compiled-in defaults for every field, an optional config
//! file (explicit path, `ANTIGRAVITY_CONFIG`, or the system location), and a
//! validation pass before the engine is built.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::telemetry::FallbackTable;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ANTIGRAVITY_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/antigravity/antigravity.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the scheduler process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fallback: FallbackTable,
    #[serde(default)]
    pub decision_log: DecisionLogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded scheduler configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit path must load or this fails. Otherwise the lookup order is
    /// `ANTIGRAVITY_CONFIG`, then [`SYSTEM_CONFIG_PATH`], then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Try the environment override and the system location, falling back to
    /// compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ANTIGRAVITY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let hw = &self.hardware;
        if !(hw.vram_total_gb.is_finite() && hw.vram_total_gb > 0.0) {
            anyhow::bail!("hardware.vram_total_gb must be a positive number");
        }
        if !(hw.max_tdp_watts.is_finite() && hw.max_tdp_watts > 0.0) {
            anyhow::bail!("hardware.max_tdp_watts must be a positive number");
        }
        if !(hw.nominal_tdp_watts.is_finite() && hw.nominal_tdp_watts > 0.0) {
            anyhow::bail!("hardware.nominal_tdp_watts must be a positive number");
        }
        if !(hw.max_clock_mhz.is_finite() && hw.max_clock_mhz > 0.0) {
            anyhow::bail!("hardware.max_clock_mhz must be a positive number");
        }
        if self.engine.decision_timeout_ms == 0 {
            anyhow::bail!("engine.decision_timeout_ms must be greater than zero");
        }
        if self.engine.sensor_timeout_ms == 0
            || self.engine.sensor_timeout_ms >= self.engine.decision_timeout_ms
        {
            anyhow::bail!(
                "engine.sensor_timeout_ms must be greater than zero and below engine.decision_timeout_ms"
            );
        }
        if self.engine.history_retention == 0 {
            anyhow::bail!("engine.history_retention must be greater than zero");
        }
        if self.decision_log.kind != DecisionLogKind::Memory
            && self.decision_log.path.as_os_str().is_empty()
        {
            anyhow::bail!("decision_log.path is required for the {:?} log", self.decision_log.kind);
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the API listener.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Physical boundaries of the managed CPU/GPU pair. These are hard ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Fixed accelerator memory capacity (GB).
    pub vram_total_gb: f64,
    /// Rated TDP the power modes are expressed against (W).
    pub nominal_tdp_watts: f64,
    /// Absolute TDP ceiling; no cap or target ever exceeds it (W).
    pub max_tdp_watts: f64,
    /// Absolute accelerator clock ceiling (MHz).
    pub max_clock_mhz: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            vram_total_gb: 192.0,
            nominal_tdp_watts: 400.0,
            max_tdp_watts: 400.0,
            max_clock_mhz: 2100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Decision-cycle timing and contention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Anti-hang boundary for one decision cycle (ms).
    pub decision_timeout_ms: u64,
    /// Budget for one sensor read (ms); must stay below `decision_timeout_ms`.
    pub sensor_timeout_ms: u64,
    /// What an overlapping trigger does while a cycle is in flight.
    pub busy_policy: BusyPolicy,
    /// Period of the built-in trigger when serving; `0` disables it.
    pub cycle_interval_secs: u64,
    /// How long a last-known-valid sample may stand in for an unavailable source.
    pub sample_max_age_secs: u64,
    /// Decisions kept in memory; older ones remain only in the decision log.
    pub history_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_timeout_ms: 250,
            sensor_timeout_ms: 100,
            busy_policy: BusyPolicy::Reject,
            cycle_interval_secs: 0,
            sample_max_age_secs: 300,
            history_retention: 10_000,
        }
    }
}

/// Behaviour of a cycle trigger that arrives while another cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Return a busy error immediately.
    Reject,
    /// Wait for the running cycle to finish, then run.
    Wait,
}

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Where decisions are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionLogConfig {
    pub kind: DecisionLogKind,
    /// SQLite database file or JSON-lines journal path.
    pub path: PathBuf,
}

impl Default for DecisionLogConfig {
    fn default() -> Self {
        Self {
            kind: DecisionLogKind::Sqlite,
            path: PathBuf::from("data/antigravity.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLogKind {
    Sqlite,
    Jsonl,
    Memory,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}
