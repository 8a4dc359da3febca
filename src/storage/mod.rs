//! Decision log persistence -- SQLite, JSON-lines journal, or memory.

pub mod decisions;
pub mod journal;
pub mod schema;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Mutex;

use crate::config::{DecisionLogConfig, DecisionLogKind};
use crate::engine::Decision;

pub use self::decisions::SqliteDecisionLog;
pub use self::journal::JsonlDecisionLog;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Append-only sink for decisions. One call per recorded decision, in order.
#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, decision: &Decision) -> Result<()>;
}

/// Keeps decisions in memory only.
#[derive(Default)]
pub struct MemoryDecisionLog {
    entries: Mutex<Vec<Decision>>,
}

impl MemoryDecisionLog {
    pub async fn entries(&self) -> Vec<Decision> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl DecisionLog for MemoryDecisionLog {
    async fn append(&self, decision: &Decision) -> Result<()> {
        self.entries.lock().await.push(decision.clone());
        Ok(())
    }
}

/// Build the configured decision log.
pub async fn open_decision_log(config: &DecisionLogConfig) -> Result<Arc<dyn DecisionLog>> {
    let log: Arc<dyn DecisionLog> = match config.kind {
        DecisionLogKind::Sqlite => {
            let path = config.path.to_string_lossy();
            tracing::info!(%path, "Opening SQLite decision log");
            Arc::new(SqliteDecisionLog::new(open_pool(&path)?))
        }
        DecisionLogKind::Jsonl => Arc::new(JsonlDecisionLog::new(config.path.clone()).await?),
        DecisionLogKind::Memory => Arc::new(MemoryDecisionLog::default()),
    };
    Ok(log)
}
