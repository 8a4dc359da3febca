//! SQLite-backed decision log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::params;

use crate::engine::Decision;
use crate::storage::{DecisionLog, Pool};

pub struct SqliteDecisionLog {
    pool: Pool,
}

impl SqliteDecisionLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn get_pool(&self) -> &Pool {
        &self.pool
    }

    /// The newest `limit` decisions, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<Decision>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT id, record_json FROM decisions ORDER BY seq DESC LIMIT ?1")?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut decisions = Vec::new();
        for r in rows {
            let (id, json) = r?;
            match serde_json::from_str::<Decision>(&json) {
                Ok(d) => decisions.push(d),
                Err(e) => tracing::warn!(%id, error = %e, "skipping unreadable decision record"),
            }
        }
        decisions.reverse();
        Ok(decisions)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        let n = conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(n)
    }
}

fn insert(pool: &Pool, d: &Decision) -> Result<()> {
    let conn = pool.get()?;
    let record_json = serde_json::to_string(d)?;

    conn.execute(
        "INSERT INTO decisions (id, timestamp, action, task_id, mode, reason, record_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            d.id.to_string(),
            d.timestamp.to_rfc3339(),
            d.action().as_str(),
            d.task_id(),
            d.mode().as_str(),
            d.reason(),
            record_json
        ],
    )
    .context("Failed to insert decision")?;

    Ok(())
}

#[async_trait]
impl DecisionLog for SqliteDecisionLog {
    async fn append(&self, decision: &Decision) -> Result<()> {
        let pool = self.pool.clone();
        let decision = decision.clone();
        tokio::task::spawn_blocking(move || insert(&pool, &decision)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::engine::{Action, PowerMode};
    use crate::storage::open_pool;

    fn decision(action: Action, task: Option<&str>) -> Decision {
        Decision::new(
            action,
            task.map(str::to_string),
            PowerMode::Performance,
            "LOW",
            &HardwareConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_append_and_read_back_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("decisions.db");
        let log = SqliteDecisionLog::new(open_pool(path.to_str().unwrap()).unwrap());

        let a = decision(Action::Dispatch, Some("A"));
        let b = decision(Action::Noop, None);
        let c = decision(Action::Defer, None);
        log.append(&a).await.unwrap();
        log.append(&b).await.unwrap();
        log.append(&c).await.unwrap();

        assert_eq!(log.count().unwrap(), 3);

        let all = log.recent(10).unwrap();
        let ids: Vec<_> = all.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(all[0].task_id(), Some("A"));

        let tail = log.recent(1).unwrap();
        assert_eq!(tail[0].id, c.id);
    }

    #[tokio::test]
    async fn test_indexed_columns_populated() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("decisions.db");
        let log = SqliteDecisionLog::new(open_pool(path.to_str().unwrap()).unwrap());
        log.append(&decision(Action::Dispatch, Some("JOB-1"))).await.unwrap();

        let conn = log.get_pool().get().unwrap();
        let (action, task, mode): (String, Option<String>, String) = conn
            .query_row("SELECT action, task_id, mode FROM decisions", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!(action, "DISPATCH");
        assert_eq!(task.as_deref(), Some("JOB-1"));
        assert_eq!(mode, "PERFORMANCE");
    }

    #[tokio::test]
    async fn test_duplicate_id_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("decisions.db");
        let log = SqliteDecisionLog::new(open_pool(path.to_str().unwrap()).unwrap());

        let d = decision(Action::Noop, None);
        log.append(&d).await.unwrap();
        assert!(log.append(&d).await.is_err());
    }
}
