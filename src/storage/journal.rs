//! JSON-lines decision journal.
//!
//! Each decision is appended as one JSON line. Writes are serialized through
//! a `tokio::sync::Mutex` over a file opened in append mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::Decision;
use crate::storage::DecisionLog;

pub struct JsonlDecisionLog {
    path: PathBuf,
    writer: Mutex<tokio::fs::File>,
}

impl JsonlDecisionLog {
    /// Open (or create) the journal at `path` in append mode.
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create journal directory: {}", parent.display())
                })?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open decision journal: {}", path.display()))?;

        debug!(path = %path.display(), "decision journal opened");

        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionLog for JsonlDecisionLog {
    async fn append(&self, decision: &Decision) -> Result<()> {
        let mut line = serde_json::to_string(decision).context("failed to serialize decision")?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to write decision journal: {}", self.path.display()))?;
        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush decision journal: {}", self.path.display()))?;

        Ok(())
    }
}

/// Read a journal back, oldest first. Unparseable lines are skipped.
pub async fn read_journal(path: &Path) -> Result<Vec<Decision>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read decision journal: {}", path.display()))?;

    let mut out = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Decision>(line) {
            Ok(d) => out.push(d),
            Err(e) => warn!(line = n + 1, error = %e, "skipping malformed journal line"),
        }
    }
    Ok(out)
}
