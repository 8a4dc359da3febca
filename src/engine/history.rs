//! Append-only decision history.
//!
//! One lock covers timestamping, the in-memory append and the write to the
//! external [`DecisionLog`], so both always hold the same order and timestamps
//! never go backwards. Memory keeps the newest `retention` decisions; the log
//! keeps everything it is able to.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::error;

use crate::engine::decision::Decision;
use crate::storage::DecisionLog;

struct HistoryInner {
    entries: VecDeque<Decision>,
    recorded: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct DecisionHistory {
    inner: Mutex<HistoryInner>,
    retention: usize,
    sink: Arc<dyn DecisionLog>,
}

impl DecisionHistory {
    pub fn new(sink: Arc<dyn DecisionLog>, retention: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                entries: VecDeque::new(),
                recorded: 0,
                last_timestamp: None,
            }),
            retention: retention.max(1),
            sink,
        }
    }

    /// Append a decision and forward it to the log sink.
    ///
    /// A sink failure is reported but never fails the caller; the in-memory
    /// history still records the decision.
    pub async fn record(&self, mut decision: Decision) -> Decision {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_timestamp {
            if decision.timestamp < last {
                decision.timestamp = last;
            }
        }
        inner.last_timestamp = Some(decision.timestamp);
        if inner.entries.len() == self.retention {
            inner.entries.pop_front();
        }
        inner.entries.push_back(decision.clone());
        inner.recorded += 1;

        if let Err(e) = self.sink.append(&decision).await {
            error!(
                id = %decision.id,
                action = %decision.action(),
                error = %e,
                "failed to persist decision"
            );
        }

        decision
    }

    /// Retained decisions oldest first; with `limit`, only the newest `limit`.
    pub async fn entries(&self, limit: Option<usize>) -> Vec<Decision> {
        let inner = self.inner.lock().await;
        let skip = limit
            .map(|n| inner.entries.len().saturating_sub(n))
            .unwrap_or(0);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Decisions currently held in memory.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Decisions recorded since start, including ones dropped from memory.
    pub async fn recorded(&self) -> usize {
        self.inner.lock().await.recorded
    }

    pub async fn last(&self) -> Option<Decision> {
        self.inner.lock().await.entries.back().cloned()
    }
}
