//! Pending job backlog with VRAM-feasibility filtering.
//!
//! Candidate order is `(priority asc, deadline asc, task_id asc)`: lower
//! priority numbers are more urgent, earlier deadlines break priority ties,
//! and the lexically smaller task id settles anything left.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted task id.
pub const MAX_TASK_ID_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueueError {
    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("task {0} is already queued or dispatched")]
    Duplicate(String),

    #[error("task {task_id} needs {required_gb}GB VRAM, exceeding total capacity {capacity_gb}GB")]
    ExceedsCapacity {
        task_id: String,
        required_gb: f64,
        capacity_gb: f64,
    },

    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {task_id} is {status}, not QUEUED")]
    NotQueued { task_id: String, status: JobStatus },
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Deferred,
    Rejected,
}

impl JobStatus {
    /// Queued and dispatched jobs hold their task id.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Dispatched)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::Deferred => "DEFERRED",
            JobStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// A unit of work awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub task_id: String,
    pub priority: i32,
    pub vram_req_gb: f64,
    pub deadline: DateTime<Utc>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(
        task_id: impl Into<String>,
        priority: i32,
        vram_req_gb: f64,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            priority,
            vram_req_gb,
            deadline,
            status: JobStatus::Queued,
        }
    }
}

/// Dispatch order: priority, then deadline, then task id.
pub fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.deadline.cmp(&b.deadline))
        .then_with(|| a.task_id.cmp(&b.task_id))
}

/// A job submission as received from outside. Unknown fields are refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobRequest {
    pub task_id: String,
    pub priority: i32,
    pub vram_req_gb: f64,
    pub deadline: DateTime<Utc>,
}

impl JobRequest {
    /// Validate shape and value ranges, producing a queued job.
    pub fn into_job(self) -> Result<Job, QueueError> {
        let task_id = self.task_id.trim();
        if task_id.is_empty() {
            return Err(QueueError::Invalid("task_id must not be empty".into()));
        }
        if task_id.len() > MAX_TASK_ID_LEN {
            return Err(QueueError::Invalid(format!(
                "task_id longer than {MAX_TASK_ID_LEN} bytes"
            )));
        }
        if task_id.chars().any(char::is_control) {
            return Err(QueueError::Invalid(
                "task_id contains control characters".into(),
            ));
        }
        check_vram(self.vram_req_gb)?;

        Ok(Job::new(task_id, self.priority, self.vram_req_gb, self.deadline))
    }
}

fn check_vram(vram_req_gb: f64) -> Result<(), QueueError> {
    if vram_req_gb.is_finite() && vram_req_gb >= 0.0 {
        Ok(())
    } else {
        Err(QueueError::Invalid(format!(
            "vram_req_gb must be a finite non-negative number, got {vram_req_gb}"
        )))
    }
}

/// Jobs in submission order.
#[derive(Debug, Clone)]
pub struct JobQueue {
    capacity_gb: f64,
    jobs: Vec<Job>,
}

impl JobQueue {
    pub fn new(capacity_gb: f64) -> Self {
        Self {
            capacity_gb,
            jobs: Vec::new(),
        }
    }

    pub fn capacity_gb(&self) -> f64 {
        self.capacity_gb
    }

    /// Enqueue a job. The queue is untouched on error.
    pub fn submit(&mut self, mut job: Job) -> Result<(), QueueError> {
        check_vram(job.vram_req_gb)?;
        if self.active(&job.task_id).is_some() {
            return Err(QueueError::Duplicate(job.task_id));
        }
        if job.vram_req_gb > self.capacity_gb {
            return Err(QueueError::ExceedsCapacity {
                task_id: job.task_id,
                required_gb: job.vram_req_gb,
                capacity_gb: self.capacity_gb,
            });
        }

        job.status = JobStatus::Queued;
        self.jobs.push(job);
        Ok(())
    }

    /// Queued jobs that fit in `available_vram_gb` (inclusive), in dispatch order.
    pub fn feasible_candidates(&self, available_vram_gb: f64) -> Vec<&Job> {
        let mut candidates: Vec<&Job> = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued && j.vram_req_gb <= available_vram_gb)
            .collect();
        candidates.sort_by(|a, b| dispatch_order(a, b));
        candidates
    }

    /// Move exactly the named job from `QUEUED` to `DISPATCHED`.
    pub fn mark_dispatched(&mut self, task_id: &str) -> Result<&Job, QueueError> {
        let idx = self
            .active_index(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        let job = &mut self.jobs[idx];
        if job.status != JobStatus::Queued {
            return Err(QueueError::NotQueued {
                task_id: task_id.to_string(),
                status: job.status,
            });
        }
        job.status = JobStatus::Dispatched;
        Ok(job)
    }

    /// Drop a queued (cancelled) or dispatched (finished) job, freeing its id
    /// and any VRAM it had reserved.
    pub fn remove(&mut self, task_id: &str) -> Result<Job, QueueError> {
        let idx = self
            .active_index(task_id)
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        Ok(self.jobs.remove(idx))
    }

    /// All jobs in submission order.
    pub fn list(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get(&self, task_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn queued_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .count()
    }

    /// VRAM promised to dispatched jobs.
    pub fn reserved_vram_gb(&self) -> f64 {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Dispatched)
            .map(|j| j.vram_req_gb)
            .sum()
    }

    fn active(&self, task_id: &str) -> Option<&Job> {
        self.active_index(task_id).map(|i| &self.jobs[i])
    }

    fn active_index(&self, task_id: &str) -> Option<usize> {
        self.jobs
            .iter()
            .position(|j| j.task_id == task_id && j.status.is_active())
    }
}
