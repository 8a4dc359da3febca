//! Sensor input seam shared by the carbon and telemetry feeds.
//!
//! The engine only ever calls [`Sensor::read`]; where the reading comes from
//! (an HTTP push, a file, a driver) is the implementor's business.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::carbon::CarbonReport;
use crate::telemetry::RawTelemetry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("{0} source has no reading yet")]
    NoReading(&'static str),

    #[error("{source_name} source unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },
}

/// A pollable reading source.
#[async_trait]
pub trait Sensor<T>: Send + Sync {
    async fn read(&self) -> Result<T, SourceError>;
}

pub type CarbonSource = dyn Sensor<CarbonReport>;
pub type TelemetrySource = dyn Sensor<RawTelemetry>;

/// Holds the most recently pushed reading and serves it on every read.
pub struct ManualSensor<T> {
    name: &'static str,
    latest: RwLock<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> ManualSensor<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            latest: RwLock::new(None),
        }
    }

    pub fn with_reading(name: &'static str, reading: T) -> Self {
        Self {
            name,
            latest: RwLock::new(Some(reading)),
        }
    }

    /// Replace the reading served to subsequent reads.
    pub async fn push(&self, reading: T) {
        *self.latest.write().await = Some(reading);
    }

    /// Forget the reading, making the source unavailable again.
    pub async fn clear(&self) {
        *self.latest.write().await = None;
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Sensor<T> for ManualSensor<T> {
    async fn read(&self) -> Result<T, SourceError> {
        self.latest
            .read()
            .await
            .clone()
            .ok_or(SourceError::NoReading(self.name))
    }
}
