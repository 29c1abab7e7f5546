//! Operator alerts for terminal failures.

use std::{fmt::Display, sync::Mutex};

use async_trait::async_trait;
use tracing::error;
use tributary_resources::{ErrorKind, OffsetRange, PartitionId};

/// A terminal failure that needs an operator.
///
/// Alerts carry the offset range, the error kind and the number of attempts,
/// which is what's needed to replay the affected records.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// A batch ran out of retries and was quarantined.
    BatchFailed {
        partition: PartitionId,
        range: OffsetRange,
        error_kind: ErrorKind,
        attempts: u32,
        message: String,
        quarantine_path: String,
    },
    /// A partition stopped flushing because of a permanent error.
    PartitionHalted {
        partition: PartitionId,
        range: OffsetRange,
        error_kind: ErrorKind,
        attempts: u32,
        message: String,
    },
}

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn raise(&self, alert: Alert);
}

/// Raises alerts as error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

/// Keeps every alert raised.
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl Alert {
    pub fn partition(&self) -> PartitionId {
        match self {
            Self::BatchFailed { partition, .. } | Self::PartitionHalted { partition, .. } => {
                *partition
            }
        }
    }

    pub fn range(&self) -> OffsetRange {
        match self {
            Self::BatchFailed { range, .. } | Self::PartitionHalted { range, .. } => *range,
        }
    }
}

impl Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchFailed {
                partition,
                range,
                error_kind,
                attempts,
                message,
                quarantine_path,
            } => write!(
                f,
                "batch {range} of partition {partition} failed after {attempts} attempts ({error_kind}): {message}; quarantined at {quarantine_path}"
            ),
            Self::PartitionHalted {
                partition,
                range,
                error_kind,
                attempts,
                message,
            } => write!(
                f,
                "partition {partition} halted at batch {range} after {attempts} attempts ({error_kind}): {message}"
            ),
        }
    }
}

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn raise(&self, alert: Alert) {
        error!(
            alert = true,
            partition = %alert.partition(),
            range = %alert.range(),
            "{alert}"
        );
    }
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    async fn raise(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(alert);
    }
}
