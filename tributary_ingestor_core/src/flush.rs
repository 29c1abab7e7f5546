//! The flush controller: writes sealed batches with bounded retries.
//!
//! Every batch goes through the same state machine:
//!
//! ```text
//! Attempt(n) --ok--------------------------------> Committed
//!     |--permanent error------------------------> Halt
//!     |--error, n < max attempts--> Backoff ----> Attempt(n + 1)
//!     '--error, n = max attempts--> Quarantine --> Failed
//!                                       '--write error--> Halt
//! ```
//!
//! An attempt writes the batch's dead letters, converts the rows, puts the
//! block at its deterministic path and finally dead-letters the rows the
//! converter rejected. Every step is idempotent, so an attempt that failed
//! halfway is simply repeated.

use std::{sync::Arc, time::Duration};

use object_store::path::Path;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_object_store::{DurableSink, SinkError, paths::format_block_path};
use tributary_resources::{ErrorKind, OffsetRange, PartitionId, PipelineOptions, RetryOptions};

use crate::{
    alert::{Alert, AlertSink},
    batcher::{Batch, BatchState},
    converter::{ConversionError, FormatConverter},
    dead_letter::{DeadLetterCategory, DeadLetterError, DeadLetterRecord, DeadLetterStore},
    metrics::{PipelineMetrics, dead_letter_attributes, partition_attributes},
    quarantine::{QuarantineReason, QuarantineStore},
};

/// Why a single flush attempt failed.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum AttemptError {
    #[snafu(display("conversion failed: {source}"))]
    Conversion { source: ConversionError },
    #[snafu(display("sink put failed: {source}"))]
    Sink { source: SinkError },
    #[snafu(display("dead-letter write failed: {source}"))]
    DeadLetter { source: DeadLetterError },
    #[snafu(display("attempt timed out after {timeout:?}"))]
    Timeout { timeout: Duration },
    #[snafu(display("conversion task failed: {message}"))]
    Task { message: String },
}

/// A flush that didn't reach a terminal batch state.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum FlushError {
    #[snafu(display(
        "partition {partition} halted at batch {range} after {attempts} attempts ({error_kind}): {message}"
    ))]
    Halted {
        partition: PartitionId,
        range: OffsetRange,
        attempts: u32,
        error_kind: ErrorKind,
        message: String,
    },
    #[snafu(display("flush of batch {range} on partition {partition} cancelled"))]
    Cancelled {
        partition: PartitionId,
        range: OffsetRange,
    },
}

/// The terminal state of a flushed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Committed {
        /// Where the block was written, `None` if no row survived.
        path: Option<Path>,
        num_rows: usize,
        num_dead_letters: usize,
        attempts: u32,
    },
    Failed {
        quarantine_path: String,
        error_kind: ErrorKind,
        attempts: u32,
    },
}

struct CommittedBlock {
    path: Option<Path>,
    num_rows: usize,
    size_bytes: usize,
    num_rejected: usize,
}

enum RetryState {
    Attempt(u32),
    Backoff { attempt: u32, error: AttemptError },
    Quarantine { attempts: u32, error: AttemptError },
    Halt {
        attempts: u32,
        error_kind: ErrorKind,
        message: String,
    },
}

/// Flushes batches to the durable sink.
pub struct FlushController {
    sink: Arc<dyn DurableSink>,
    dead_letters: Arc<dyn DeadLetterStore>,
    quarantine: Arc<dyn QuarantineStore>,
    alerts: Arc<dyn AlertSink>,
    converter: FormatConverter,
    retry: RetryOptions,
    data_prefix: String,
    metrics: PipelineMetrics,
}

impl FlushController {
    pub fn new(
        sink: Arc<dyn DurableSink>,
        dead_letters: Arc<dyn DeadLetterStore>,
        quarantine: Arc<dyn QuarantineStore>,
        alerts: Arc<dyn AlertSink>,
        options: &PipelineOptions,
    ) -> Self {
        Self {
            sink,
            dead_letters,
            quarantine,
            alerts,
            converter: FormatConverter::new(options.converter.clone()),
            retry: options.retry.clone(),
            data_prefix: options.data_prefix.clone(),
            metrics: PipelineMetrics::default(),
        }
    }

    /// The path the block of `batch` is written to.
    pub fn block_path(&self, batch: &Batch) -> Path {
        format_block_path(
            &self.data_prefix,
            batch.partition,
            batch.range.start,
            batch.first_ingested_at,
        )
    }

    /// Flushes a sealed batch until it's committed or quarantined.
    ///
    /// Returns an error if the partition must halt or if `ct` is cancelled
    /// before the batch reached a terminal state.
    pub async fn flush(
        &self,
        batch: Arc<Batch>,
        ct: &CancellationToken,
    ) -> Result<FlushOutcome, FlushError> {
        let max_attempts = self.retry.max_attempts();
        let mut state = RetryState::Attempt(1);

        loop {
            state = match state {
                RetryState::Attempt(attempt) => {
                    if ct.is_cancelled() {
                        return self.cancelled(&batch);
                    }

                    self.metrics
                        .flush_attempts
                        .add(1, &partition_attributes(batch.partition));

                    match self.timed_attempt(&batch).await {
                        Ok(block) => return Ok(self.committed(&batch, block, attempt)),
                        Err(error) if error.is_permanent() => RetryState::Halt {
                            attempts: attempt,
                            error_kind: error.kind(),
                            message: error.to_string(),
                        },
                        Err(error) if attempt >= max_attempts => RetryState::Quarantine {
                            attempts: attempt,
                            error,
                        },
                        Err(error) => RetryState::Backoff { attempt, error },
                    }
                }
                RetryState::Backoff { attempt, error } => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        partition = %batch.partition,
                        range = %batch.range,
                        attempt,
                        max_attempts,
                        ?delay,
                        %error,
                        "flush attempt failed, retrying"
                    );

                    tokio::select! {
                        _ = ct.cancelled() => return self.cancelled(&batch),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    RetryState::Attempt(attempt + 1)
                }
                RetryState::Quarantine { attempts, error } => {
                    let error_kind = error.kind();
                    let reason = QuarantineReason::new(error_kind, error.to_string(), attempts);

                    match self.quarantine.quarantine(&batch, &reason).await {
                        Ok(quarantine_path) => {
                            return Ok(self
                                .failed(&batch, quarantine_path, error_kind, attempts, error)
                                .await);
                        }
                        Err(quarantine_error) => RetryState::Halt {
                            attempts,
                            error_kind: quarantine_error.kind(),
                            message: format!(
                                "{error}; quarantine failed: {quarantine_error}"
                            ),
                        },
                    }
                }
                RetryState::Halt {
                    attempts,
                    error_kind,
                    message,
                } => {
                    error!(
                        partition = %batch.partition,
                        range = %batch.range,
                        attempts,
                        %error_kind,
                        error = %message,
                        "partition halted"
                    );

                    self.alerts
                        .raise(Alert::PartitionHalted {
                            partition: batch.partition,
                            range: batch.range,
                            error_kind,
                            attempts,
                            message: message.clone(),
                        })
                        .await;

                    return HaltedSnafu {
                        partition: batch.partition,
                        range: batch.range,
                        attempts,
                        error_kind,
                        message,
                    }
                    .fail();
                }
            };
        }
    }

    async fn timed_attempt(&self, batch: &Arc<Batch>) -> Result<CommittedBlock, AttemptError> {
        let timeout = self.retry.attempt_timeout;
        match tokio::time::timeout(timeout, self.attempt(batch)).await {
            Ok(result) => result,
            Err(_) => TimeoutSnafu { timeout }.fail(),
        }
    }

    async fn attempt(&self, batch: &Arc<Batch>) -> Result<CommittedBlock, AttemptError> {
        for record in &batch.dead_letters {
            self.dead_letters
                .append(record)
                .await
                .context(DeadLetterSnafu {})?;
        }

        if batch.rows.is_empty() {
            return Ok(CommittedBlock {
                path: None,
                num_rows: 0,
                size_bytes: 0,
                num_rejected: 0,
            });
        }

        let converter = self.converter.clone();
        let task_batch = batch.clone();
        let block = tokio::task::spawn_blocking(move || {
            converter.convert(&task_batch, &task_batch.schema)
        })
        .await
        .map_err(|err| AttemptError::Task {
            message: err.to_string(),
        })?
        .context(ConversionSnafu {})?;

        let path = self.block_path(batch);
        let size_bytes = block.data.len();
        self.sink
            .put(&path, block.data)
            .await
            .context(SinkSnafu {})?;

        for rejected in &block.rejected {
            let record =
                DeadLetterRecord::conversion_failed(batch.partition, &rejected.row, &rejected.reason);
            self.dead_letters
                .append(&record)
                .await
                .context(DeadLetterSnafu {})?;
        }

        Ok(CommittedBlock {
            path: Some(path),
            num_rows: block.num_rows,
            size_bytes,
            num_rejected: block.rejected.len(),
        })
    }

    fn committed(&self, batch: &Batch, block: CommittedBlock, attempts: u32) -> FlushOutcome {
        let attributes = partition_attributes(batch.partition);
        self.metrics.batches_committed.add(1, &attributes);
        self.metrics
            .rows_written
            .add(block.num_rows as u64, &attributes);
        self.metrics
            .bytes_written
            .add(block.size_bytes as u64, &attributes);
        self.metrics.records_dead_lettered.add(
            batch.dead_letters.len() as u64,
            &dead_letter_attributes(batch.partition, DeadLetterCategory::ProcessingFailed),
        );
        self.metrics.records_dead_lettered.add(
            block.num_rejected as u64,
            &dead_letter_attributes(batch.partition, DeadLetterCategory::FormatConversionFailed),
        );

        match &block.path {
            Some(path) => info!(
                partition = %batch.partition,
                range = %batch.range,
                %path,
                num_rows = block.num_rows,
                size_bytes = block.size_bytes,
                attempts,
                "batch committed"
            ),
            None => debug!(
                partition = %batch.partition,
                range = %batch.range,
                num_dead_letters = batch.dead_letters.len(),
                "batch committed without rows"
            ),
        }

        FlushOutcome::Committed {
            path: block.path,
            num_rows: block.num_rows,
            num_dead_letters: batch.dead_letters.len() + block.num_rejected,
            attempts,
        }
    }

    async fn failed(
        &self,
        batch: &Batch,
        quarantine_path: String,
        error_kind: ErrorKind,
        attempts: u32,
        error: AttemptError,
    ) -> FlushOutcome {
        self.metrics
            .batches_quarantined
            .add(1, &partition_attributes(batch.partition));

        self.alerts
            .raise(Alert::BatchFailed {
                partition: batch.partition,
                range: batch.range,
                error_kind,
                attempts,
                message: error.to_string(),
                quarantine_path: quarantine_path.clone(),
            })
            .await;

        FlushOutcome::Failed {
            quarantine_path,
            error_kind,
            attempts,
        }
    }

    fn cancelled(&self, batch: &Batch) -> Result<FlushOutcome, FlushError> {
        debug!(partition = %batch.partition, range = %batch.range, "flush cancelled");
        CancelledSnafu {
            partition: batch.partition,
            range: batch.range,
        }
        .fail()
    }
}

impl FlushOutcome {
    pub fn state(&self) -> BatchState {
        match self {
            Self::Committed { .. } => BatchState::Committed,
            Self::Failed { .. } => BatchState::Failed,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Committed { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

impl AttemptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conversion { source } => source.kind(),
            Self::Sink { source } => source.kind(),
            Self::DeadLetter { source } => source.kind(),
            Self::Timeout { .. } => ErrorKind::Temporary,
            Self::Task { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the partition must halt instead of retrying.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Sink { source } => source.is_permanent(),
            Self::DeadLetter { source } => source.kind() == ErrorKind::Permission,
            _ => false,
        }
    }
}

impl FlushError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Halted { error_kind, .. } => *error_kind,
            Self::Cancelled { .. } => ErrorKind::Temporary,
        }
    }
}
