//! Partition workers.
//!
//! Each channel partition is consumed by its own worker. A worker reads
//! records in order, transforms them into its batch buffer and hands sealed
//! batches to the flush controller. Flushes of all partitions share a pool of
//! permits sized to the number of partitions.
//!
//! Offsets are committed to the channel only once every batch up to them is
//! committed or quarantined, so a restarted pipeline resumes at the first
//! batch that didn't reach a terminal state.

use std::{collections::BTreeMap, sync::Arc};

use futures::{StreamExt, stream::FuturesUnordered};
use snafu::ResultExt;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tributary_channel::{IngestionChannel, PartitionReader};
use tributary_resources::{OffsetRange, PipelineOptions};
use tributary_schema::{SchemaCatalog, TableIdent};

use crate::{
    batcher::{Batch, BatchBuffer, BatchEntry},
    dead_letter::DeadLetterRecord,
    error::{CatalogSnafu, ChannelSnafu, IngestorError, PartitionHaltedSnafu, Result},
    flush::{FlushController, FlushError, FlushOutcome},
    metrics::{PipelineMetrics, partition_attributes},
    transform::Transformer,
};

/// Maximum number of sealed batches a partition flushes at the same time.
const MAX_PENDING_FLUSHES: usize = 4;

/// Tracks finished batches and computes the offset that can be committed.
#[derive(Debug)]
pub struct CommitTracker {
    next_offset: u64,
    finished: BTreeMap<u64, u64>,
}

impl CommitTracker {
    /// Creates a tracker for batches starting at `start_offset`.
    pub fn new(start_offset: u64) -> Self {
        Self {
            next_offset: start_offset,
            finished: BTreeMap::new(),
        }
    }

    /// Marks the batch covering `range` as finished.
    ///
    /// Returns the new commit offset if all batches before it are finished.
    pub fn finish(&mut self, range: OffsetRange) -> Option<u64> {
        self.finished.insert(range.start, range.end);

        let mut committed = None;
        while let Some(end) = self.finished.remove(&self.next_offset) {
            self.next_offset = end + 1;
            committed = Some(end);
        }

        committed
    }

    /// Number of finished batches waiting on an earlier one.
    pub fn num_waiting(&self) -> usize {
        self.finished.len()
    }
}

/// Consumes every partition of a channel.
pub struct Pipeline {
    channel: Arc<dyn IngestionChannel>,
    catalog: Arc<dyn SchemaCatalog>,
    table: TableIdent,
    flush: Arc<FlushController>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        channel: Arc<dyn IngestionChannel>,
        catalog: Arc<dyn SchemaCatalog>,
        table: TableIdent,
        flush: FlushController,
        options: PipelineOptions,
    ) -> Result<Self> {
        options.validate().map_err(|err| IngestorError::Options {
            message: err.to_string(),
        })?;

        Ok(Self {
            channel,
            catalog,
            table,
            flush: Arc::new(flush),
            options,
        })
    }

    /// Runs one worker per partition until `ct` is cancelled.
    ///
    /// A halted partition doesn't stop the other partitions. Its error is
    /// returned once all workers have stopped.
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let partitions = self.channel.partitions();
        let permits = Arc::new(Semaphore::new(partitions.len().max(1)));
        let mut workers = JoinSet::new();

        for partition in partitions {
            let reader = PartitionReader::new(self.channel.clone(), partition)
                .await
                .context(ChannelSnafu {
                    message: "failed to create partition reader",
                })?;

            let worker = PartitionWorker {
                reader,
                channel: self.channel.clone(),
                catalog: self.catalog.clone(),
                table: self.table.clone(),
                flush: self.flush.clone(),
                options: self.options.clone(),
                permits: permits.clone(),
            };

            workers.spawn(worker.run(ct.child_token()));
        }

        let mut first_error = None;
        while let Some(result) = workers.join_next().await {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => IngestorError::Internal {
                    message: format!("partition worker failed: {join_error}"),
                },
            };

            error!(%error, "partition worker stopped");
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Consumes one partition.
pub struct PartitionWorker {
    reader: PartitionReader,
    channel: Arc<dyn IngestionChannel>,
    catalog: Arc<dyn SchemaCatalog>,
    table: TableIdent,
    flush: Arc<FlushController>,
    options: PipelineOptions,
    permits: Arc<Semaphore>,
}

impl PartitionWorker {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let Self {
            mut reader,
            channel,
            catalog,
            table,
            flush,
            options,
            permits,
        } = self;

        let partition = reader.partition();
        let attributes = partition_attributes(partition);
        let metrics = PipelineMetrics::default();

        let mut buffer = BatchBuffer::new(partition, &options.flush);
        let mut tracker = CommitTracker::new(reader.next_offset());
        let mut transformer: Option<Transformer> = None;
        let mut flushes = FuturesUnordered::new();

        info!(
            partition = %partition,
            start_offset = reader.next_offset(),
            "partition worker started"
        );

        loop {
            if let Some(batch) = buffer.tick(Instant::now()) {
                flushes.push(flush_batch(flush.clone(), permits.clone(), batch, ct.clone()));
            }

            // Reads never wait past the moment the open batch is due.
            let max_wait = buffer
                .time_until_due(Instant::now())
                .map_or(options.reader.max_wait, |due| due.min(options.reader.max_wait));

            tokio::select! {
                _ = ct.cancelled() => {
                    break;
                }
                records = reader.read_batch(options.reader.max_records, max_wait), if flushes.len() < MAX_PENDING_FLUSHES => {
                    let records = records.context(ChannelSnafu {
                        message: "failed to read records",
                    })?;

                    for record in records {
                        // The schema is resolved once per batch.
                        let current = match transformer.take() {
                            Some(current) if !buffer.is_empty() => current,
                            _ => {
                                let schema = catalog.latest_schema(&table).await.context(CatalogSnafu {
                                    message: "failed to resolve table schema",
                                })?;
                                Transformer::new(schema)
                            }
                        };

                        let entry = match current.transform(&record) {
                            Ok(row) => {
                                metrics.rows_transformed.add(1, &attributes);
                                BatchEntry::Row(row)
                            }
                            Err(error) => {
                                debug!(partition = %partition, offset = record.offset, %error, "record rejected");
                                BatchEntry::DeadLetter(DeadLetterRecord::processing_failed(
                                    partition,
                                    record.offset,
                                    record.ingested_at,
                                    &record.payload,
                                    &error,
                                ))
                            }
                        };

                        if let Some(batch) = buffer.insert(current.schema(), record.offset, record.ingested_at, entry) {
                            flushes.push(flush_batch(flush.clone(), permits.clone(), batch, ct.clone()));
                        }

                        transformer = Some(current);
                    }
                }
                Some((batch, result)) = flushes.next(), if !flushes.is_empty() => {
                    match result {
                        Ok(outcome) => {
                            let committed = tracker.finish(batch.range);
                            debug!(
                                partition = %partition,
                                range = %batch.range,
                                state = ?outcome.state(),
                                attempts = outcome.attempts(),
                                waiting = tracker.num_waiting(),
                                "batch finished"
                            );

                            if let Some(offset) = committed {
                                channel.commit(partition, offset).await.context(ChannelSnafu {
                                    message: "failed to commit offset",
                                })?;
                            }
                        }
                        Err(FlushError::Cancelled { .. }) => {}
                        Err(error) => {
                            return Err(error).context(PartitionHaltedSnafu { partition });
                        }
                    }
                }
            }
        }

        info!(
            partition = %partition,
            pending_flushes = flushes.len(),
            buffered_bytes = buffer.size_bytes(),
            "partition worker stopped"
        );

        Ok(())
    }
}

async fn flush_batch(
    flush: Arc<FlushController>,
    permits: Arc<Semaphore>,
    batch: Arc<Batch>,
    ct: CancellationToken,
) -> (Arc<Batch>, std::result::Result<FlushOutcome, FlushError>) {
    // The semaphore is never closed.
    let Ok(_permit) = permits.acquire().await else {
        let error = FlushError::Cancelled {
            partition: batch.partition,
            range: batch.range,
        };
        return (batch, Err(error));
    };

    let result = flush.flush(batch.clone(), &ct).await;
    (batch, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_tracker_waits_for_gaps() {
        let mut tracker = CommitTracker::new(10);

        assert_eq!(tracker.finish(OffsetRange { start: 20, end: 29 }), None);
        assert_eq!(tracker.finish(OffsetRange { start: 30, end: 30 }), None);
        assert_eq!(tracker.num_waiting(), 2);

        assert_eq!(tracker.finish(OffsetRange { start: 10, end: 19 }), Some(30));
        assert_eq!(tracker.num_waiting(), 0);

        assert_eq!(tracker.finish(OffsetRange { start: 31, end: 40 }), Some(40));
    }

    #[test]
    fn test_commit_tracker_from_zero() {
        let mut tracker = CommitTracker::new(0);
        assert_eq!(tracker.finish(OffsetRange::single(0)), Some(0));
        assert_eq!(tracker.finish(OffsetRange { start: 1, end: 5 }), Some(5));
    }
}
