//! The batch buffer of a partition.
//!
//! The buffer accumulates transformed rows (and the dead letters produced
//! while transforming) until the flush size or the flush interval is reached.
//! Sealing swaps the open batch for an empty one and hands out the sealed
//! batch as an immutable [`Batch`], so the partition keeps accumulating while
//! the sealed batch is flushed.

use std::{
    fmt::Display,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::time::Instant;
use tracing::debug;
use tributary_resources::{FlushOptions, OffsetRange, PartitionId};
use tributary_schema::SchemaRef;

use crate::{dead_letter::DeadLetterRecord, transform::FlattenedRow};

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// The batch is open and receives rows.
    Accumulating,
    /// The batch is sealed and being written.
    Flushing,
    /// The block (if any) and all dead letters are durable.
    Committed,
    /// The flush ran out of retries and the batch was quarantined.
    Failed,
}

/// Why a batch was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Time,
}

/// The result of transforming one channel record.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Row(FlattenedRow),
    DeadLetter(DeadLetterRecord),
}

/// A sealed, immutable batch.
#[derive(Debug)]
pub struct Batch {
    pub partition: PartitionId,
    /// Position of the batch in its partition, starting at zero.
    pub sequence: u64,
    /// The schema every row of the batch was transformed with.
    pub schema: SchemaRef,
    pub rows: Vec<FlattenedRow>,
    pub dead_letters: Vec<DeadLetterRecord>,
    /// All offsets covered by the batch, including dead-lettered ones.
    pub range: OffsetRange,
    pub size_bytes: u64,
    /// Ingestion time of the first record, used to place the block.
    pub first_ingested_at: SystemTime,
    pub reason: FlushReason,
}

struct OpenBatch {
    schema: SchemaRef,
    rows: Vec<FlattenedRow>,
    dead_letters: Vec<DeadLetterRecord>,
    range: OffsetRange,
    size_bytes: u64,
    opened_at: Instant,
    first_ingested_at: SystemTime,
}

/// Accumulates the entries of one partition into batches.
pub struct BatchBuffer {
    partition: PartitionId,
    flush_size: u64,
    flush_interval: Duration,
    current: Option<OpenBatch>,
    next_sequence: u64,
}

impl BatchBuffer {
    pub fn new(partition: PartitionId, options: &FlushOptions) -> Self {
        Self {
            partition,
            flush_size: options.flush_size.as_u64(),
            flush_interval: options.flush_interval,
            current: None,
            next_sequence: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// `Accumulating` while a batch is open, `None` otherwise.
    pub fn state(&self) -> Option<BatchState> {
        self.current.as_ref().map(|_| BatchState::Accumulating)
    }

    /// The schema of the open batch.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.current.as_ref().map(|batch| &batch.schema)
    }

    pub fn size_bytes(&self) -> u64 {
        self.current.as_ref().map_or(0, |batch| batch.size_bytes)
    }

    /// Adds an entry, opening a batch with `schema` if none is open.
    ///
    /// Returns the sealed batch if the entry brought the buffer to the flush
    /// size.
    pub fn insert(
        &mut self,
        schema: &SchemaRef,
        offset: u64,
        ingested_at: SystemTime,
        entry: BatchEntry,
    ) -> Option<Arc<Batch>> {
        let batch = self.current.get_or_insert_with(|| OpenBatch {
            schema: schema.clone(),
            rows: Vec::new(),
            dead_letters: Vec::new(),
            range: OffsetRange::single(offset),
            size_bytes: 0,
            opened_at: Instant::now(),
            first_ingested_at: ingested_at,
        });

        batch.range.extend_to(offset);

        match entry {
            BatchEntry::Row(row) => {
                batch.size_bytes += row.size_bytes();
                batch.rows.push(row);
            }
            BatchEntry::DeadLetter(record) => {
                batch.dead_letters.push(record);
            }
        }

        if batch.size_bytes >= self.flush_size {
            return self.seal(FlushReason::Size);
        }

        None
    }

    /// Seals the open batch if it has been accumulating for the flush
    /// interval.
    pub fn tick(&mut self, now: Instant) -> Option<Arc<Batch>> {
        let batch = self.current.as_ref()?;
        if now.saturating_duration_since(batch.opened_at) >= self.flush_interval {
            return self.seal(FlushReason::Time);
        }
        None
    }

    /// Time left before the open batch is due, or `None` if the buffer is
    /// empty.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        let batch = self.current.as_ref()?;
        Some(
            self.flush_interval
                .saturating_sub(now.saturating_duration_since(batch.opened_at)),
        )
    }

    /// Seals the open batch, leaving the buffer empty.
    pub fn seal(&mut self, reason: FlushReason) -> Option<Arc<Batch>> {
        let open = self.current.take()?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!(
            partition = %self.partition,
            sequence,
            range = %open.range,
            num_rows = open.rows.len(),
            num_dead_letters = open.dead_letters.len(),
            size_bytes = open.size_bytes,
            %reason,
            "batch sealed"
        );

        Some(Arc::new(Batch {
            partition: self.partition,
            sequence,
            schema: open.schema,
            rows: open.rows,
            dead_letters: open.dead_letters,
            range: open.range,
            size_bytes: open.size_bytes,
            first_ingested_at: open.first_ingested_at,
            reason,
        }))
    }
}

impl Batch {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Time => write!(f, "time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bytesize::ByteSize;
    use tributary_schema::{Datum, TableIdent, TableSchema, measurement_columns};

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(TableSchema::new(TableIdent::default(), 1, measurement_columns()))
    }

    fn row(offset: u64) -> BatchEntry {
        BatchEntry::Row(FlattenedRow {
            offset,
            ingested_at: SystemTime::UNIX_EPOCH,
            schema_version: 1,
            // 8 bytes
            values: BTreeMap::from([("measure_value".to_string(), Datum::Float64(1.0))]),
        })
    }

    fn options(flush_size: u64, flush_interval: Duration) -> FlushOptions {
        FlushOptions::default()
            .with_flush_size(ByteSize::b(flush_size))
            .with_flush_interval(flush_interval)
    }

    #[tokio::test]
    async fn test_seal_on_size() {
        let mut buffer = BatchBuffer::new(PartitionId::new(0), &options(32, Duration::from_secs(60)));
        let schema = schema();

        for offset in 0..3 {
            assert!(buffer.insert(&schema, offset, SystemTime::UNIX_EPOCH, row(offset)).is_none());
        }
        assert_eq!(buffer.state(), Some(BatchState::Accumulating));

        let batch = buffer
            .insert(&schema, 3, SystemTime::UNIX_EPOCH, row(3))
            .expect("sealed at 32 bytes");
        assert_eq!(batch.reason, FlushReason::Size);
        assert_eq!(batch.range, OffsetRange { start: 0, end: 3 });
        assert_eq!(batch.num_rows(), 4);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seal_on_time() {
        let mut buffer = BatchBuffer::new(
            PartitionId::new(0),
            &options(1024 * 1024, Duration::from_secs(60)),
        );
        buffer.insert(&schema(), 0, SystemTime::UNIX_EPOCH, row(0));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(buffer.tick(Instant::now()).is_none());
        assert_eq!(
            buffer.time_until_due(Instant::now()),
            Some(Duration::from_secs(1))
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        let batch = buffer.tick(Instant::now()).expect("sealed after 60s");
        assert_eq!(batch.reason, FlushReason::Time);
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(buffer.time_until_due(Instant::now()), None);
    }

    #[tokio::test]
    async fn test_dead_letters_extend_range_without_size() {
        let mut buffer = BatchBuffer::new(PartitionId::new(0), &options(16, Duration::from_secs(60)));
        let schema = schema();
        buffer.insert(&schema, 0, SystemTime::UNIX_EPOCH, row(0));

        let dead_letter = DeadLetterRecord::processing_failed(
            PartitionId::new(0),
            1,
            SystemTime::UNIX_EPOCH,
            b"[]",
            &crate::transform::TransformError::UnrecognizedShape { found: "array" },
        );
        buffer.insert(&schema, 1, SystemTime::UNIX_EPOCH, BatchEntry::DeadLetter(dead_letter));
        assert_eq!(buffer.size_bytes(), 8);

        let batch = buffer.insert(&schema, 2, SystemTime::UNIX_EPOCH, row(2)).unwrap();
        assert_eq!(batch.range, OffsetRange { start: 0, end: 2 });
        assert_eq!(batch.dead_letters.len(), 1);
        assert_eq!(batch.num_rows(), 2);
    }

    #[tokio::test]
    async fn test_sequences_increase() {
        let mut buffer = BatchBuffer::new(PartitionId::new(0), &options(8, Duration::from_secs(60)));
        let schema = schema();
        let first = buffer.insert(&schema, 0, SystemTime::UNIX_EPOCH, row(0)).unwrap();
        let second = buffer.insert(&schema, 1, SystemTime::UNIX_EPOCH, row(1)).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert!(buffer.seal(FlushReason::Time).is_none());
    }
}
