use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use snafu::ensure;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};
use tributary_resources::{ChannelOptions, PartitionId};

use crate::{
    channel::IngestionChannel,
    error::{ChannelFullSnafu, InvalidCommitSnafu, Result, UnknownPartitionSnafu},
    metrics::ChannelMetrics,
    partitioner::Partitioner,
    types::{AppendInfo, ChannelRecord, StoredRecord},
};

/// An ingestion channel that keeps uncommitted records in memory.
///
/// Each partition is bounded by `max_buffered_records` and
/// `max_buffered_bytes`. Committing records frees their capacity.
pub struct InMemoryChannel {
    options: ChannelOptions,
    partitioner: Partitioner,
    partitions: Vec<PartitionLog>,
    metrics: ChannelMetrics,
}

struct PartitionLog {
    id: PartitionId,
    state: Mutex<PartitionState>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct PartitionState {
    /// Uncommitted records, ordered by offset with no gaps.
    records: VecDeque<StoredRecord>,
    next_offset: u64,
    committed: Option<u64>,
    buffered_bytes: u64,
}

impl InMemoryChannel {
    pub fn new(options: ChannelOptions) -> Self {
        let num_partitions = options.num_partitions.max(1);
        let partitions = (0..num_partitions)
            .map(|id| PartitionLog {
                id: PartitionId::new(id),
                state: Mutex::default(),
                notify: Arc::new(Notify::new()),
            })
            .collect();

        Self {
            partitioner: Partitioner::new(options.partition_strategy, num_partitions),
            options,
            partitions,
            metrics: ChannelMetrics::new(),
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Returns the number of records and bytes retained by `partition`.
    pub fn buffered(&self, partition: PartitionId) -> Result<(usize, u64)> {
        let state = self.partition(partition)?.lock();
        Ok((state.records.len(), state.buffered_bytes))
    }

    fn partition(&self, partition: PartitionId) -> Result<&PartitionLog> {
        self.partitions
            .get(partition.index())
            .ok_or_else(|| UnknownPartitionSnafu { partition }.build())
    }
}

impl PartitionLog {
    fn lock(&self) -> MutexGuard<'_, PartitionState> {
        // State updates don't panic halfway, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartitionState {
    fn first_offset(&self) -> u64 {
        self.records
            .front()
            .map(|record| record.offset)
            .unwrap_or(self.next_offset)
    }

    fn start_index(&self, offset: u64) -> usize {
        offset.saturating_sub(self.first_offset()) as usize
    }

    fn available_from(&self, offset: u64) -> usize {
        self.records.len().saturating_sub(self.start_index(offset))
    }

    fn read(&self, offset: u64, max_records: usize) -> Vec<StoredRecord> {
        self.records
            .iter()
            .skip(self.start_index(offset))
            .take(max_records)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IngestionChannel for InMemoryChannel {
    fn partitions(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.id).collect()
    }

    fn append(&self, record: ChannelRecord) -> Result<AppendInfo> {
        let partition_id = self.partitioner.route(record.partition_key.as_deref());
        let partition = self.partition(partition_id)?;
        let size_bytes = record.payload.len() as u64;

        let offset = {
            let mut state = partition.lock();

            // A record larger than the byte capacity is still accepted by an
            // empty partition, otherwise it could never be appended.
            let over_records = state.records.len() >= self.options.max_buffered_records;
            let over_bytes = !state.records.is_empty()
                && state.buffered_bytes + size_bytes > self.options.max_buffered_bytes.as_u64();

            if over_records || over_bytes {
                self.metrics.record_rejected(partition_id);
                return ChannelFullSnafu {
                    partition: partition_id,
                    buffered_records: state.records.len(),
                    buffered_bytes: state.buffered_bytes,
                }
                .fail();
            }

            let offset = state.next_offset;
            state.next_offset += 1;
            state.buffered_bytes += size_bytes;
            state.records.push_back(StoredRecord {
                partition: partition_id,
                offset,
                ingested_at: record.timestamp.unwrap_or_else(SystemTime::now),
                payload: record.payload,
            });

            offset
        };

        partition.notify.notify_waiters();
        self.metrics.record_appended(partition_id, size_bytes);

        trace!(partition = %partition_id, offset, size_bytes, "record appended");

        Ok(AppendInfo {
            partition: partition_id,
            offset,
        })
    }

    async fn read_from(
        &self,
        partition: PartitionId,
        offset: u64,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StoredRecord>> {
        let log = self.partition(partition)?;
        let deadline = Instant::now() + max_wait;

        loop {
            // The notification future is created while holding the lock so
            // that an append between the check and the wait is not missed.
            let notified = {
                let state = log.lock();
                if max_records == 0
                    || state.available_from(offset) >= max_records
                    || Instant::now() >= deadline
                {
                    return Ok(state.read(offset, max_records));
                }
                log.notify.clone().notified_owned()
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(log.lock().read(offset, max_records));
            }
        }
    }

    async fn commit(&self, partition: PartitionId, offset: u64) -> Result<()> {
        let log = self.partition(partition)?;
        let mut state = log.lock();

        ensure!(
            offset < state.next_offset,
            InvalidCommitSnafu {
                partition,
                offset,
                message: format!("offset not appended yet, end offset is {}", state.next_offset),
            }
        );

        if state.committed.is_some_and(|committed| committed >= offset) {
            return Ok(());
        }

        state.committed = Some(offset);

        while let Some(front) = state.records.front() {
            if front.offset > offset {
                break;
            }
            let size_bytes = front.size_bytes();
            state.records.pop_front();
            state.buffered_bytes -= size_bytes;
        }

        debug!(
            partition = %partition,
            offset,
            retained = state.records.len(),
            "offset committed"
        );

        Ok(())
    }

    async fn committed_offset(&self, partition: PartitionId) -> Result<Option<u64>> {
        Ok(self.partition(partition)?.lock().committed)
    }

    async fn end_offset(&self, partition: PartitionId) -> Result<u64> {
        Ok(self.partition(partition)?.lock().next_offset)
    }
}

#[cfg(test)]
mod tests {
    use bytesize::ByteSize;

    use super::*;

    fn channel(max_records: usize) -> InMemoryChannel {
        InMemoryChannel::new(ChannelOptions::default().with_max_buffered_records(max_records))
    }

    #[tokio::test]
    async fn test_offsets_are_sequential() {
        let channel = channel(10);
        for expected in 0..5 {
            let info = channel.append(ChannelRecord::new("x")).unwrap();
            assert_eq!(info.partition, PartitionId::new(0));
            assert_eq!(info.offset, expected);
        }
        assert_eq!(channel.end_offset(PartitionId::new(0)).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_commit_trims_records() {
        let channel = channel(10);
        let partition = PartitionId::new(0);
        for _ in 0..4 {
            channel.append(ChannelRecord::new("abcd")).unwrap();
        }

        channel.commit(partition, 1).await.unwrap();
        assert_eq!(channel.buffered(partition).unwrap(), (2, 8));
        assert_eq!(channel.committed_offset(partition).await.unwrap(), Some(1));

        // Older commits are ignored.
        channel.commit(partition, 0).await.unwrap();
        assert_eq!(channel.committed_offset(partition).await.unwrap(), Some(1));

        let records = channel
            .read_from(partition, 0, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            records.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn test_commit_past_end_is_rejected() {
        let channel = channel(10);
        channel.append(ChannelRecord::new("x")).unwrap();
        let err = channel.commit(PartitionId::new(0), 1).await.unwrap_err();
        assert!(matches!(err, crate::ChannelError::InvalidCommit { .. }));
    }

    #[tokio::test]
    async fn test_byte_capacity() {
        let channel = InMemoryChannel::new(
            ChannelOptions::default().with_max_buffered_bytes(ByteSize::b(10)),
        );

        // An oversized record is accepted by an empty partition.
        channel.append(ChannelRecord::new(vec![0u8; 16])).unwrap();
        let err = channel.append(ChannelRecord::new("x")).unwrap_err();
        assert!(err.is_channel_full());

        channel.commit(PartitionId::new(0), 0).await.unwrap();
        let info = channel.append(ChannelRecord::new("x")).unwrap();
        assert_eq!(info.offset, 1);
    }

    #[tokio::test]
    async fn test_unknown_partition() {
        let channel = channel(10);
        let err = channel
            .read_from(PartitionId::new(3), 0, 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ChannelError::UnknownPartition { .. }));
    }
}
