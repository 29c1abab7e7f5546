use std::{sync::Arc, time::Duration};

use tributary_resources::PartitionId;

use crate::{channel::IngestionChannel, error::Result, types::StoredRecord};

/// Reads consecutive batches of records from one partition.
///
/// The reader tracks its own position. It starts right after the partition's
/// committed offset, so records that were read but never committed by a
/// previous reader are delivered again.
pub struct PartitionReader {
    channel: Arc<dyn IngestionChannel>,
    partition: PartitionId,
    next_offset: u64,
}

impl PartitionReader {
    pub async fn new(channel: Arc<dyn IngestionChannel>, partition: PartitionId) -> Result<Self> {
        let next_offset = channel
            .committed_offset(partition)
            .await?
            .map(|offset| offset + 1)
            .unwrap_or_default();

        Ok(Self {
            channel,
            partition,
            next_offset,
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The offset of the next record returned by this reader.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Returns up to `max_records` records, waiting at most `max_wait`.
    ///
    /// Cancel safe: the read position only moves once records are returned.
    pub async fn read_batch(
        &mut self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StoredRecord>> {
        let records = self
            .channel
            .read_from(self.partition, self.next_offset, max_records, max_wait)
            .await?;

        if let Some(last) = records.last() {
            self.next_offset = last.offset + 1;
        }

        Ok(records)
    }
}
