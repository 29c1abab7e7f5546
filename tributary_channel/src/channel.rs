use std::time::Duration;

use async_trait::async_trait;
use tributary_resources::PartitionId;

use crate::{
    error::Result,
    types::{AppendInfo, ChannelRecord, StoredRecord},
};

/// An ordered, partitioned append log between producers and the pipeline.
///
/// Offsets within a partition start at zero and increase by one for every
/// accepted record. Records are retained until the consumer commits them, so
/// a consumer that restarts from the committed offset sees every record that
/// was not committed yet (at-least-once delivery).
#[async_trait]
pub trait IngestionChannel: Send + Sync + 'static {
    /// Returns the partitions of the channel.
    fn partitions(&self) -> Vec<PartitionId>;

    /// Appends a record and returns the partition and offset assigned to it.
    ///
    /// Never blocks. Fails with `ChannelFull` if the target partition is at
    /// capacity, in which case no offset is consumed.
    fn append(&self, record: ChannelRecord) -> Result<AppendInfo>;

    /// Reads records of `partition` starting at `offset`.
    ///
    /// Returns as soon as `max_records` records are available or `max_wait`
    /// elapsed, whichever comes first. The result is empty if no record
    /// arrived in time.
    async fn read_from(
        &self,
        partition: PartitionId,
        offset: u64,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StoredRecord>>;

    /// Marks all records of `partition` up to and including `offset` as
    /// processed.
    ///
    /// Commits are monotonic: committing an offset at or below the current
    /// committed offset does nothing.
    async fn commit(&self, partition: PartitionId, offset: u64) -> Result<()>;

    /// Returns the last committed offset of `partition`, if any.
    async fn committed_offset(&self, partition: PartitionId) -> Result<Option<u64>>;

    /// Returns the offset the next appended record of `partition` will get.
    async fn end_offset(&self, partition: PartitionId) -> Result<u64>;
}
