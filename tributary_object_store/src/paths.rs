//! Object layout of the durable sink.
//!
//! Committed blocks are partitioned by the ingestion hour of their first
//! record:
//!
//! ```text
//! {prefix}YYYY/MM/DD/HH/partition-00000-{start:020}.parquet
//! ```
//!
//! Paths only depend on the partition, the first offset and the ingestion
//! time stored in the channel. A batch replayed from the same offset is
//! written to the same object even if it's sealed at a different end offset.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use object_store::path::Path;
use tributary_resources::{OffsetRange, PartitionId};

/// Prefix of records that failed to transform.
pub const PROCESSING_FAILED_PREFIX: &str = "processing-failed";
/// Prefix of rows rejected by the format converter.
pub const FORMAT_CONVERSION_FAILED_PREFIX: &str = "format-conversion-failed";
/// Prefix of batches that exhausted their flush retries.
pub const QUARANTINE_PREFIX: &str = "quarantine";

pub const PARQUET_EXTENSION: &str = "parquet";

/// Formats the `YYYY/MM/DD/HH` prefix of an ingestion time, in UTC.
pub fn format_time_prefix(timestamp: SystemTime) -> String {
    let timestamp: DateTime<Utc> = timestamp.into();
    timestamp.format("%Y/%m/%d/%H").to_string()
}

/// Path of the block starting at `start_offset`.
pub fn format_block_path(
    prefix: &str,
    partition: PartitionId,
    start_offset: u64,
    first_ingested_at: SystemTime,
) -> Path {
    format!(
        "{}{}/partition-{:05}-{:020}.{}",
        normalize_prefix(prefix),
        format_time_prefix(first_ingested_at),
        partition.id(),
        start_offset,
        PARQUET_EXTENSION
    )
    .into()
}

/// Path of a dead-lettered record, keyed by its original offset.
pub fn format_dead_letter_path(category_prefix: &str, partition: PartitionId, offset: u64) -> Path {
    format!(
        "{}partition-{:05}/{:020}.json",
        normalize_prefix(category_prefix),
        partition.id(),
        offset
    )
    .into()
}

/// Directory of a quarantined batch.
pub fn format_quarantine_prefix(partition: PartitionId, range: OffsetRange) -> String {
    format!(
        "{}/partition-{:05}/{:020}-{:020}",
        QUARANTINE_PREFIX,
        partition.id(),
        range.start,
        range.end
    )
}

fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    // 2024-03-05T07:08:09Z
    fn timestamp() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_709_622_489)
    }

    #[test]
    fn test_time_prefix() {
        assert_eq!(format_time_prefix(timestamp()), "2024/03/05/07");
    }

    #[test]
    fn test_block_path() {
        let path = format_block_path(
            "data/",
            PartitionId::new(2),
            10,
            timestamp(),
        );
        assert_eq!(
            path.as_ref(),
            "data/2024/03/05/07/partition-00002-00000000000000000010.parquet"
        );

        let without_prefix = format_block_path("", PartitionId::new(0), 0, timestamp());
        assert!(without_prefix.as_ref().starts_with("2024/03/05/07/"));
    }

    #[test]
    fn test_dead_letter_path() {
        let path = format_dead_letter_path(PROCESSING_FAILED_PREFIX, PartitionId::new(1), 7);
        assert_eq!(
            path.as_ref(),
            "processing-failed/partition-00001/00000000000000000007.json"
        );
    }
}
