use std::{fmt::Debug, time::SystemTime};

use bytes::Bytes;
use tributary_resources::PartitionId;

/// A record appended by a producer.
#[derive(Clone)]
pub struct ChannelRecord {
    /// The encoded record.
    pub payload: Bytes,
    /// Used to route the record when the channel is keyed.
    pub partition_key: Option<String>,
    /// Ingestion time. The channel uses the current time if not set.
    pub timestamp: Option<SystemTime>,
}

/// A record as stored in (and delivered by) the channel.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition: PartitionId,
    pub offset: u64,
    pub ingested_at: SystemTime,
    pub payload: Bytes,
}

/// The location assigned to an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendInfo {
    pub partition: PartitionId,
    pub offset: u64,
}

impl ChannelRecord {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            partition_key: None,
            timestamp: None,
        }
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl StoredRecord {
    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl Debug for ChannelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRecord")
            .field("payload", &format!("<{} bytes>", self.payload.len()))
            .field("partition_key", &self.partition_key)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Debug for StoredRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredRecord")
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("ingested_at", &self.ingested_at)
            .field("payload", &format!("<{} bytes>", self.payload.len()))
            .finish()
    }
}
