//! The ingestion channel: a partitioned, ordered append log that decouples
//! producers from the transform pipeline.
mod channel;
mod error;
mod memory;
mod metrics;
mod partitioner;
mod reader;
mod types;

pub use self::{
    channel::IngestionChannel,
    error::{ChannelError, Result},
    memory::InMemoryChannel,
    partitioner::Partitioner,
    reader::PartitionReader,
    types::{AppendInfo, ChannelRecord, StoredRecord},
};
