use snafu::Snafu;
use tributary_resources::{ErrorKind, PartitionId};

/// Ingestion channel errors.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ChannelError {
    /// The partition can't accept more records until its consumer commits.
    ///
    /// This is backpressure, not data loss: the caller should retry later.
    #[snafu(display(
        "partition {partition} is full: {buffered_records} records, {buffered_bytes} bytes buffered"
    ))]
    ChannelFull {
        partition: PartitionId,
        buffered_records: usize,
        buffered_bytes: u64,
    },
    #[snafu(display("partition {partition} does not exist"))]
    UnknownPartition { partition: PartitionId },
    #[snafu(display("invalid commit of offset {offset} on partition {partition}: {message}"))]
    InvalidCommit {
        partition: PartitionId,
        offset: u64,
        message: String,
    },
}

pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

impl ChannelError {
    pub fn is_channel_full(&self) -> bool {
        matches!(self, Self::ChannelFull { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelFull { .. } => ErrorKind::Backpressure,
            Self::UnknownPartition { .. } => ErrorKind::NotFound,
            Self::InvalidCommit { .. } => ErrorKind::Internal,
        }
    }
}
