use snafu::Snafu;
use tributary_channel::ChannelError;
use tributary_resources::{ErrorKind, PartitionId};
use tributary_schema::CatalogError;

use crate::flush::FlushError;

/// Pipeline and producer errors.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestorError {
    /// The ingestion channel failed.
    #[snafu(display("channel error: {message}: {source}"))]
    Channel {
        message: &'static str,
        source: ChannelError,
    },
    /// The schema of the destination table couldn't be resolved.
    #[snafu(display("schema catalog error: {message}: {source}"))]
    Catalog {
        message: &'static str,
        source: CatalogError,
    },
    /// A partition stopped because a batch couldn't be flushed.
    #[snafu(display("partition {partition} halted: {source}"))]
    PartitionHalted {
        partition: PartitionId,
        source: FlushError,
    },
    /// A record couldn't be encoded.
    #[snafu(display("failed to encode record: {message}"))]
    Encode { message: String },
    /// Invalid options.
    #[snafu(display("invalid options: {message}"))]
    Options { message: String },
    /// Internal error, such as a worker task panicking.
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = IngestorError> = std::result::Result<T, E>;

impl IngestorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Channel { source, .. } => source.kind(),
            Self::Catalog { source, .. } => match source.kind() {
                ErrorKind::NotFound => ErrorKind::Configuration,
                kind => kind,
            },
            Self::PartitionHalted { source, .. } => source.kind(),
            Self::Encode { .. } => ErrorKind::Validation,
            Self::Options { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
