mod error_kind;
mod options;
mod partition;
mod record;

pub use self::{
    error_kind::ErrorKind,
    options::{
        ChannelOptions, CompressionCodec, ConverterOptions, FlushOptions, OptionsError,
        PartitionStrategy, PipelineOptions, ReaderOptions, RetryOptions,
    },
    partition::{OffsetRange, PartitionId},
    record::Record,
};
