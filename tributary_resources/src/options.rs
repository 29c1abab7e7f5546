//! Configuration for the pipeline components.
//!
//! All options come with defaults and `with_*` builder methods. The defaults
//! mirror the buffering hints of the delivery stream the pipeline replaces:
//! flush at 64 MiB or 60 seconds, retry a failed flush three times.
use std::time::Duration;

use bytesize::ByteSize;
use snafu::{Snafu, ensure};

use crate::ErrorKind;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OptionsError {
    #[snafu(display("invalid {name}: {message}"))]
    Invalid { name: &'static str, message: String },
}

/// How the channel chooses a partition for an appended record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionStrategy {
    /// Spread records over partitions in turn.
    #[default]
    RoundRobin,
    /// Route records by their partition key, falling back to round robin for
    /// records without one.
    Keyed,
}

/// Options for the ingestion channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// The number of partitions.
    pub num_partitions: u32,
    /// Maximum number of uncommitted records retained per partition.
    pub max_buffered_records: usize,
    /// Maximum size of uncommitted payloads retained per partition.
    pub max_buffered_bytes: ByteSize,
    /// How records are routed to partitions.
    pub partition_strategy: PartitionStrategy,
}

/// Options for reading batches of records from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// The maximum number of records returned by a single read.
    pub max_records: usize,
    /// How long a read waits for `max_records` before returning what it has.
    pub max_wait: Duration,
}

/// Options for the batch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOptions {
    /// The size at which the current batch is flushed.
    pub flush_size: ByteSize,
    /// The maximum time a batch accumulates before it's flushed.
    pub flush_interval: Duration,
}

/// Retry policy for flushing a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Number of retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay between retries.
    pub max_delay: Duration,
    /// Exponential backoff multiplier applied after each attempt.
    pub backoff_factor: f64,
    /// Deadline for a single attempt. Expiring counts as a transient failure.
    pub attempt_timeout: Duration,
}

/// Compression codec used for columnar blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    Uncompressed,
    #[default]
    Snappy,
    Zstd,
}

/// Options for the format converter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterOptions {
    /// Fraction of invalid rows tolerated in a batch before conversion fails.
    ///
    /// The default of zero rejects any batch with an invalid row.
    pub max_invalid_row_ratio: f64,
    /// Maximum number of rows per row group.
    pub max_row_group_size: usize,
    /// The compression codec.
    pub compression: CompressionCodec,
}

/// All options of a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    pub reader: ReaderOptions,
    pub flush: FlushOptions,
    pub retry: RetryOptions,
    pub converter: ConverterOptions,
    /// Prefix for committed blocks in the durable sink.
    pub data_prefix: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            num_partitions: 1,
            max_buffered_records: 100_000,
            max_buffered_bytes: ByteSize::mib(256),
            partition_strategy: PartitionStrategy::RoundRobin,
        }
    }
}

impl ChannelOptions {
    pub fn with_num_partitions(mut self, num_partitions: u32) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn with_max_buffered_records(mut self, max_buffered_records: usize) -> Self {
        self.max_buffered_records = max_buffered_records;
        self
    }

    pub fn with_max_buffered_bytes(mut self, max_buffered_bytes: ByteSize) -> Self {
        self.max_buffered_bytes = max_buffered_bytes;
        self
    }

    pub fn with_partition_strategy(mut self, partition_strategy: PartitionStrategy) -> Self {
        self.partition_strategy = partition_strategy;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        ensure!(
            self.num_partitions > 0,
            InvalidSnafu {
                name: "num_partitions",
                message: "must be at least 1",
            }
        );
        ensure!(
            self.max_buffered_records > 0,
            InvalidSnafu {
                name: "max_buffered_records",
                message: "must be at least 1",
            }
        );
        Ok(())
    }
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_records: 500,
            max_wait: Duration::from_secs(1),
        }
    }
}

impl ReaderOptions {
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            flush_size: ByteSize::mib(64),
            flush_interval: Duration::from_secs(60),
        }
    }
}

impl FlushOptions {
    pub fn with_flush_size(mut self, flush_size: ByteSize) -> Self {
        self.flush_size = flush_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Total number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(delay)
    }
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            max_invalid_row_ratio: 0.0,
            max_row_group_size: 64 * 1024,
            compression: CompressionCodec::Snappy,
        }
    }
}

impl ConverterOptions {
    pub fn with_max_invalid_row_ratio(mut self, max_invalid_row_ratio: f64) -> Self {
        self.max_invalid_row_ratio = max_invalid_row_ratio;
        self
    }

    pub fn with_max_row_group_size(mut self, max_row_group_size: usize) -> Self {
        self.max_row_group_size = max_row_group_size;
        self
    }

    pub fn with_compression(mut self, compression: CompressionCodec) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        ensure!(
            (0.0..=1.0).contains(&self.max_invalid_row_ratio),
            InvalidSnafu {
                name: "max_invalid_row_ratio",
                message: format!("{} is not in [0, 1]", self.max_invalid_row_ratio),
            }
        );
        ensure!(
            self.max_row_group_size > 0,
            InvalidSnafu {
                name: "max_row_group_size",
                message: "must be at least 1",
            }
        );
        Ok(())
    }
}

impl PipelineOptions {
    pub fn with_reader(mut self, reader: ReaderOptions) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_flush(mut self, flush: FlushOptions) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_converter(mut self, converter: ConverterOptions) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_data_prefix(mut self, data_prefix: impl Into<String>) -> Self {
        self.data_prefix = data_prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        self.converter.validate()?;
        ensure!(
            self.reader.max_records > 0,
            InvalidSnafu {
                name: "reader.max_records",
                message: "must be at least 1",
            }
        );
        ensure!(
            !self.flush.flush_interval.is_zero(),
            InvalidSnafu {
                name: "flush.flush_interval",
                message: "must be greater than zero",
            }
        );
        ensure!(
            self.retry.backoff_factor >= 1.0,
            InvalidSnafu {
                name: "retry.backoff_factor",
                message: "must be at least 1.0",
            }
        );
        Ok(())
    }
}

impl OptionsError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}
