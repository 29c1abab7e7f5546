use std::{path::PathBuf, sync::Arc, time::Duration};

use bytesize::ByteSize;
use clap::{Args, ValueEnum};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tributary_channel::InMemoryChannel;
use tributary_ingestor_core::{
    FlushController, ObjectStoreDeadLetterStore, ObjectStoreQuarantineStore, Pipeline, Producer,
    ProducerOptions, RecordGenerator, TracingAlertSink,
};
use tributary_object_store::{
    AmazonS3Factory, LocalFileSystemFactory, ObjectStoreFactory, ObjectStoreSink,
    TemporaryFileSystemFactory,
};
use tributary_observability::init_observability;
use tributary_resources::{
    ChannelOptions, CompressionCodec, ConverterOptions, FlushOptions, PartitionStrategy,
    PipelineOptions, RetryOptions,
};
use tributary_schema::{InMemorySchemaCatalog, TableIdent};

use crate::error::{
    CatalogSnafu, IngestorSnafu, InvalidArgumentSnafu, ObjectStoreSnafu, ObservabilitySnafu,
    OptionsSnafu, Result,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreKind {
    /// A temporary directory, removed on exit.
    Temporary,
    /// The directory given by `--data-dir`.
    Local,
    /// An S3 bucket, configured from the `AWS_*` environment variables.
    S3,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Strategy {
    RoundRobin,
    Keyed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Compression {
    Snappy,
    Zstd,
}

#[derive(Debug, Args)]
pub struct DevArgs {
    /// Where committed blocks are written.
    #[arg(long, value_enum, default_value = "temporary")]
    store: StoreKind,
    /// Root directory of the local store.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Bucket receiving blocks, dead letters and quarantined batches.
    #[arg(long, default_value = "tributary")]
    bucket: String,
    /// S3-compatible endpoint.
    #[arg(long)]
    s3_endpoint: Option<String>,
    /// Prefix of committed blocks inside the bucket.
    #[arg(long, default_value = "data")]
    data_prefix: String,

    /// Number of channel partitions.
    #[arg(long, default_value_t = 4)]
    partitions: u32,
    /// Records buffered per partition before producers are pushed back.
    #[arg(long, default_value_t = 100_000)]
    partition_capacity: usize,
    #[arg(long, value_enum, default_value = "keyed")]
    partition_strategy: Strategy,

    /// Size at which a batch is flushed.
    #[arg(long, default_value = "64MiB")]
    flush_size: ByteSize,
    /// Seconds after which a batch is flushed.
    #[arg(long, default_value_t = 60)]
    flush_interval: u64,
    /// Retries of a failed flush before the batch is quarantined.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Fraction of rows the converter may reject before failing the batch.
    #[arg(long, default_value_t = 0.0)]
    max_invalid_row_ratio: f64,
    #[arg(long, value_enum, default_value = "snappy")]
    compression: Compression,

    /// Milliseconds between two rounds of generated records.
    #[arg(long, default_value_t = 60_000)]
    produce_interval_ms: u64,
    /// Records generated every round.
    #[arg(long, default_value_t = 1)]
    records_per_interval: usize,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let channel_options = self.channel_options();
        let options = self.pipeline_options();
        channel_options.validate().context(OptionsSnafu {})?;
        options.validate().context(OptionsSnafu {})?;

        init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .context(ObservabilitySnafu {})?;

        let factory = self.object_store_factory()?;
        let object_store = factory
            .create_object_store(&self.bucket)
            .await
            .context(ObjectStoreSnafu {})?;

        let channel = Arc::new(InMemoryChannel::new(channel_options));

        let table = TableIdent::default();
        let catalog = InMemorySchemaCatalog::with_measurement_table(table.clone())
            .await
            .context(CatalogSnafu {})?;

        let flush = FlushController::new(
            Arc::new(ObjectStoreSink::new(object_store.clone())),
            Arc::new(ObjectStoreDeadLetterStore::new(object_store.clone())),
            Arc::new(ObjectStoreQuarantineStore::new(object_store)),
            Arc::new(TracingAlertSink),
            &options,
        );

        let pipeline = Pipeline::new(channel.clone(), Arc::new(catalog), table, flush, options)
            .context(IngestorSnafu {})?;

        let producer = Producer::new(
            channel,
            ProducerOptions::default()
                .with_interval(Duration::from_millis(self.produce_interval_ms.max(1)))
                .with_records_per_interval(self.records_per_interval),
        );

        let producer_task = tokio::spawn({
            let ct = ct.clone();
            async move { producer.run(RecordGenerator::new(), ct).await }
        });

        let pipeline_result = pipeline.run(ct.clone()).await;

        // The pipeline only returns early if every partition halted.
        ct.cancel();

        match producer_task.await {
            Ok(Ok(num_sent)) => info!(num_sent, "producer finished"),
            Ok(Err(err)) => error!(error = %err, "producer failed"),
            Err(err) => error!(error = %err, "producer task failed"),
        }

        pipeline_result.context(IngestorSnafu {})
    }

    fn object_store_factory(&self) -> Result<Arc<dyn ObjectStoreFactory>> {
        match self.store {
            StoreKind::Temporary => {
                let factory = TemporaryFileSystemFactory::new().context(ObjectStoreSnafu {})?;
                println!("Object store root path: {}", factory.root_path().display());
                Ok(Arc::new(factory))
            }
            StoreKind::Local => {
                let Some(data_dir) = &self.data_dir else {
                    return InvalidArgumentSnafu {
                        name: "data-dir",
                        message: "required with --store local",
                    }
                    .fail();
                };
                std::fs::create_dir_all(data_dir).map_err(|err| {
                    InvalidArgumentSnafu {
                        name: "data-dir",
                        message: err.to_string(),
                    }
                    .build()
                })?;
                let factory = LocalFileSystemFactory::new(data_dir).context(ObjectStoreSnafu {})?;
                println!("Object store root path: {}", factory.root_path().display());
                Ok(Arc::new(factory))
            }
            StoreKind::S3 => {
                let mut factory = AmazonS3Factory::new();
                if let Some(endpoint) = &self.s3_endpoint {
                    factory = factory.with_endpoint(endpoint);
                }
                Ok(Arc::new(factory))
            }
        }
    }

    fn channel_options(&self) -> ChannelOptions {
        let strategy = match self.partition_strategy {
            Strategy::RoundRobin => PartitionStrategy::RoundRobin,
            Strategy::Keyed => PartitionStrategy::Keyed,
        };

        ChannelOptions::default()
            .with_num_partitions(self.partitions)
            .with_max_buffered_records(self.partition_capacity)
            .with_partition_strategy(strategy)
    }

    fn pipeline_options(&self) -> PipelineOptions {
        let compression = match self.compression {
            Compression::Snappy => CompressionCodec::Snappy,
            Compression::Zstd => CompressionCodec::Zstd,
        };

        PipelineOptions::default()
            .with_data_prefix(&self.data_prefix)
            .with_flush(
                FlushOptions::default()
                    .with_flush_size(self.flush_size)
                    .with_flush_interval(Duration::from_secs(self.flush_interval)),
            )
            .with_retry(RetryOptions::default().with_max_retries(self.max_retries))
            .with_converter(
                ConverterOptions::default()
                    .with_max_invalid_row_ratio(self.max_invalid_row_ratio)
                    .with_compression(compression),
            )
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[clap(flatten)]
        args: DevArgs,
    }

    fn parse(args: &[&str]) -> DevArgs {
        TestCli::try_parse_from(std::iter::once("dev").chain(args.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn test_default_options_are_valid() {
        let args = parse(&[]);
        assert!(args.channel_options().validate().is_ok());
        assert!(args.pipeline_options().validate().is_ok());
        assert_eq!(args.pipeline_options().flush.flush_size, ByteSize::mib(64));
        assert_eq!(args.pipeline_options().retry.max_retries, 3);
    }

    #[tokio::test]
    async fn test_zero_partition_capacity_is_rejected() {
        let args = parse(&["--partition-capacity", "0"]);
        let error = args.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(error, crate::error::CliError::Options { .. }));
        assert_eq!(error.kind(), tributary_resources::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_zero_partitions_is_rejected() {
        let args = parse(&["--partitions", "0"]);
        let error = args.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, crate::error::CliError::Options { .. }));
    }
}
