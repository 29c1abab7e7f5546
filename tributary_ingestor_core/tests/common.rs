#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{ObjectStore, memory::InMemory, path::Path};
use serde_json::{Map, Value};
use tributary_channel::StoredRecord;
use tributary_ingestor_core::{
    Batch, BatchBuffer, BatchEntry, CollectingAlertSink, DeadLetterRecord, FlushController,
    FlushReason, InMemoryDeadLetterStore, ObjectStoreQuarantineStore, Transformer,
    quarantine::{QuarantineError, QuarantineReason, QuarantineStore},
    read_block_rows,
};
use tributary_object_store::{DurableSink, ObjectStoreSink, SinkError};
use tributary_resources::{
    FlushOptions, PartitionId, PipelineOptions, ReaderOptions, Record, RetryOptions,
};
use tributary_schema::{SchemaRef, TableIdent, TableSchema, measurement_columns};

pub const DATA_PREFIX: &str = "data";

/// 2023-11-14T22:13:20Z
pub fn ingestion_time() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn schema() -> SchemaRef {
    Arc::new(TableSchema::new(
        TableIdent::default(),
        1,
        measurement_columns(),
    ))
}

pub fn measurement(index: usize) -> Bytes {
    let record = Record::new(format!("measure_{}", index % 4), index as f64)
        .with_metadata("customer_id", (index % 5).to_string())
        .with_metadata("zip_code", "55111");
    Bytes::from(record.to_json().expect("encode record"))
}

pub fn invalid_measurement() -> Bytes {
    Bytes::from_static(br#"{"measure_name":"measure_0","measure_value":"not a number"}"#)
}

pub fn stored(offset: u64, payload: Bytes) -> StoredRecord {
    StoredRecord {
        partition: PartitionId::new(0),
        offset,
        ingested_at: ingestion_time(),
        payload,
    }
}

/// Transforms `records` into a single sealed batch.
pub fn batch_of(records: &[StoredRecord]) -> Arc<Batch> {
    let transformer = Transformer::new(schema());
    let mut buffer = BatchBuffer::new(PartitionId::new(0), &FlushOptions::default());

    for record in records {
        let entry = match transformer.transform(record) {
            Ok(row) => BatchEntry::Row(row),
            Err(error) => BatchEntry::DeadLetter(DeadLetterRecord::processing_failed(
                record.partition,
                record.offset,
                record.ingested_at,
                &record.payload,
                &error,
            )),
        };
        assert!(
            buffer
                .insert(transformer.schema(), record.offset, record.ingested_at, entry)
                .is_none()
        );
    }

    buffer.seal(FlushReason::Size).expect("non-empty batch")
}

pub fn test_options() -> PipelineOptions {
    PipelineOptions::default()
        .with_data_prefix(DATA_PREFIX)
        .with_reader(
            ReaderOptions::default()
                .with_max_records(100)
                .with_max_wait(Duration::from_millis(20)),
        )
        .with_flush(
            FlushOptions::default().with_flush_interval(Duration::from_millis(200)),
        )
        .with_retry(
            RetryOptions::default()
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_attempt_timeout(Duration::from_secs(10)),
        )
}

/// A sink that fails a number of times before writing to the object store.
pub struct FlakySink {
    inner: ObjectStoreSink,
    remaining_failures: AtomicU32,
    num_puts: AtomicU32,
}

impl FlakySink {
    pub fn new(object_store: Arc<dyn ObjectStore>, failures: u32) -> Self {
        Self {
            inner: ObjectStoreSink::new(object_store),
            remaining_failures: AtomicU32::new(failures),
            num_puts: AtomicU32::new(0),
        }
    }

    pub fn num_puts(&self) -> u32 {
        self.num_puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableSink for FlakySink {
    async fn put(&self, path: &Path, data: Bytes) -> Result<(), SinkError> {
        self.num_puts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SinkError::Unavailable {
                message: "connection reset".to_string(),
            });
        }

        self.inner.put(path, data).await
    }
}

/// A sink whose first put never completes.
pub struct HangOnceSink {
    inner: ObjectStoreSink,
    hung: AtomicBool,
}

impl HangOnceSink {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner: ObjectStoreSink::new(object_store),
            hung: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DurableSink for HangOnceSink {
    async fn put(&self, path: &Path, data: Bytes) -> Result<(), SinkError> {
        if !self.hung.swap(true, Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.put(path, data).await
    }
}

/// A sink whose credentials were revoked.
pub struct DeniedSink;

#[async_trait]
impl DurableSink for DeniedSink {
    async fn put(&self, _path: &Path, _data: Bytes) -> Result<(), SinkError> {
        Err(SinkError::AccessDenied {
            message: "credentials revoked".to_string(),
        })
    }
}

/// A quarantine store that can't be written to.
pub struct BrokenQuarantineStore;

#[async_trait]
impl QuarantineStore for BrokenQuarantineStore {
    async fn quarantine(
        &self,
        _batch: &Batch,
        _reason: &QuarantineReason,
    ) -> Result<String, QuarantineError> {
        Err(QuarantineError::Write {
            path: "quarantine".to_string(),
            source: Arc::new(object_store::Error::Generic {
                store: "test",
                source: "bucket unavailable".into(),
            }),
        })
    }
}

pub struct Harness {
    pub object_store: Arc<InMemory>,
    pub dead_letters: Arc<InMemoryDeadLetterStore>,
    pub alerts: Arc<CollectingAlertSink>,
    pub options: PipelineOptions,
}

impl Harness {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            object_store: Arc::new(InMemory::new()),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            alerts: Arc::new(CollectingAlertSink::new()),
            options,
        }
    }

    pub fn flaky_sink(&self, failures: u32) -> Arc<FlakySink> {
        Arc::new(FlakySink::new(self.object_store.clone(), failures))
    }

    pub fn flush_controller(&self, sink: Arc<dyn DurableSink>) -> FlushController {
        self.flush_controller_with_quarantine(
            sink,
            Arc::new(ObjectStoreQuarantineStore::new(self.object_store.clone())),
        )
    }

    pub fn flush_controller_with_quarantine(
        &self,
        sink: Arc<dyn DurableSink>,
        quarantine: Arc<dyn QuarantineStore>,
    ) -> FlushController {
        FlushController::new(
            sink,
            self.dead_letters.clone(),
            quarantine,
            self.alerts.clone(),
            &self.options,
        )
    }

    /// All object paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths = self
            .object_store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect::<Vec<_>>()
            .await
            .expect("list objects");
        paths.sort();
        paths
    }

    pub async fn block_paths(&self) -> Vec<String> {
        self.paths()
            .await
            .into_iter()
            .filter(|path| path.starts_with(DATA_PREFIX) && path.ends_with(".parquet"))
            .collect()
    }

    pub async fn read(&self, path: &str) -> Bytes {
        self.object_store
            .get(&Path::from(path))
            .await
            .expect("get object")
            .bytes()
            .await
            .expect("read object")
    }

    /// Rows of all committed blocks, in path order.
    pub async fn block_rows(&self) -> Vec<Map<String, Value>> {
        let mut rows = Vec::new();
        for path in self.block_paths().await {
            rows.extend(read_block_rows(self.read(&path).await).expect("read block"));
        }
        rows
    }
}
