//! Storage for batches that exhausted their flush retries.
//!
//! A quarantined batch is written as a directory with a `manifest.json`
//! describing the failure, the rows as JSON lines and the dead letters that
//! were collected while transforming.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::warn;
use tributary_object_store::paths::format_quarantine_prefix;
use tributary_resources::{ErrorKind, OffsetRange, PartitionId};

use crate::batcher::Batch;

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum QuarantineError {
    #[snafu(display("failed to encode quarantined batch"))]
    Encode {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("failed to write quarantined batch to {path}"))]
    Write {
        path: String,
        #[snafu(source(from(object_store::Error, Arc::new)))]
        source: Arc<object_store::Error>,
    },
}

/// Why a batch was quarantined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineReason {
    pub error_kind: String,
    pub error: String,
    pub attempts: u32,
}

#[derive(Serialize)]
struct Manifest<'a> {
    partition: PartitionId,
    range: OffsetRange,
    sequence: u64,
    table: String,
    schema_version: u32,
    num_rows: usize,
    num_dead_letters: usize,
    first_ingested_at: String,
    #[serde(flatten)]
    reason: &'a QuarantineReason,
}

#[async_trait]
pub trait QuarantineStore: Send + Sync + 'static {
    /// Persists the batch and returns where it was written.
    async fn quarantine(
        &self,
        batch: &Batch,
        reason: &QuarantineReason,
    ) -> Result<String, QuarantineError>;
}

#[derive(Clone)]
pub struct ObjectStoreQuarantineStore {
    object_store: Arc<dyn ObjectStore>,
}

impl QuarantineReason {
    pub fn new(error_kind: ErrorKind, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            error_kind: error_kind.to_string(),
            error: error.into(),
            attempts,
        }
    }
}

impl ObjectStoreQuarantineStore {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    async fn write(&self, path: Path, data: Bytes) -> Result<(), QuarantineError> {
        self.object_store
            .put_opts(
                &path,
                PutPayload::from_bytes(data),
                PutOptions {
                    mode: PutMode::Overwrite,
                    ..Default::default()
                },
            )
            .await
            .context(WriteSnafu {
                path: path.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl QuarantineStore for ObjectStoreQuarantineStore {
    async fn quarantine(
        &self,
        batch: &Batch,
        reason: &QuarantineReason,
    ) -> Result<String, QuarantineError> {
        let prefix = format_quarantine_prefix(batch.partition, batch.range);

        let rows = encode_lines(batch.rows.iter().map(|row| row.to_json()))?;
        self.write(Path::from(format!("{prefix}/rows.jsonl")), rows)
            .await?;

        let dead_letters = encode_lines(batch.dead_letters.iter())?;
        self.write(
            Path::from(format!("{prefix}/dead-letters.jsonl")),
            dead_letters,
        )
        .await?;

        // The manifest goes last: its presence marks a complete quarantine.
        let first_ingested_at: DateTime<Utc> = batch.first_ingested_at.into();
        let manifest = Manifest {
            partition: batch.partition,
            range: batch.range,
            sequence: batch.sequence,
            table: batch.schema.ident.to_string(),
            schema_version: batch.schema.version,
            num_rows: batch.rows.len(),
            num_dead_letters: batch.dead_letters.len(),
            first_ingested_at: first_ingested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            reason,
        };
        let manifest = serde_json::to_vec_pretty(&manifest).context(EncodeSnafu {})?;
        self.write(
            Path::from(format!("{prefix}/manifest.json")),
            Bytes::from(manifest),
        )
        .await?;

        warn!(
            partition = %batch.partition,
            range = %batch.range,
            path = %prefix,
            "batch quarantined"
        );

        Ok(prefix)
    }
}

fn encode_lines<T: Serialize>(items: impl Iterator<Item = T>) -> Result<Bytes, QuarantineError> {
    let mut buffer = BytesMut::new().writer();
    for item in items {
        serde_json::to_writer(&mut buffer, &item).context(EncodeSnafu {})?;
        buffer.get_mut().put_u8(b'\n');
    }
    Ok(buffer.into_inner().freeze())
}

impl QuarantineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encode { .. } => ErrorKind::Internal,
            Self::Write { .. } => ErrorKind::Temporary,
        }
    }
}
