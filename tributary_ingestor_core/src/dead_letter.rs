//! Append-only storage for records that can't be delivered.
//!
//! Records that fail to transform land under `processing-failed/`, rows the
//! format converter rejects land under `format-conversion-failed/`. Entries
//! are keyed by partition and original offset, so writing the same entry
//! again is a no-op and operators can replay them by offset.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path};
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::info;
use tributary_object_store::paths::{
    FORMAT_CONVERSION_FAILED_PREFIX, PROCESSING_FAILED_PREFIX, format_dead_letter_path,
};
use tributary_resources::{ErrorKind, PartitionId};

use crate::transform::{FlattenedRow, TransformError};

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum DeadLetterError {
    #[snafu(display("failed to encode dead-letter record"))]
    Encode {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("failed to write dead-letter record {path}"))]
    Write {
        path: String,
        #[snafu(source(from(object_store::Error, Arc::new)))]
        source: Arc<object_store::Error>,
    },
}

/// Which stage rejected a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterCategory {
    ProcessingFailed,
    FormatConversionFailed,
}

/// A rejected record with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterRecord {
    pub category: DeadLetterCategory,
    pub partition: PartitionId,
    pub offset: u64,
    /// RFC 3339 ingestion time.
    pub ingested_at: String,
    pub reason: String,
    pub error: String,
    /// The original payload for transform failures, the rejected row for
    /// conversion failures.
    pub data: Value,
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync + 'static {
    /// Stores a record. Storing an entry that already exists succeeds.
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError>;
}

/// Dead-letter store writing one JSON object per record.
#[derive(Clone)]
pub struct ObjectStoreDeadLetterStore {
    object_store: Arc<dyn ObjectStore>,
}

/// Dead-letter store keeping records in memory.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    records: Mutex<BTreeMap<(DeadLetterCategory, PartitionId, u64), DeadLetterRecord>>,
}

impl DeadLetterCategory {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::ProcessingFailed => PROCESSING_FAILED_PREFIX,
            Self::FormatConversionFailed => FORMAT_CONVERSION_FAILED_PREFIX,
        }
    }
}

impl DeadLetterRecord {
    /// A record the transform stage rejected.
    pub fn processing_failed(
        partition: PartitionId,
        offset: u64,
        ingested_at: SystemTime,
        payload: &[u8],
        error: &TransformError,
    ) -> Self {
        // Keep the payload as JSON when possible so it can be replayed as is.
        let data = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));

        Self {
            category: DeadLetterCategory::ProcessingFailed,
            partition,
            offset,
            ingested_at: format_timestamp(ingested_at),
            reason: error.reason().to_string(),
            error: error.to_string(),
            data,
        }
    }

    /// A row the format converter excluded from a block.
    pub fn conversion_failed(partition: PartitionId, row: &FlattenedRow, reason: &str) -> Self {
        Self {
            category: DeadLetterCategory::FormatConversionFailed,
            partition,
            offset: row.offset,
            ingested_at: format_timestamp(row.ingested_at),
            reason: "schema_mismatch".to_string(),
            error: reason.to_string(),
            data: row.to_json(),
        }
    }

    pub fn path(&self) -> Path {
        format_dead_letter_path(self.category.prefix(), self.partition, self.offset)
    }
}

impl ObjectStoreDeadLetterStore {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }
}

#[async_trait]
impl DeadLetterStore for ObjectStoreDeadLetterStore {
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let path = record.path();
        let data = serde_json::to_vec(record).context(EncodeSnafu {})?;

        let result = self
            .object_store
            .put_opts(
                &path,
                PutPayload::from_bytes(Bytes::from(data)),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(_) => {
                info!(
                    partition = %record.partition,
                    offset = record.offset,
                    category = ?record.category,
                    reason = %record.reason,
                    "record dead-lettered"
                );
                Ok(())
            }
            // Written by an earlier attempt.
            Err(object_store::Error::AlreadyExists { .. }) => Ok(()),
            Err(err) => Err(err).context(WriteSnafu {
                path: path.to_string(),
            }),
        }
    }
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored records ordered by category, partition and offset.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((record.category, record.partition, record.offset))
            .or_insert_with(|| record.clone());
        Ok(())
    }
}

impl DeadLetterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encode { .. } => ErrorKind::Internal,
            Self::Write { source, .. } => match source.as_ref() {
                object_store::Error::PermissionDenied { .. }
                | object_store::Error::Unauthenticated { .. } => ErrorKind::Permission,
                _ => ErrorKind::Temporary,
            },
        }
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    let timestamp: DateTime<Utc> = timestamp.into();
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn record() -> DeadLetterRecord {
        DeadLetterRecord::processing_failed(
            PartitionId::new(1),
            12,
            SystemTime::UNIX_EPOCH,
            br#"{"measure_value":"abc"}"#,
            &TransformError::InvalidValue {
                column: "measure_value".to_string(),
                message: "\"abc\" is not a number".to_string(),
            },
        )
    }

    #[test]
    fn test_processing_failed_record() {
        let record = record();
        assert_eq!(record.reason, "invalid_value");
        assert_eq!(record.ingested_at, "1970-01-01T00:00:00.000Z");
        assert_eq!(record.data["measure_value"], "abc");
        assert_eq!(
            record.path().as_ref(),
            "processing-failed/partition-00001/00000000000000000012.json"
        );
    }

    #[test]
    fn test_non_json_payload_is_kept_as_string() {
        let record = DeadLetterRecord::processing_failed(
            PartitionId::new(0),
            0,
            SystemTime::UNIX_EPOCH,
            b"not json",
            &TransformError::Malformed {
                message: "expected value".to_string(),
            },
        );
        assert_eq!(record.data, Value::String("not json".to_string()));
    }

    #[tokio::test]
    async fn test_object_store_append_is_idempotent() {
        let object_store = Arc::new(InMemory::new());
        let store = ObjectStoreDeadLetterStore::new(object_store.clone());

        store.append(&record()).await.unwrap();
        store.append(&record()).await.unwrap();

        let data = object_store
            .get(&record().path())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let stored: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(stored["offset"], 12);
        assert_eq!(stored["category"], "processing_failed");
    }
}
