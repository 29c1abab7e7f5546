//! The ingestion pipeline.
//!
//! Records flow from the ingestion channel through the transform stage into a
//! per-partition batch buffer. Sealed batches are converted to Parquet and
//! written to the durable sink by the flush controller, which retries failed
//! writes and quarantines batches that keep failing.
pub mod alert;
pub mod batcher;
pub mod converter;
pub mod dead_letter;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod quarantine;
pub mod transform;

pub use alert::{Alert, AlertSink, CollectingAlertSink, TracingAlertSink};
pub use batcher::{Batch, BatchBuffer, BatchEntry, BatchState, FlushReason};
pub use converter::{ColumnarBlock, FormatConverter, read_block, read_block_rows};
pub use dead_letter::{
    DeadLetterCategory, DeadLetterRecord, DeadLetterStore, InMemoryDeadLetterStore,
    ObjectStoreDeadLetterStore,
};
pub use error::{IngestorError, Result};
pub use flush::{FlushController, FlushError, FlushOutcome};
pub use pipeline::{CommitTracker, Pipeline};
pub use producer::{Producer, ProducerOptions, RecordGenerator};
pub use quarantine::{ObjectStoreQuarantineStore, QuarantineReason, QuarantineStore};
pub use transform::{FlattenedRow, TransformError, Transformer};
