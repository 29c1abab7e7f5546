use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, path::Path};
use snafu::{ResultExt, Snafu};
use tracing::debug;
use tributary_resources::ErrorKind;

/// Errors returned by a durable sink.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    #[snafu(display("Object store error: {message}"))]
    ObjectStore {
        message: String,
        source: Arc<object_store::Error>,
    },
    /// A fault that may go away on its own, such as a network error.
    #[snafu(display("Sink unavailable: {message}"))]
    Unavailable { message: String },
    /// A fault that needs an operator, such as revoked credentials.
    #[snafu(display("Sink access denied: {message}"))]
    AccessDenied { message: String },
}

/// Storage for committed blocks.
///
/// Puts are atomic: readers see either the previous object or the complete
/// new one. Writing the same bytes to the same path twice has the same effect
/// as writing them once.
#[async_trait]
pub trait DurableSink: Send + Sync + 'static {
    async fn put(&self, path: &Path, data: Bytes) -> Result<(), SinkError>;
}

/// A durable sink writing to an object store.
#[derive(Clone)]
pub struct ObjectStoreSink {
    object_store: Arc<dyn ObjectStore>,
}

impl ObjectStoreSink {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }
}

#[async_trait]
impl DurableSink for ObjectStoreSink {
    async fn put(&self, path: &Path, data: Bytes) -> Result<(), SinkError> {
        let size_bytes = data.len();

        // Object store puts are atomic. Overwriting keeps replays idempotent
        // since a replayed batch produces the same bytes.
        self.object_store
            .put_opts(
                path,
                PutPayload::from_bytes(data),
                PutOptions {
                    mode: PutMode::Overwrite,
                    ..Default::default()
                },
            )
            .await
            .map_err(Arc::new)
            .context(ObjectStoreSnafu {
                message: format!("failed to put {path}"),
            })?;

        debug!(%path, size_bytes, "object written");

        Ok(())
    }
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ObjectStore { source, .. } => object_store_error_kind(source),
            Self::Unavailable { .. } => ErrorKind::Temporary,
            Self::AccessDenied { .. } => ErrorKind::Permission,
        }
    }

    /// Whether retrying can't succeed without operator intervention.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Permission | ErrorKind::Configuration | ErrorKind::Validation
        )
    }
}

fn object_store_error_kind(error: &object_store::Error) -> ErrorKind {
    use object_store::Error;

    match error {
        Error::PermissionDenied { .. } | Error::Unauthenticated { .. } => ErrorKind::Permission,
        Error::InvalidPath { .. } | Error::NotSupported { .. } | Error::NotImplemented => {
            ErrorKind::Configuration
        }
        Error::UnknownConfigurationKey { .. } => ErrorKind::Configuration,
        Error::AlreadyExists { .. } | Error::Precondition { .. } => ErrorKind::Conflict,
        Error::NotModified { .. } => ErrorKind::Conflict,
        Error::NotFound { .. } => ErrorKind::NotFound,
        _ => ErrorKind::Temporary,
    }
}
