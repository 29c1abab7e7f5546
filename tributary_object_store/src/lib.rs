//! Object store access for the pipeline.
//!
//! The `ObjectStoreFactory` trait creates `ObjectStore` clients for a named
//! bucket, so that components don't need to know whether they write to S3 or
//! to a local directory. The `DurableSink` trait is the narrow interface the
//! flush controller uses to commit columnar blocks.

pub mod cloud;
pub mod local;
pub mod paths;
mod sink;

use std::sync::Arc;

use object_store::ObjectStore;

pub use self::{
    cloud::AmazonS3Factory,
    local::{InMemoryObjectStoreFactory, LocalFileSystemFactory, TemporaryFileSystemFactory},
    sink::{DurableSink, ObjectStoreSink, SinkError},
};

/// Factory trait for creating ObjectStore instances by bucket name.
#[async_trait::async_trait]
pub trait ObjectStoreFactory: Send + Sync {
    /// Create an ObjectStore instance for the given bucket.
    async fn create_object_store(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ObjectStore>, object_store::Error>;
}
