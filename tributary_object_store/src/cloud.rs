//! Object store factory for Amazon S3.

use std::sync::Arc;

use object_store::{
    Error as ObjectStoreError, ObjectStore,
    aws::{AmazonS3Builder, S3CopyIfNotExists},
    prefix::PrefixStore,
};

use crate::ObjectStoreFactory;

/// Creates S3 clients configured from the standard `AWS_*` environment
/// variables.
#[derive(Debug, Clone, Default)]
pub struct AmazonS3Factory {
    prefix: Option<String>,
    endpoint: Option<String>,
}

impl AmazonS3Factory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes all objects under `prefix` inside the bucket.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Uses an S3-compatible endpoint, such as MinIO, instead of AWS.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for AmazonS3Factory {
    async fn create_object_store(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_copy_if_not_exists(S3CopyIfNotExists::Multipart);

        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build()?;

        let Some(prefix) = &self.prefix else {
            return Ok(Arc::new(store));
        };

        Ok(Arc::new(PrefixStore::new(store, prefix.as_str())))
    }
}
