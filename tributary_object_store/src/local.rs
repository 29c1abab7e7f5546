//! Object store factories backed by the local machine.
//!
//! `LocalFileSystemFactory` maps each bucket to a subdirectory of a root
//! directory. `TemporaryFileSystemFactory` does the same inside a temporary
//! directory that is removed when the factory is dropped, which is what the
//! `dev` command and the tests use. `InMemoryObjectStoreFactory` keeps
//! everything in memory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use object_store::{Error as ObjectStoreError, ObjectStore, local::LocalFileSystem, memory::InMemory};
use tempfile::TempDir;

use crate::ObjectStoreFactory;

const LOCAL_STORE: &str = "LocalFileSystem";
const TEMPORARY_STORE: &str = "TemporaryFileSystem";
const IN_MEMORY_STORE: &str = "InMemory";

/// Stores each bucket in a subdirectory of `root_path`.
pub struct LocalFileSystemFactory {
    root_path: PathBuf,
}

impl LocalFileSystemFactory {
    /// Fails if `root_path` doesn't exist.
    pub fn new(root_path: impl AsRef<Path>) -> Result<Self, ObjectStoreError> {
        let root_path =
            std::fs::canonicalize(root_path.as_ref()).map_err(|err| store_error(LOCAL_STORE, err))?;
        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_bucket_name(LOCAL_STORE, bucket)?;
        let path = self.root_path.join(bucket);
        std::fs::create_dir_all(&path).map_err(|err| store_error(LOCAL_STORE, err))?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for LocalFileSystemFactory {
    async fn create_object_store(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        let store = LocalFileSystem::new_with_prefix(self.bucket_path(bucket)?)?;
        Ok(Arc::new(store))
    }
}

/// A [`LocalFileSystemFactory`] rooted in a directory that is removed on drop.
pub struct TemporaryFileSystemFactory {
    inner: LocalFileSystemFactory,
    _root: TempDir,
}

impl TemporaryFileSystemFactory {
    pub fn new() -> Result<Self, ObjectStoreError> {
        let root = tempfile::Builder::new()
            .prefix("tributary-")
            .tempdir()
            .map_err(|err| store_error(TEMPORARY_STORE, err))?;
        let inner = LocalFileSystemFactory::new(root.path())?;
        Ok(Self { inner, _root: root })
    }

    pub fn root_path(&self) -> &Path {
        self.inner.root_path()
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for TemporaryFileSystemFactory {
    async fn create_object_store(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        self.inner.create_object_store(bucket).await
    }
}

/// Returns the same in-memory store every time a bucket is requested.
#[derive(Default)]
pub struct InMemoryObjectStoreFactory {
    buckets: Mutex<HashMap<String, Arc<InMemory>>>,
}

impl InMemoryObjectStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ObjectStoreFactory for InMemoryObjectStoreFactory {
    async fn create_object_store(
        &self,
        bucket: &str,
    ) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        validate_bucket_name(IN_MEMORY_STORE, bucket)?;

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let store = buckets.entry(bucket.to_string()).or_default().clone();
        Ok(store)
    }
}

fn store_error(
    store: &'static str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ObjectStoreError {
    ObjectStoreError::Generic {
        store,
        source: Box::new(source),
    }
}

/// Bucket names become a single path segment.
fn validate_bucket_name(store: &'static str, bucket: &str) -> Result<(), ObjectStoreError> {
    if matches!(bucket, "" | "." | "..") || bucket.contains(['/', '\\']) {
        return Err(store_error(
            store,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bucket name: {bucket:?}"),
            ),
        ));
    }
    Ok(())
}
