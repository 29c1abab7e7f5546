use std::sync::Arc;

use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};

pub async fn list_paths(store: &Arc<dyn ObjectStore>) -> Vec<String> {
    let mut paths = store
        .list(None)
        .map_ok(|meta| meta.location.to_string())
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    paths.sort();
    paths
}

pub async fn read(store: &Arc<dyn ObjectStore>, path: &Path) -> Vec<u8> {
    store.get(path).await.unwrap().bytes().await.unwrap().to_vec()
}
