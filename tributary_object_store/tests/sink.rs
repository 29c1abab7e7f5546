use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use tributary_object_store::{
    DurableSink, ObjectStoreFactory, ObjectStoreSink, TemporaryFileSystemFactory,
    paths::format_block_path,
};
use tributary_resources::PartitionId;

mod common;

use common::{list_paths, read};

#[tokio::test]
async fn test_put_twice_is_the_same_as_once() {
    let factory = TemporaryFileSystemFactory::new().unwrap();
    let store = factory.create_object_store("delivery").await.unwrap();
    let sink = ObjectStoreSink::new(store.clone());

    let path = format_block_path(
        "data",
        PartitionId::new(0),
        0,
        UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    );
    let block = Bytes::from_static(b"PAR1 block PAR1");

    sink.put(&path, block.clone()).await.unwrap();
    let after_first = list_paths(&store).await;

    sink.put(&path, block.clone()).await.unwrap();
    let after_second = list_paths(&store).await;

    assert_eq!(after_first, after_second);
    assert_eq!(after_second, vec![path.to_string()]);
    assert_eq!(read(&store, &path).await, block.to_vec());
}
