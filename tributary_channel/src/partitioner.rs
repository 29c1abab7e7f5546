use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use tributary_resources::{PartitionId, PartitionStrategy};

/// Chooses the partition of an appended record.
#[derive(Debug)]
pub struct Partitioner {
    strategy: PartitionStrategy,
    num_partitions: u32,
    next: AtomicU64,
}

impl Partitioner {
    pub fn new(strategy: PartitionStrategy, num_partitions: u32) -> Self {
        debug_assert!(num_partitions > 0);
        Self {
            strategy,
            num_partitions: num_partitions.max(1),
            next: AtomicU64::new(0),
        }
    }

    pub fn route(&self, partition_key: Option<&str>) -> PartitionId {
        match (self.strategy, partition_key) {
            (PartitionStrategy::Keyed, Some(key)) => self.route_by_key(key),
            _ => self.round_robin(),
        }
    }

    fn round_robin(&self) -> PartitionId {
        let next = self.next.fetch_add(1, Ordering::Relaxed);
        PartitionId::new((next % self.num_partitions as u64) as u32)
    }

    fn route_by_key(&self, key: &str) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        PartitionId::new((hasher.finish() % self.num_partitions as u64) as u32)
    }
}
