//! # Partitioner
//!
//! Routing of keyed events to parallel workers.

use super::*;

/// Trait for partitioning data across parallel instances.
pub trait Partitioner<T: ?Sized>: Send + Sync {
    /// Determine which partition (0..num_partitions) this value should go to.
    fn partition(&self, value: &T, num_partitions: usize) -> usize;
}

/// Stable hash of any key, fixed across processes and builds.
pub fn stable_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    BuildHasherDefault::<SeaHasher>::default().hash_one(key)
}

/// Routes [`HitEvent`]s to workers by host.
///
/// Uses SeaHash rather than a randomly seeded hasher: worker snapshots are
/// only valid if a restarted pipeline sends every host to the worker that
/// held it before.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPartitioner;

impl KeyPartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Worker owning `host` among `parallelism` workers.
    pub fn worker_for_host(&self, host: &str, parallelism: usize) -> WorkerId {
        (stable_hash(host) % parallelism as u64) as WorkerId
    }
}

impl Partitioner<HitEvent> for KeyPartitioner {
    fn partition(&self, value: &HitEvent, num_partitions: usize) -> usize {
        self.worker_for_host(&value.host, num_partitions)
    }
}

impl Partitioner<str> for KeyPartitioner {
    fn partition(&self, value: &str, num_partitions: usize) -> usize {
        self.worker_for_host(value, num_partitions)
    }
}
