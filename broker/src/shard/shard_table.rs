use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;
use model::Ntp;
use parking_lot::RwLock;

use super::ShardId;

/// Maps a partition to the shard hosting it on this node.
#[cfg_attr(test, automock)]
pub trait PartitionLocator: Send + Sync {
    /// `None` if no replica of `ntp` is present on this node.
    fn shard_for(&self, ntp: &Ntp) -> Option<ShardId>;
}

/// Process-wide partition placement, updated as shards start or stop hosting partitions.
#[derive(Debug, Default)]
pub struct ShardTable {
    table: RwLock<HashMap<Ntp, ShardId>>,
}

impl ShardTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, ntp: Ntp, shard: ShardId) -> Option<ShardId> {
        self.table.write().insert(ntp, shard)
    }

    pub fn unassign(&self, ntp: &Ntp) -> Option<ShardId> {
        self.table.write().remove(ntp)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl PartitionLocator for ShardTable {
    fn shard_for(&self, ntp: &Ntp) -> Option<ShardId> {
        self.table.read().get(ntp).copied()
    }
}
