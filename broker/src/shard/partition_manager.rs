use std::{cell::RefCell, collections::HashMap, rc::Rc};

use log::info;
use model::Ntp;

use super::ShardId;

/// Partition logs hosted by one shard. Lives on the shard thread only.
#[derive(Debug)]
pub struct PartitionManager<L> {
    shard: ShardId,
    partitions: RefCell<HashMap<Ntp, Rc<L>>>,
}

impl<L> PartitionManager<L> {
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            partitions: RefCell::new(HashMap::new()),
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn get(&self, ntp: &Ntp) -> Option<Rc<L>> {
        self.partitions.borrow().get(ntp).cloned()
    }

    /// Host `log` as partition `ntp`, replacing a log previously hosted under the same name.
    pub fn manage(&self, ntp: Ntp, log: L) {
        info!("Shard {} starts hosting {}", self.shard, ntp);
        self.partitions.borrow_mut().insert(ntp, Rc::new(log));
    }

    pub fn remove(&self, ntp: &Ntp) -> bool {
        let removed = self.partitions.borrow_mut().remove(ntp).is_some();
        if removed {
            info!("Shard {} stops hosting {}", self.shard, ntp);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.partitions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.borrow().is_empty()
    }

    pub fn ntps(&self) -> Vec<Ntp> {
        self.partitions.borrow().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use model::Ntp;

    use super::PartitionManager;
    use crate::storage::MemoryPartitionLog;

    #[test]
    fn test_manage() {
        let manager = PartitionManager::new(1);
        let ntp = Ntp::kafka("orders", 0);
        assert!(manager.get(&ntp).is_none());
        manager.manage(ntp.clone(), MemoryPartitionLog::new());
        assert_eq!(1, manager.len());
        assert!(manager.get(&ntp).is_some());
        assert_eq!(vec![ntp.clone()], manager.ntps());
        assert!(manager.remove(&ntp));
        assert!(!manager.remove(&ntp));
        assert!(manager.is_empty());
    }
}
