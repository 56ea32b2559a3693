use std::time::Instant;

use indexmap::{map::Entry, IndexMap};
use model::{fetch::FetchPartition, response::PartitionResponse, TopicPartition};

/// Where a session partition is read from next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCursor {
    pub fetch_offset: i64,
    pub max_bytes: i32,
}

impl From<&FetchPartition> for FetchCursor {
    fn from(partition: &FetchPartition) -> Self {
        Self {
            fetch_offset: partition.fetch_offset,
            max_bytes: partition.max_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchSessionPartition {
    pub tp: TopicPartition,
    pub cursor: FetchCursor,

    // Values carried by the last response that included this partition.
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
}

impl FetchSessionPartition {
    fn new(tp: TopicPartition, cursor: FetchCursor) -> Self {
        Self {
            tp,
            cursor,
            high_watermark: -1,
            last_stable_offset: -1,
            log_start_offset: -1,
        }
    }

    /// Whether `response` carries anything the client has not seen yet.
    pub fn should_report(&self, response: &PartitionResponse) -> bool {
        response.error_code.is_err()
            || response.has_records()
            || response.high_watermark != self.high_watermark
            || response.last_stable_offset != self.last_stable_offset
            || response.log_start_offset != self.log_start_offset
    }

    pub fn update(&mut self, response: &PartitionResponse) {
        self.high_watermark = response.high_watermark;
        self.last_stable_offset = response.last_stable_offset;
        self.log_start_offset = response.log_start_offset;
    }
}

/// Insertion-ordered set of session partitions.
#[derive(Debug, Default, Clone)]
pub struct SessionPartitions {
    entries: IndexMap<TopicPartition, FetchSessionPartition>,
}

impl SessionPartitions {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tp: &TopicPartition) -> Option<&FetchSessionPartition> {
        self.entries.get(tp)
    }

    pub fn get_mut(&mut self, tp: &TopicPartition) -> Option<&mut FetchSessionPartition> {
        self.entries.get_mut(tp)
    }

    /// Update the cursor of an existing partition in place, or append a new one.
    pub fn upsert(&mut self, tp: TopicPartition, cursor: FetchCursor) {
        match self.entries.entry(tp) {
            Entry::Occupied(mut entry) => entry.get_mut().cursor = cursor,
            Entry::Vacant(entry) => {
                let tp = entry.key().clone();
                entry.insert(FetchSessionPartition::new(tp, cursor));
            }
        }
    }

    /// Remove a partition, keeping the order of the others.
    pub fn remove(&mut self, tp: &TopicPartition) -> Option<FetchSessionPartition> {
        self.entries.shift_remove(tp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FetchSessionPartition> {
        self.entries.values()
    }

    pub fn cursors(&self) -> Vec<(TopicPartition, FetchCursor)> {
        self.entries
            .iter()
            .map(|(tp, entry)| (tp.clone(), entry.cursor))
            .collect()
    }
}

/// Server side state of an incremental fetch session.
#[derive(Debug)]
pub struct FetchSession {
    pub id: i32,

    /// Epoch the next request on this session has to carry.
    pub epoch: i32,

    pub partitions: SessionPartitions,

    /// Set while a request is being served on this session.
    pub in_use: bool,

    pub last_used: Instant,
}

impl FetchSession {
    pub fn new(id: i32, partitions: SessionPartitions, now: Instant) -> Self {
        Self {
            id,
            epoch: 1,
            partitions,
            in_use: false,
            last_used: now,
        }
    }

    pub fn bump_epoch(&mut self) {
        self.epoch = next_epoch(self.epoch);
    }
}

/// Epochs grow monotonically and wrap back to 1, skipping the initial and final markers.
pub fn next_epoch(epoch: i32) -> i32 {
    if epoch >= i32::MAX || epoch < 1 {
        1
    } else {
        epoch + 1
    }
}
