//! Decoded fetch request, as handed over by the wire protocol decoder.

use crate::{IsolationLevel, TopicPartition};

/// Session id meaning "no session".
pub const INVALID_SESSION_ID: i32 = 0;

/// Epoch that asks for a fresh session, or, with [`INVALID_SESSION_ID`], a sessionless fetch.
pub const INITIAL_EPOCH: i32 = 0;

/// Epoch that closes an existing session.
pub const FINAL_EPOCH: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPartition {
    pub partition_index: i32,

    /// Offset to start reading from.
    pub fetch_offset: i64,

    /// Upper bound of bytes to return for this partition. Within an incremental session request,
    /// zero marks the partition for removal from the session.
    pub max_bytes: i32,
}

impl FetchPartition {
    pub fn new(partition_index: i32, fetch_offset: i64, max_bytes: i32) -> Self {
        Self {
            partition_index,
            fetch_offset,
            max_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTopic {
    pub name: String,
    pub partitions: Vec<FetchPartition>,
}

/// Partitions an incremental session request drops from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgottenTopic {
    pub name: String,
    pub partitions: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Maximum time to wait for `min_bytes` to accumulate, in milliseconds.
    pub max_wait_ms: i32,

    /// Minimum bytes to accumulate before answering. Zero or negative means no minimum.
    pub min_bytes: i32,

    /// Upper bound of bytes to return across all partitions.
    pub max_bytes: i32,

    pub isolation_level: IsolationLevel,

    pub session_id: i32,

    pub session_epoch: i32,

    pub topics: Vec<FetchTopic>,

    pub forgotten_topics: Vec<ForgottenTopic>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            max_wait_ms: 0,
            min_bytes: 0,
            max_bytes: i32::MAX,
            isolation_level: IsolationLevel::ReadUncommitted,
            session_id: INVALID_SESSION_ID,
            session_epoch: INITIAL_EPOCH,
            topics: vec![],
            forgotten_topics: vec![],
        }
    }
}

impl FetchRequest {
    /// Iterate requested partitions in request order: topics as listed, partitions as listed
    /// within each topic.
    pub fn partitions(&self) -> impl Iterator<Item = (TopicPartition, &FetchPartition)> + '_ {
        self.topics.iter().flat_map(|topic| {
            topic
                .partitions
                .iter()
                .map(move |p| (TopicPartition::new(topic.name.clone(), p.partition_index), p))
        })
    }

    /// Iterate partitions listed in `forgotten_topics`.
    pub fn forgotten(&self) -> impl Iterator<Item = TopicPartition> + '_ {
        self.forgotten_topics.iter().flat_map(|topic| {
            topic
                .partitions
                .iter()
                .map(move |p| TopicPartition::new(topic.name.clone(), *p))
        })
    }

    pub fn partition_count(&self) -> usize {
        self.topics.iter().map(|t| t.partitions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partition_count() == 0
    }

    /// Append a partition to the request, grouping it under an existing trailing topic entry when
    /// the topic matches.
    pub fn add_partition(&mut self, topic: &str, partition: FetchPartition) {
        match self.topics.last_mut() {
            Some(last) if last.name == topic => last.partitions.push(partition),
            _ => self.topics.push(FetchTopic {
                name: topic.to_owned(),
                partitions: vec![partition],
            }),
        }
    }

    pub fn forget(&mut self, topic: &str, partition: i32) {
        match self.forgotten_topics.iter_mut().find(|t| t.name == topic) {
            Some(t) => t.partitions.push(partition),
            None => self.forgotten_topics.push(ForgottenTopic {
                name: topic.to_owned(),
                partitions: vec![partition],
            }),
        }
    }
}
