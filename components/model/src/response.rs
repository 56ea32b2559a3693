//! Assembled fetch response, as handed to the wire protocol encoder.

use bytes::Bytes;
use derivative::Derivative;

use crate::ErrorCode;

/// Range of offsets written by a transaction that was later aborted.
///
/// Read-committed consumers use these to drop records of aborted transactions client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbortedTransaction {
    pub producer_id: i64,

    /// First offset written by the transaction, inclusive.
    pub first_offset: i64,

    /// Last offset written by the transaction, inclusive.
    pub last_offset: i64,
}

impl AbortedTransaction {
    pub fn overlaps(&self, first: i64, last: i64) -> bool {
        self.first_offset <= last && self.last_offset >= first
    }
}

#[derive(Derivative, Clone, PartialEq)]
#[derivative(Debug, Default)]
pub struct PartitionResponse {
    pub partition_index: i32,

    pub error_code: ErrorCode,

    #[derivative(Default(value = "-1"))]
    pub high_watermark: i64,

    #[derivative(Default(value = "-1"))]
    pub last_stable_offset: i64,

    #[derivative(Default(value = "-1"))]
    pub log_start_offset: i64,

    pub aborted_transactions: Option<Vec<AbortedTransaction>>,

    #[derivative(Debug(format_with = "fmt_records"))]
    pub records: Option<Bytes>,
}

fn fmt_records(records: &Option<Bytes>, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match records {
        Some(buf) => write!(f, "Some({} bytes)", buf.len()),
        None => write!(f, "None"),
    }
}

impl PartitionResponse {
    pub fn new(partition_index: i32) -> Self {
        Self {
            partition_index,
            ..Default::default()
        }
    }

    pub fn with_error(partition_index: i32, error_code: ErrorCode) -> Self {
        Self {
            partition_index,
            error_code,
            ..Default::default()
        }
    }

    pub fn records_size(&self) -> usize {
        self.records.as_ref().map(|r| r.len()).unwrap_or(0)
    }

    pub fn has_records(&self) -> bool {
        self.records_size() > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchableTopicResponse {
    pub name: String,
    pub partitions: Vec<PartitionResponse>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub throttle_time_ms: i32,

    /// Top-level error. Set only for errors that abort the whole request.
    pub error_code: ErrorCode,

    /// Session the client should use for its next request; zero when sessionless.
    pub session_id: i32,

    /// Epoch the client should send next on `session_id`; zero when sessionless.
    pub session_epoch: i32,

    pub topics: Vec<FetchableTopicResponse>,
}

impl FetchResponse {
    pub fn with_error(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            ..Default::default()
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&str, &PartitionResponse)> + '_ {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(move |p| (t.name.as_str(), p)))
    }

    pub fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionResponse> {
        self.partitions()
            .find(|(t, p)| *t == topic && p.partition_index == partition)
            .map(|(_, p)| p)
    }

    /// Total bytes of record data across all partitions.
    pub fn records_size(&self) -> usize {
        self.partitions().map(|(_, p)| p.records_size()).sum()
    }
}
