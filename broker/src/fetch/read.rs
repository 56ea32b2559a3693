use bytes::Bytes;
use futures::future::join_all;
use log::{trace, warn};
use model::{
    response::{AbortedTransaction, PartitionResponse},
    ErrorCode, IsolationLevel, Ntp,
};
use tokio::time::{timeout_at, Instant};

use crate::{
    shard::PartitionManager,
    storage::{PartitionLog, ReadOptions},
};

use super::{placeholder::SlotId, planner::ShardFetch};

/// Read parameters of a single partition within one planning pass.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub start_offset: i64,

    /// Bytes reserved for this partition by the planner.
    pub max_bytes: usize,

    pub isolation_level: IsolationLevel,

    /// Absolute deadline of the whole fetch operation.
    pub deadline: Instant,

    pub strict_max_bytes: bool,

    /// Allowance for an oversized first batch of a non-strict read.
    pub overshoot_max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct NtpFetchConfig {
    pub ntp: Ntp,
    pub config: FetchConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedData {
    pub records: Bytes,
    pub start_offset: i64,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,

    /// Only present for read-committed reads.
    pub aborted_transactions: Option<Vec<AbortedTransaction>>,
}

/// Outcome of reading one partition.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult {
    Error(ErrorCode),
    Data(FetchedData),
}

impl ReadResult {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ReadResult::Error(code) => *code,
            ReadResult::Data(_) => ErrorCode::None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ReadResult::Error(_))
    }

    pub fn records_size(&self) -> usize {
        match self {
            ReadResult::Error(_) => 0,
            ReadResult::Data(data) => data.records.len(),
        }
    }

    pub fn into_partition_response(self, partition_index: i32) -> PartitionResponse {
        match self {
            ReadResult::Error(code) => PartitionResponse::with_error(partition_index, code),
            ReadResult::Data(data) => PartitionResponse {
                partition_index,
                error_code: ErrorCode::None,
                high_watermark: data.high_watermark,
                last_stable_offset: data.last_stable_offset,
                log_start_offset: data.log_start_offset,
                aborted_transactions: data.aborted_transactions,
                records: Some(data.records),
            },
        }
    }
}

/// Read one partition hosted by the current shard.
///
/// Read-committed reads are bounded by the last stable offset, read-uncommitted reads by the high
/// watermark. A start offset at the bound yields an empty result that still carries watermarks.
pub async fn read_from_ntp<L: PartitionLog>(
    manager: &PartitionManager<L>,
    ntp_config: &NtpFetchConfig,
) -> ReadResult {
    let ntp = &ntp_config.ntp;
    let config = &ntp_config.config;
    let log = match manager.get(ntp) {
        Some(log) => log,
        None => {
            warn!("Partition {} is not hosted by shard {}", ntp, manager.shard());
            return ReadResult::Error(ErrorCode::UnknownTopicOrPartition);
        }
    };

    if !log.is_leader() {
        return ReadResult::Error(ErrorCode::NotLeaderForPartition);
    }

    let offsets = log.offsets();
    if config.start_offset < offsets.start_offset || config.start_offset > offsets.high_watermark {
        trace!(
            "Offset {} of {} is out of range [{}, {}]",
            config.start_offset,
            ntp,
            offsets.start_offset,
            offsets.high_watermark
        );
        return ReadResult::Error(ErrorCode::OffsetOutOfRange);
    }

    let read_committed = config.isolation_level == IsolationLevel::ReadCommitted;
    let bound = if read_committed {
        offsets.last_stable_offset
    } else {
        offsets.high_watermark
    };

    let mut data = FetchedData {
        records: Bytes::new(),
        start_offset: config.start_offset,
        high_watermark: offsets.high_watermark,
        last_stable_offset: offsets.last_stable_offset,
        log_start_offset: offsets.start_offset,
        aborted_transactions: read_committed.then(Vec::new),
    };

    if config.start_offset >= bound {
        return ReadResult::Data(data);
    }

    let options = ReadOptions {
        start_offset: config.start_offset,
        max_offset: bound - 1,
        max_bytes: config.max_bytes,
        strict_max_bytes: config.strict_max_bytes,
        overshoot_max_bytes: config.overshoot_max_bytes.max(config.max_bytes),
    };

    // A read that completes without waiting is never cut short, even past the deadline.
    let slice = match timeout_at(config.deadline, log.read(&options)).await {
        Ok(Ok(slice)) => slice,
        Ok(Err(code)) => return ReadResult::Error(code),
        Err(_) => {
            warn!("Read of {} did not complete before the deadline", ntp);
            return ReadResult::Error(ErrorCode::RequestTimedOut);
        }
    };

    if read_committed {
        if let Some(last_offset) = slice.last_offset {
            data.aborted_transactions =
                Some(log.aborted_transactions(config.start_offset, last_offset));
        }
    }
    data.records = slice.data;
    trace!(
        "Read {} bytes from {} starting at {}",
        data.records.len(),
        ntp,
        config.start_offset
    );
    ReadResult::Data(data)
}

/// Execute the part of a fetch plan assigned to the current shard. Partitions are read
/// concurrently; each result is tagged with the slot it belongs to.
pub async fn execute_shard_fetch<L: PartitionLog>(
    manager: &PartitionManager<L>,
    fetch: ShardFetch,
) -> Vec<(SlotId, ReadResult)> {
    let reads = fetch
        .requests
        .iter()
        .map(|request| read_from_ntp(manager, request));
    let results = join_all(reads).await;
    fetch.responses.into_iter().zip(results).collect()
}
