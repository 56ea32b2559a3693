//! Narrow interface to the replicated partition log that hosts the data of one partition.
//!
//! The storage engine itself lives outside of the fetch engine; the fetch path only needs
//! watermarks, leadership, a bounded read and the aborted-transaction index. Instances are owned by
//! exactly one shard and their futures are polled on that shard only.

use bytes::Bytes;
use model::{response::AbortedTransaction, ErrorCode};

pub mod memory;

pub use self::memory::{MemoryPartitionLog, RecordBatch};

/// Offsets of a partition log. All of them are exclusive upper bounds except `start_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOffsets {
    /// First offset still retained by the log.
    pub start_offset: i64,

    /// Offset up to which every replica has the data.
    pub high_watermark: i64,

    /// Offset up to which every transaction is resolved. Never greater than `high_watermark`.
    pub last_stable_offset: i64,
}

/// Options of a single bounded read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub start_offset: i64,

    /// Inclusive. Batches ending beyond this offset are not returned.
    pub max_offset: i64,

    pub max_bytes: usize,

    /// Only return batches that fit into `max_bytes`.
    pub strict_max_bytes: bool,

    /// Non-strict reads finding nothing that fits into `max_bytes` still return their first batch
    /// whole if it is no larger than this. Batches are never split.
    pub overshoot_max_bytes: usize,
}

/// Data returned by a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSlice {
    pub data: Bytes,

    /// Offset of the last record included, `None` if nothing was read.
    pub last_offset: Option<i64>,
}

#[allow(async_fn_in_trait)]
pub trait PartitionLog {
    fn offsets(&self) -> LogOffsets;

    fn is_leader(&self) -> bool;

    /// Read whole batches starting at `options.start_offset`. At most `options.max_bytes` bytes
    /// are returned, except for a single oversized first batch of a non-strict read.
    async fn read(&self, options: &ReadOptions) -> Result<LogSlice, ErrorCode>;

    /// Aborted transactions with at least one offset in `[first, last]`.
    fn aborted_transactions(&self, first: i64, last: i64) -> Vec<AbortedTransaction>;
}
