use std::{cell::RefCell, collections::BTreeMap};

use bytes::{Bytes, BytesMut};
use log::{trace, warn};
use model::{response::AbortedTransaction, ErrorCode};

use super::{LogOffsets, LogSlice, PartitionLog, ReadOptions};

/// Payload of the control batch that marks the end of a transaction.
const CONTROL_MARKER: &[u8] = b"\0ctrl";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub base_offset: i64,
    pub record_count: i32,
    pub producer_id: Option<i64>,

    /// Commit/abort marker written when a transaction ends.
    pub control: bool,
    pub payload: Bytes,
}

impl RecordBatch {
    pub fn last_offset(&self) -> i64 {
        self.base_offset + self.record_count as i64 - 1
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenTransaction {
    first_offset: i64,
    last_offset: i64,
}

#[derive(Debug)]
struct Inner {
    start_offset: i64,

    /// Offset the next appended batch gets.
    next_offset: i64,

    /// Replication bound. `None` means every appended batch counts as replicated.
    replicated: Option<i64>,

    batches: Vec<RecordBatch>,

    /// Producer id to its ongoing transaction.
    open: BTreeMap<i64, OpenTransaction>,

    aborted: Vec<AbortedTransaction>,

    leader: bool,
}

/// Partition log kept in memory.
///
/// Note that `MemoryPartitionLog` is intended to be owned by a single shard and is not thread-safe.
/// It may be built on one thread and handed to its shard afterwards.
#[derive(Debug)]
pub struct MemoryPartitionLog {
    inner: RefCell<Inner>,
}

impl Default for MemoryPartitionLog {
    fn default() -> Self {
        Self::with_start_offset(0)
    }
}

impl MemoryPartitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_offset(start_offset: i64) -> Self {
        Self {
            inner: RefCell::new(Inner {
                start_offset,
                next_offset: start_offset,
                replicated: None,
                batches: vec![],
                open: BTreeMap::new(),
                aborted: vec![],
                leader: true,
            }),
        }
    }

    /// Append a non-transactional batch of `record_count` records; returns its base offset.
    pub fn append(&self, payload: Bytes, record_count: i32) -> i64 {
        self.append_batch(None, false, payload, record_count)
    }

    /// Append a batch on behalf of `producer_id`, opening a transaction if none is ongoing.
    pub fn append_transactional(&self, producer_id: i64, payload: Bytes, record_count: i32) -> i64 {
        let base_offset = self.append_batch(Some(producer_id), false, payload, record_count);
        let last_offset = base_offset + record_count.max(1) as i64 - 1;
        let mut inner = self.inner.borrow_mut();
        inner
            .open
            .entry(producer_id)
            .and_modify(|tx| tx.last_offset = last_offset)
            .or_insert(OpenTransaction {
                first_offset: base_offset,
                last_offset,
            });
        base_offset
    }

    /// Write a commit marker for the ongoing transaction of `producer_id`.
    pub fn commit_transaction(&self, producer_id: i64) -> bool {
        self.end_transaction(producer_id, false)
    }

    /// Write an abort marker for the ongoing transaction of `producer_id` and index its range.
    pub fn abort_transaction(&self, producer_id: i64) -> bool {
        self.end_transaction(producer_id, true)
    }

    pub fn set_leader(&self, leader: bool) {
        self.inner.borrow_mut().leader = leader;
    }

    /// Pin the high watermark below the log end, as if followers lagged behind.
    /// `None` lets it follow the log end again.
    pub fn set_high_watermark(&self, high_watermark: Option<i64>) {
        self.inner.borrow_mut().replicated = high_watermark;
    }

    /// Drop batches that end before `offset`, advancing the log start offset.
    pub fn truncate_prefix(&self, offset: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.batches.retain(|b| b.last_offset() >= offset);
        inner.start_offset = offset.min(inner.next_offset);
    }

    pub fn batch_count(&self) -> usize {
        self.inner.borrow().batches.len()
    }

    fn append_batch(
        &self,
        producer_id: Option<i64>,
        control: bool,
        payload: Bytes,
        record_count: i32,
    ) -> i64 {
        let mut inner = self.inner.borrow_mut();
        let base_offset = inner.next_offset;
        let record_count = record_count.max(1);
        inner.batches.push(RecordBatch {
            base_offset,
            record_count,
            producer_id,
            control,
            payload,
        });
        inner.next_offset += record_count as i64;
        trace!(
            "Appended batch [{}, {}] of producer {:?}",
            base_offset,
            inner.next_offset - 1,
            producer_id
        );
        base_offset
    }

    fn end_transaction(&self, producer_id: i64, abort: bool) -> bool {
        let tx = match self.inner.borrow_mut().open.remove(&producer_id) {
            Some(tx) => tx,
            None => {
                warn!("Producer {} has no ongoing transaction", producer_id);
                return false;
            }
        };
        if abort {
            self.inner.borrow_mut().aborted.push(AbortedTransaction {
                producer_id,
                first_offset: tx.first_offset,
                last_offset: tx.last_offset,
            });
        }
        self.append_batch(
            Some(producer_id),
            true,
            Bytes::from_static(CONTROL_MARKER),
            1,
        );
        true
    }
}

impl Inner {
    fn high_watermark(&self) -> i64 {
        match self.replicated {
            Some(hw) => hw.clamp(self.start_offset, self.next_offset),
            None => self.next_offset,
        }
    }

    fn last_stable_offset(&self) -> i64 {
        let hw = self.high_watermark();
        self.open
            .values()
            .map(|tx| tx.first_offset)
            .min()
            .map_or(hw, |first| first.min(hw))
    }
}

impl PartitionLog for MemoryPartitionLog {
    fn offsets(&self) -> LogOffsets {
        let inner = self.inner.borrow();
        LogOffsets {
            start_offset: inner.start_offset,
            high_watermark: inner.high_watermark(),
            last_stable_offset: inner.last_stable_offset(),
        }
    }

    fn is_leader(&self) -> bool {
        self.inner.borrow().leader
    }

    async fn read(&self, options: &ReadOptions) -> Result<LogSlice, ErrorCode> {
        let inner = self.inner.borrow();
        if options.start_offset < inner.start_offset {
            return Err(ErrorCode::OffsetOutOfRange);
        }

        let first = inner
            .batches
            .partition_point(|b| b.last_offset() < options.start_offset);

        let mut buf = BytesMut::new();
        let mut last_offset = None;
        for batch in &inner.batches[first..] {
            if batch.last_offset() > options.max_offset {
                break;
            }

            if buf.len() + batch.size() <= options.max_bytes {
                buf.extend_from_slice(&batch.payload);
                last_offset = Some(batch.last_offset());
                continue;
            }

            // An oversized first batch goes out whole, within the allowance.
            if !options.strict_max_bytes
                && buf.is_empty()
                && batch.size() <= options.overshoot_max_bytes
            {
                buf.extend_from_slice(&batch.payload);
                last_offset = Some(batch.last_offset());
            }
            break;
        }

        Ok(LogSlice {
            data: buf.freeze(),
            last_offset,
        })
    }

    fn aborted_transactions(&self, first: i64, last: i64) -> Vec<AbortedTransaction> {
        self.inner
            .borrow()
            .aborted
            .iter()
            .filter(|tx| tx.overlaps(first, last))
            .copied()
            .collect()
    }
}
