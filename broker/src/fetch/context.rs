use std::time::Duration;

use model::{fetch::FetchRequest, IsolationLevel, TopicPartition};
use tokio::time::Instant;

use super::{
    placeholder::{ResponseSlots, SlotId},
    read::ReadResult,
    session::FetchCursor,
};

/// Per-request execution state. Owned by the orchestrating task and never sent to shards.
#[derive(Debug)]
pub(crate) struct OpContext {
    /// Cursor of each slot, indexed by [`SlotId`].
    cursors: Vec<FetchCursor>,

    pub(crate) slots: ResponseSlots,

    pub(crate) min_bytes: i32,
    pub(crate) max_bytes: usize,
    pub(crate) isolation_level: IsolationLevel,

    /// Absolute deadline, computed once when the request is decoded.
    pub(crate) deadline: Instant,
    pub(crate) max_wait: Duration,

    pub(crate) response_size: usize,
    pub(crate) response_error: bool,

    pub(crate) initial_fetch: bool,
    pub(crate) passes: u32,
}

impl OpContext {
    pub(crate) fn new(
        request: &FetchRequest,
        partitions: Vec<(TopicPartition, FetchCursor)>,
        max_wait: Duration,
        now: Instant,
    ) -> Self {
        let (tps, cursors): (Vec<_>, Vec<_>) = partitions.into_iter().unzip();
        Self {
            cursors,
            slots: ResponseSlots::create_placeholders(tps),
            min_bytes: request.min_bytes,
            max_bytes: usize::try_from(request.max_bytes).unwrap_or_default(),
            isolation_level: request.isolation_level,
            deadline: now + max_wait,
            max_wait,
            response_size: 0,
            response_error: false,
            initial_fetch: true,
            passes: 0,
        }
    }

    pub(crate) fn cursor(&self, id: SlotId) -> Option<&FetchCursor> {
        self.cursors.get(id.0)
    }

    pub(crate) fn begin_pass(&mut self) {
        self.passes += 1;
        self.initial_fetch = self.passes == 1;
        self.slots.begin_pass();
    }

    /// Bytes of the request budget not consumed by data already in the response.
    pub(crate) fn bytes_left(&self) -> usize {
        self.max_bytes.saturating_sub(self.response_size)
    }

    /// `min_bytes` is a signed 32-bit field; sizes beyond its range saturate, and a non-positive
    /// minimum is always satisfied.
    pub(crate) fn over_min_bytes(&self) -> bool {
        i32::try_from(self.response_size).unwrap_or(i32::MAX) >= self.min_bytes
    }

    pub(crate) fn is_empty_request(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn deadline_reached(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub(crate) fn should_stop_fetch(&self, now: Instant) -> bool {
        self.max_wait.is_zero()
            || self.over_min_bytes()
            || self.is_empty_request()
            || self.slots.pending().next().is_none()
            || self.response_error
            || self.bytes_left() == 0
            || self.deadline_reached(now)
    }

    /// Place a partition result into its slot and fold it into the running totals.
    pub(crate) fn record(&mut self, id: SlotId, result: ReadResult) -> bool {
        let size = result.records_size();
        let error = result.is_error();
        if !self.slots.set(id, result) {
            return false;
        }
        self.response_size += size;
        self.response_error |= error;
        true
    }
}
