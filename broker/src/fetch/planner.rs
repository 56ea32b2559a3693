use log::{debug, trace};
use model::{ErrorCode, Ntp};

use crate::shard::{PartitionLocator, ShardId};

use super::{
    context::OpContext,
    placeholder::SlotId,
    read::{FetchConfig, NtpFetchConfig, ReadResult},
};

/// Work a single shard executes in one pass. `requests[i]` belongs to `responses[i]`.
#[derive(Debug)]
pub struct ShardFetch {
    pub shard: ShardId,
    pub requests: Vec<NtpFetchConfig>,
    pub responses: Vec<SlotId>,
}

impl ShardFetch {
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            requests: vec![],
            responses: vec![],
        }
    }

    pub fn push_back(&mut self, config: NtpFetchConfig, slot: SlotId) {
        self.requests.push(config);
        self.responses.push(slot);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[derive(Debug)]
pub struct FetchPlan {
    /// Indexed by shard id.
    pub fetches_per_shard: Vec<ShardFetch>,
}

impl FetchPlan {
    fn new(shard_count: usize) -> Self {
        Self {
            fetches_per_shard: (0..shard_count).map(ShardFetch::new).collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.fetches_per_shard.iter().map(ShardFetch::len).sum()
    }

    /// Non-empty shard fetches.
    pub fn into_fetches(self) -> impl Iterator<Item = ShardFetch> {
        self.fetches_per_shard
            .into_iter()
            .filter(|fetch| !fetch.is_empty())
    }
}

/// Plan one pass over every pending slot of `ctx`.
///
/// Each partition gets `min(partition max bytes, request bytes not yet reserved)`, so the sum of
/// caps never exceeds what is left of the request budget. Reservation starts at a different
/// pending partition on every pass; otherwise a partition still waiting for data would hold on to
/// the budget and starve the partitions behind it. What remains unreserved becomes the overshoot
/// allowance of the first partition planned, letting a non-strict read return an oversized first
/// batch. Partitions the locator cannot place get `NotLeaderForPartition` right away and are not
/// dispatched.
pub(crate) fn plan<P>(ctx: &mut OpContext, locator: &P, shard_count: usize) -> FetchPlan
where
    P: PartitionLocator + ?Sized,
{
    let mut plan = FetchPlan::new(shard_count);
    let mut unreserved = ctx.bytes_left();
    let strict_max_bytes = ctx.response_size > 0;

    let mut pending = ctx.slots.pending().collect::<Vec<_>>();
    if !pending.is_empty() {
        let first = ctx.passes.saturating_sub(1) as usize % pending.len();
        pending.rotate_left(first);
    }

    // Shard and position of the first planned read.
    let mut leading = None;
    for slot in pending {
        let (tp, cursor) = match (ctx.slots.topic_partition(slot), ctx.cursor(slot)) {
            (Some(tp), Some(cursor)) => (tp.clone(), *cursor),
            _ => continue,
        };
        let ntp = Ntp::from(tp);

        let shard = match locator.shard_for(&ntp) {
            Some(shard) if shard < shard_count => shard,
            other => {
                debug!("No shard hosts {}, located at {:?}", ntp, other);
                ctx.record(slot, ReadResult::Error(ErrorCode::NotLeaderForPartition));
                continue;
            }
        };

        let max_bytes = usize::try_from(cursor.max_bytes)
            .unwrap_or_default()
            .min(unreserved);
        unreserved -= max_bytes;

        trace!(
            "Plan {} at offset {} with {} bytes on shard {}",
            ntp,
            cursor.fetch_offset,
            max_bytes,
            shard
        );
        let fetch = &mut plan.fetches_per_shard[shard];
        leading.get_or_insert((shard, fetch.len()));
        fetch.push_back(
            NtpFetchConfig {
                ntp,
                config: FetchConfig {
                    start_offset: cursor.fetch_offset,
                    max_bytes,
                    isolation_level: ctx.isolation_level,
                    deadline: ctx.deadline,
                    strict_max_bytes,
                    overshoot_max_bytes: max_bytes,
                },
            },
            slot,
        );
    }

    if let Some((shard, position)) = leading.filter(|_| !strict_max_bytes) {
        if let Some(request) = plan.fetches_per_shard[shard].requests.get_mut(position) {
            request.config.overshoot_max_bytes += unreserved;
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use model::{
        fetch::{FetchPartition, FetchRequest},
        ErrorCode, Ntp,
    };
    use tokio::time::Instant;

    use super::plan;
    use crate::{
        fetch::{
            context::OpContext,
            placeholder::SlotId,
            read::{FetchedData, ReadResult},
            session::FetchCursor,
        },
        shard::MockPartitionLocator,
    };

    fn context(max_bytes: i32, partitions: &[(&str, i32, i32)]) -> OpContext {
        let mut request = FetchRequest {
            min_bytes: 1,
            max_bytes,
            max_wait_ms: 500,
            ..Default::default()
        };
        for (topic, partition, partition_max_bytes) in partitions {
            request.add_partition(topic, FetchPartition::new(*partition, 0, *partition_max_bytes));
        }
        let resolved = request
            .partitions()
            .map(|(tp, p)| (tp, FetchCursor::from(p)))
            .collect();
        OpContext::new(&request, resolved, Duration::from_millis(500), Instant::now())
    }

    fn locator() -> MockPartitionLocator {
        let mut locator = MockPartitionLocator::new();
        locator
            .expect_shard_for()
            .returning(|ntp: &Ntp| match ntp.topic() {
                "a" => Some(0),
                "b" => Some(1),
                "c" => Some(9),
                _ => None,
            });
        locator
    }

    #[test]
    fn test_group_by_shard() {
        let mut ctx = context(i32::MAX, &[("a", 0, 100), ("b", 0, 100), ("a", 1, 100)]);
        ctx.begin_pass();
        let plan = plan(&mut ctx, &locator(), 2);
        assert_eq!(3, plan.partition_count());
        assert_eq!(
            vec![SlotId(0), SlotId(2)],
            plan.fetches_per_shard[0].responses
        );
        assert_eq!(vec![SlotId(1)], plan.fetches_per_shard[1].responses);
        assert!(!ctx.response_error);
        assert!(plan.fetches_per_shard[0].requests[0].config.max_bytes == 100);
        assert!(!plan.fetches_per_shard[0].requests[0].config.strict_max_bytes);
    }

    #[test]
    fn test_unresolved_partition() {
        let mut ctx = context(i32::MAX, &[("a", 0, 100), ("x", 0, 100), ("c", 0, 100)]);
        ctx.begin_pass();
        let plan = plan(&mut ctx, &locator(), 2);
        assert_eq!(1, plan.partition_count());
        assert!(ctx.response_error);
        assert_eq!(
            Some(ErrorCode::NotLeaderForPartition),
            ctx.slots.get(SlotId(1)).map(ReadResult::error_code)
        );
        assert_eq!(
            Some(ErrorCode::NotLeaderForPartition),
            ctx.slots.get(SlotId(2)).map(ReadResult::error_code)
        );
    }

    #[test]
    fn test_budget_reservation() {
        let mut ctx = context(250, &[("a", 0, 100), ("a", 1, 200), ("b", 0, 100)]);
        ctx.begin_pass();
        let plan = plan(&mut ctx, &locator(), 2);
        let caps = plan
            .into_fetches()
            .flat_map(|fetch| fetch.requests.into_iter())
            .map(|request| (request.ntp, request.config.max_bytes))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                (Ntp::kafka("a", 0), 100),
                (Ntp::kafka("a", 1), 150),
                (Ntp::kafka("b", 0), 0),
            ],
            caps
        );
    }

    fn caps(plan: super::FetchPlan) -> Vec<(Ntp, usize, usize)> {
        let mut caps = plan
            .into_fetches()
            .flat_map(|fetch| fetch.requests.into_iter())
            .map(|request| {
                (
                    request.ntp,
                    request.config.max_bytes,
                    request.config.overshoot_max_bytes,
                )
            })
            .collect::<Vec<_>>();
        caps.sort_by(|x, y| (x.0.topic(), x.0.partition()).cmp(&(y.0.topic(), y.0.partition())));
        caps
    }

    #[test]
    fn test_reservation_rotates_across_passes() {
        let mut ctx = context(100, &[("a", 0, 100), ("b", 0, 100)]);
        ctx.begin_pass();
        assert_eq!(
            vec![(Ntp::kafka("a", 0), 100, 100), (Ntp::kafka("b", 0), 0, 0)],
            caps(plan(&mut ctx, &locator(), 2))
        );

        // Neither partition returned data, so the next pass hands the budget to the other one.
        ctx.begin_pass();
        assert_eq!(
            vec![(Ntp::kafka("a", 0), 0, 0), (Ntp::kafka("b", 0), 100, 100)],
            caps(plan(&mut ctx, &locator(), 2))
        );

        ctx.begin_pass();
        assert_eq!(
            vec![(Ntp::kafka("a", 0), 100, 100), (Ntp::kafka("b", 0), 0, 0)],
            caps(plan(&mut ctx, &locator(), 2))
        );
    }

    #[test]
    fn test_overshoot_allowance() {
        let mut ctx = context(1000, &[("a", 0, 100), ("b", 0, 100)]);
        ctx.begin_pass();
        // The unreserved 800 bytes go to the first planned read only.
        assert_eq!(
            vec![(Ntp::kafka("a", 0), 100, 900), (Ntp::kafka("b", 0), 100, 100)],
            caps(plan(&mut ctx, &locator(), 2))
        );
    }

    #[test]
    fn test_retry_pass_skips_final_slots() {
        let mut ctx = context(250, &[("a", 0, 100), ("b", 0, 100)]);
        ctx.begin_pass();
        ctx.record(
            SlotId(0),
            ReadResult::Data(FetchedData {
                records: Bytes::from(vec![0u8; 60]),
                start_offset: 0,
                high_watermark: 6,
                last_stable_offset: 6,
                log_start_offset: 0,
                aborted_transactions: None,
            }),
        );
        ctx.begin_pass();
        let plan = plan(&mut ctx, &locator(), 2);
        assert_eq!(1, plan.partition_count());
        let request = &plan.fetches_per_shard[1].requests[0];
        assert_eq!(100, request.config.max_bytes);
        assert!(request.config.strict_max_bytes);
        // Strict reads get no allowance beyond their cap.
        assert_eq!(100, request.config.overshoot_max_bytes);
    }
}
