//! Fetch execution engine.
//!
//! A fetch request is decoded into an [`OpContext`](context::OpContext), resolved against the
//! session cache, laid out as response slots and planned per shard. Shards read their partitions
//! concurrently and the orchestrator places each result by slot. Passes repeat, spaced by the
//! debounce interval, until enough bytes are gathered, something fails or the deadline passes.

use std::time::Duration;

use futures::future::join_all;
use log::{debug, trace, warn};
use model::{fetch::FetchRequest, response::FetchResponse, ErrorCode};
use tokio::time::{sleep_until, Instant};

use crate::{
    error::{FetchError, ShardError},
    metrics,
    shard::{PartitionLocator, ShardHandle},
    storage::PartitionLog,
};

use self::{
    context::OpContext,
    placeholder::group_by_topic,
    planner::FetchPlan,
    read::ReadResult,
    session_cache::{FetchSessionCache, ResolvedSession, SessionKind},
};

pub(crate) mod context;
pub mod placeholder;
pub mod planner;
pub mod read;
pub mod session;
pub mod session_cache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Decoding,
    Planning,
    Dispatching,
    Waiting,
    Finalizing,
    Done,
}

/// Drives a single fetch request from decoding to the assembled response.
pub struct FetchOperation<'a, L, P: ?Sized> {
    shards: &'a [ShardHandle<L>],
    locator: &'a P,
    sessions: &'a FetchSessionCache,
    config: &'a config::Fetch,
    state: FetchState,
}

impl<'a, L, P> FetchOperation<'a, L, P>
where
    L: PartitionLog + Send + 'static,
    P: PartitionLocator + ?Sized,
{
    pub fn new(
        shards: &'a [ShardHandle<L>],
        locator: &'a P,
        sessions: &'a FetchSessionCache,
        config: &'a config::Fetch,
    ) -> Self {
        Self {
            shards,
            locator,
            sessions,
            config,
            state: FetchState::Decoding,
        }
    }

    fn transit(&mut self, state: FetchState) {
        trace!("Fetch operation: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Serve `request`.
    ///
    /// Only structural problems, a malformed request or a bad session, yield `Err`. Partition
    /// failures are reported inside the response and a passed deadline simply ends the wait.
    pub async fn execute(mut self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let started = minstant::Instant::now();
        validate(&request)?;

        let ResolvedSession {
            kind,
            session_id,
            epoch,
            partitions,
            guard,
        } = self.sessions.resolve(&request)?;

        let max_wait =
            Duration::from_millis(request.max_wait_ms as u64).min(self.config.max_wait());
        let mut ctx = OpContext::new(&request, partitions, max_wait, Instant::now());

        while !ctx.is_empty_request() {
            self.transit(FetchState::Planning);
            ctx.begin_pass();
            let plan = planner::plan(&mut ctx, self.locator, self.shards.len());

            self.transit(FetchState::Dispatching);
            let completed = self.dispatch(&mut ctx, plan).await;

            self.transit(FetchState::Waiting);
            if !completed || ctx.should_stop_fetch(Instant::now()) {
                break;
            }

            sleep_until((Instant::now() + self.config.debounce()).min(ctx.deadline)).await;
            if ctx.deadline_reached(Instant::now()) {
                break;
            }
        }

        self.transit(FetchState::Finalizing);
        let passes = ctx.passes;
        let response_size = ctx.response_size;
        let mut entries = ctx.slots.into_responses();
        if let Some(guard) = &guard {
            guard.record_response(&mut entries, kind == SessionKind::Incremental);
        }
        drop(guard);

        let response = FetchResponse {
            throttle_time_ms: 0,
            error_code: ErrorCode::None,
            session_id,
            session_epoch: epoch,
            topics: group_by_topic(entries),
        };

        let errors = response
            .partitions()
            .filter(|(_, partition)| partition.error_code.is_err())
            .count();
        metrics::record_fetch_operation(
            started.elapsed().as_micros() as u64,
            response_size,
            passes,
            errors,
        );
        debug!(
            "Fetch of session {} finished after {} passes with {} bytes and {} partition errors",
            session_id, passes, response_size, errors
        );
        self.transit(FetchState::Done);
        Ok(response)
    }

    /// Send one pass to the shards and place their results.
    ///
    /// The first pass is always awaited in full. A later pass still outstanding at the deadline is
    /// abandoned; its results are dropped and `false` is returned.
    async fn dispatch(&self, ctx: &mut OpContext, plan: FetchPlan) -> bool {
        let calls = plan.into_fetches().map(|fetch| {
            let slots = fetch.responses.clone();
            let shard = self.shards.get(fetch.shard).cloned();
            async move {
                let result = match shard {
                    Some(shard) => shard.fetch(fetch).await,
                    None => Err(ShardError::NotFound(fetch.shard)),
                };
                (slots, result)
            }
        });
        let calls = join_all(calls);

        let results = if ctx.initial_fetch {
            calls.await
        } else {
            tokio::select! {
                results = calls => results,
                _ = sleep_until(ctx.deadline) => {
                    debug!(
                        "Deadline passed with shard reads outstanding, abandoning pass {}",
                        ctx.passes
                    );
                    return false;
                }
            }
        };

        for (slots, result) in results {
            match result {
                Ok(results) => {
                    for (slot, result) in results {
                        ctx.record(slot, result);
                    }
                }
                Err(e) => {
                    warn!("Shard fetch failed: {}", e);
                    for slot in slots {
                        ctx.record(slot, ReadResult::Error(ErrorCode::UnknownServerError));
                    }
                }
            }
        }
        true
    }
}

fn validate(request: &FetchRequest) -> Result<(), FetchError> {
    if request.max_bytes < 0 {
        return Err(FetchError::InvalidRequest(format!(
            "max_bytes {} is negative",
            request.max_bytes
        )));
    }
    if request.max_wait_ms < 0 {
        return Err(FetchError::InvalidRequest(format!(
            "max_wait_ms {} is negative",
            request.max_wait_ms
        )));
    }
    Ok(())
}
