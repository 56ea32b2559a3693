use std::time::Instant;

use log::{debug, info, warn};
use lru::LruCache;
use model::{
    fetch::{FetchRequest, FINAL_EPOCH, INITIAL_EPOCH, INVALID_SESSION_ID},
    response::PartitionResponse,
    TopicPartition,
};
use parking_lot::Mutex;

use crate::{error::FetchError, metrics};

use super::session::{FetchCursor, FetchSession, SessionPartitions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// No state is retained between requests.
    Sessionless,

    /// A new session was created from the full partition set of the request.
    Full,

    /// The request was applied as a diff to an existing session.
    Incremental,
}

/// Outcome of [`FetchSessionCache::resolve`].
pub struct ResolvedSession<'a> {
    pub kind: SessionKind,

    /// Session id for the response header, `0` if sessionless.
    pub session_id: i32,

    /// Epoch the client has to send next, `0` if sessionless.
    pub epoch: i32,

    /// Partitions to fetch, in response order.
    pub partitions: Vec<(TopicPartition, FetchCursor)>,

    /// Keeps the session marked in use until dropped.
    pub guard: Option<SessionGuard<'a>>,
}

#[derive(Debug)]
struct Inner {
    sessions: LruCache<i32, FetchSession>,
    next_id: i32,
}

impl Inner {
    fn allocate_id(&mut self) -> i32 {
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id == i32::MAX {
                1
            } else {
                self.next_id + 1
            };
            if id != INVALID_SESSION_ID && !self.sessions.contains(&id) {
                return id;
            }
        }
    }

    /// Evict least recently used idle sessions until there is room for one more.
    fn make_room(&mut self, capacity: usize) -> Option<usize> {
        let mut evicted = 0;
        while self.sessions.len() >= capacity {
            let victim = self
                .sessions
                .iter()
                .rev()
                .find(|(_, session)| !session.in_use)
                .map(|(id, _)| *id)?;
            self.sessions.pop(&victim);
            debug!("Evicted fetch session {} to make room", victim);
            evicted += 1;
        }
        Some(evicted)
    }
}

/// Process-wide cache of incremental fetch sessions.
///
/// All mutations happen under one mutex that is never held across an await point. A session is
/// marked in use for the lifetime of the [`SessionGuard`] handed out by `resolve`; concurrent
/// requests on it fail fast and eviction skips it.
#[derive(Debug)]
pub struct FetchSessionCache {
    config: config::SessionCache,
    inner: Mutex<Inner>,
}

impl FetchSessionCache {
    pub fn new(config: config::SessionCache) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                sessions: LruCache::unbounded(),
                next_id: 1,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the partition set of `request` against its session.
    pub fn resolve(&self, request: &FetchRequest) -> Result<ResolvedSession<'_>, FetchError> {
        match (request.session_id, request.session_epoch) {
            (INVALID_SESSION_ID, INITIAL_EPOCH) => Ok(Self::sessionless(request)),
            (INVALID_SESSION_ID, epoch) => Err(FetchError::EpochWithoutSession(epoch)),
            (id, FINAL_EPOCH) => {
                self.close(id)?;
                Ok(Self::sessionless(request))
            }
            (id, INITIAL_EPOCH) => self.create(id, request),
            (id, epoch) if epoch > 0 => self.update(id, epoch, request),
            (id, epoch) => Err(FetchError::InvalidSessionEpoch {
                id,
                expected: self.inner.lock().sessions.peek(&id).map_or(0, |s| s.epoch),
                actual: epoch,
            }),
        }
    }

    fn sessionless(request: &FetchRequest) -> ResolvedSession<'static> {
        ResolvedSession {
            kind: SessionKind::Sessionless,
            session_id: INVALID_SESSION_ID,
            epoch: INITIAL_EPOCH,
            partitions: request
                .partitions()
                .map(|(tp, partition)| (tp, FetchCursor::from(partition)))
                .collect(),
            guard: None,
        }
    }

    fn close(&self, id: i32) -> Result<(), FetchError> {
        let mut inner = self.inner.lock();
        match inner.sessions.peek(&id) {
            Some(session) if session.in_use => return Err(FetchError::SessionInUse(id)),
            Some(_) => {
                inner.sessions.pop(&id);
                debug!("Fetch session {} closed by client", id);
            }
            None => {}
        }
        metrics::record_session_count(inner.sessions.len());
        Ok(())
    }

    fn create(
        &self,
        previous: i32,
        request: &FetchRequest,
    ) -> Result<ResolvedSession<'_>, FetchError> {
        // A client asking for a new session gives up the one it had.
        self.close(previous)?;

        if request.partition_count() > self.config.max_partitions_per_session {
            warn!(
                "Fetch request with {} partitions exceeds the session limit {}, serving it sessionless",
                request.partition_count(),
                self.config.max_partitions_per_session
            );
            return Ok(Self::sessionless(request));
        }

        let mut partitions = SessionPartitions::default();
        for (tp, partition) in request.partitions() {
            partitions.upsert(tp, FetchCursor::from(partition));
        }

        let mut inner = self.inner.lock();
        let evicted = match inner.make_room(self.config.max_sessions) {
            Some(evicted) => evicted,
            None => {
                warn!("All fetch sessions are in use, serving request sessionless");
                return Ok(Self::sessionless(request));
            }
        };
        metrics::record_session_evictions(evicted);

        let id = inner.allocate_id();
        let mut session = FetchSession::new(id, partitions, Instant::now());
        session.in_use = true;
        let resolved = session.partitions.cursors();
        let epoch = session.epoch;
        inner.sessions.push(id, session);
        metrics::record_session_count(inner.sessions.len());
        info!(
            "Created fetch session {} with {} partitions",
            id,
            resolved.len()
        );

        Ok(ResolvedSession {
            kind: SessionKind::Full,
            session_id: id,
            epoch,
            partitions: resolved,
            guard: Some(SessionGuard { cache: self, id }),
        })
    }

    fn update(
        &self,
        id: i32,
        epoch: i32,
        request: &FetchRequest,
    ) -> Result<ResolvedSession<'_>, FetchError> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or(FetchError::SessionNotFound(id))?;

        if session.in_use {
            return Err(FetchError::SessionInUse(id));
        }

        if session.epoch != epoch {
            return Err(FetchError::InvalidSessionEpoch {
                id,
                expected: session.epoch,
                actual: epoch,
            });
        }

        let mut partitions = session.partitions.clone();
        for tp in request.forgotten() {
            partitions.remove(&tp);
        }
        for (tp, partition) in request.partitions() {
            if partition.max_bytes == 0 {
                partitions.remove(&tp);
            } else {
                partitions.upsert(tp, FetchCursor::from(partition));
            }
        }

        // The session stays at its current epoch, so the client may retry with a smaller diff.
        let limit = self.config.max_partitions_per_session;
        if partitions.len() > limit {
            warn!(
                "Fetch session {} would grow to {} partitions, over the limit {}",
                id,
                partitions.len(),
                limit
            );
            return Err(FetchError::TooManyPartitions {
                id,
                count: partitions.len(),
                limit,
            });
        }

        session.partitions = partitions;
        session.bump_epoch();
        session.in_use = true;
        session.last_used = Instant::now();
        debug!(
            "Fetch session {} advanced to epoch {} with {} partitions",
            id,
            session.epoch,
            session.partitions.len()
        );

        Ok(ResolvedSession {
            kind: SessionKind::Incremental,
            session_id: id,
            epoch: session.epoch,
            partitions: session.partitions.cursors(),
            guard: Some(SessionGuard { cache: self, id }),
        })
    }

    fn release(&self, id: i32) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.peek_mut(&id) {
            session.in_use = false;
            session.last_used = Instant::now();
        }
    }

    /// Evict sessions idle for longer than the configured timeout. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut inner = self.inner.lock();
        let expired = inner
            .sessions
            .iter()
            .filter(|(_, session)| {
                !session.in_use && now.saturating_duration_since(session.last_used) >= idle_timeout
            })
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();

        for id in &expired {
            inner.sessions.pop(id);
        }

        if !expired.is_empty() {
            info!("Evicted {} expired fetch sessions", expired.len());
            metrics::record_session_evictions(expired.len());
            metrics::record_session_count(inner.sessions.len());
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.sessions.clear();
        metrics::record_session_count(0);
    }
}

/// Marks a session in use; dropping it makes the session available again.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    cache: &'a FetchSessionCache,
    id: i32,
}

impl<'a> SessionGuard<'a> {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Remember what is reported to the client. With `filter` set, partitions that carry nothing
    /// new since the previous response are dropped from `entries`.
    pub fn record_response(
        &self,
        entries: &mut Vec<(TopicPartition, PartitionResponse)>,
        filter: bool,
    ) {
        let mut inner = self.cache.inner.lock();
        let session = match inner.sessions.peek_mut(&self.id) {
            Some(session) => session,
            None => return,
        };

        entries.retain(|(tp, response)| match session.partitions.get_mut(tp) {
            Some(partition) => {
                let report = !filter || partition.should_report(response);
                partition.update(response);
                report
            }
            None => true,
        });
    }
}

impl<'a> Drop for SessionGuard<'a> {
    fn drop(&mut self) {
        self.cache.release(self.id);
    }
}
