//! Thread-per-core execution units.
//!
//! Every shard is an OS thread running a single-threaded cooperative scheduler. Partition logs live
//! on exactly one shard and are only touched from it; other threads reach them by posting a
//! [`ShardTask`] into the shard's inbox and awaiting the reply.

use std::{sync::Arc, thread::JoinHandle};

use log::{info, warn};
use model::Ntp;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::ShardError,
    fetch::{
        placeholder::SlotId, planner::ShardFetch, read::ReadResult,
        session_cache::FetchSessionCache,
    },
    storage::PartitionLog,
};

mod partition_manager;
mod shard_table;
mod worker;

#[cfg(test)]
pub use self::shard_table::MockPartitionLocator;
pub use self::{
    partition_manager::PartitionManager,
    shard_table::{PartitionLocator, ShardTable},
};

pub type ShardId = usize;

type Invocation<L> = Box<dyn FnOnce(&PartitionManager<L>) + Send>;

pub(crate) enum ShardTask<L> {
    Fetch {
        fetch: ShardFetch,
        tx: oneshot::Sender<Vec<(SlotId, ReadResult)>>,
    },
    Manage {
        ntp: Ntp,
        log: L,
        tx: oneshot::Sender<()>,
    },
    Remove {
        ntp: Ntp,
        tx: oneshot::Sender<bool>,
    },
    Invoke(Invocation<L>),
    Shutdown,
}

/// Sending side of a shard's inbox. Cheap to clone and usable from any thread.
pub struct ShardHandle<L> {
    id: ShardId,
    tx: mpsc::UnboundedSender<ShardTask<L>>,
}

impl<L> Clone for ShardHandle<L> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}

impl<L> ShardHandle<L> {
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Ask the shard to stop. Fetches already running get the configured grace period to finish.
    pub fn stop(&self) -> Result<(), ShardError> {
        self.tx
            .send(ShardTask::Shutdown)
            .map_err(|_| ShardError::Stopped(self.id))
    }
}

impl<L> ShardHandle<L>
where
    L: PartitionLog + Send + 'static,
{

    fn post(&self, task: ShardTask<L>) -> Result<(), ShardError> {
        self.tx.send(task).map_err(|_| ShardError::Stopped(self.id))
    }

    /// Execute the shard's part of a fetch plan.
    pub async fn fetch(&self, fetch: ShardFetch) -> Result<Vec<(SlotId, ReadResult)>, ShardError> {
        let (tx, rx) = oneshot::channel();
        self.post(ShardTask::Fetch { fetch, tx })?;
        rx.await.map_err(|_| ShardError::Stopped(self.id))
    }

    pub async fn manage(&self, ntp: Ntp, log: L) -> Result<(), ShardError> {
        let (tx, rx) = oneshot::channel();
        self.post(ShardTask::Manage { ntp, log, tx })?;
        rx.await.map_err(|_| ShardError::Stopped(self.id))
    }

    pub async fn remove(&self, ntp: Ntp) -> Result<bool, ShardError> {
        let (tx, rx) = oneshot::channel();
        self.post(ShardTask::Remove { ntp, tx })?;
        rx.await.map_err(|_| ShardError::Stopped(self.id))
    }

    /// Run `f` on the shard against its partition manager and return what it produces.
    pub async fn invoke_on<F, T>(&self, f: F) -> Result<T, ShardError>
    where
        F: FnOnce(&PartitionManager<L>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(ShardTask::Invoke(Box::new(move |manager| {
            let _ = tx.send(f(manager));
        })))?;
        rx.await.map_err(|_| ShardError::Stopped(self.id))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ShardConfig {
    pub(crate) id: ShardId,
    pub(crate) core: Option<usize>,

    /// The primary shard also runs process-wide housekeeping.
    pub(crate) primary: bool,
}

/// All shards of the process.
///
/// Dropping the set stops every shard and joins its thread.
pub struct ShardSet<L> {
    handles: Vec<ShardHandle<L>>,
    threads: Vec<JoinHandle<()>>,
}

impl<L> ShardSet<L>
where
    L: PartitionLog + Send + 'static,
{
    pub fn start(
        config: &Arc<config::Configuration>,
        sessions: &Arc<FetchSessionCache>,
    ) -> Result<Self, ShardError> {
        let count = config.shard_count();
        let mut set = Self {
            handles: Vec::with_capacity(count),
            threads: Vec::with_capacity(count),
        };

        for id in 0..count {
            let shard_config = ShardConfig {
                id,
                core: config.core_of(id),
                primary: id == 0,
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let thread = worker::spawn(
                shard_config,
                Arc::clone(config),
                Arc::clone(sessions),
                rx,
            )?;
            set.handles.push(ShardHandle { id, tx });
            set.threads.push(thread);
        }
        info!("Started {} shards", count);
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[ShardHandle<L>] {
        &self.handles
    }

    pub fn handle(&self, id: ShardId) -> Result<&ShardHandle<L>, ShardError> {
        self.handles.get(id).ok_or(ShardError::NotFound(id))
    }
}

impl<L> ShardSet<L> {
    /// Stop every shard and wait for its thread to exit.
    pub fn shutdown(&mut self) {
        for handle in &self.handles {
            if handle.stop().is_err() {
                info!("Shard {} has stopped already", handle.id);
            }
        }
        while let Some(thread) = self.threads.pop() {
            if thread.join().is_err() {
                warn!("A shard thread panicked");
            }
        }
    }
}

impl<L> Drop for ShardSet<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, sync::Arc, time::Duration};

    use bytes::Bytes;
    use model::{response::AbortedTransaction, ErrorCode, IsolationLevel, Ntp};
    use tokio::time::{sleep, Instant};

    use super::ShardSet;
    use crate::{
        error::ShardError,
        fetch::{
            placeholder::SlotId,
            planner::ShardFetch,
            read::{FetchConfig, NtpFetchConfig},
            session_cache::FetchSessionCache,
        },
        storage::{LogOffsets, LogSlice, MemoryPartitionLog, PartitionLog, ReadOptions},
    };

    fn configuration(shards: usize) -> Arc<config::Configuration> {
        let mut config = config::Configuration::default();
        config.server.shard_count = Some(shards);
        Arc::new(config)
    }

    /// In-memory log whose reads take `delay`.
    struct SlowLog {
        inner: MemoryPartitionLog,
        delay: Duration,
    }

    impl PartitionLog for SlowLog {
        fn offsets(&self) -> LogOffsets {
            self.inner.offsets()
        }

        fn is_leader(&self) -> bool {
            self.inner.is_leader()
        }

        async fn read(&self, options: &ReadOptions) -> Result<LogSlice, ErrorCode> {
            sleep(self.delay).await;
            self.inner.read(options).await
        }

        fn aborted_transactions(&self, first: i64, last: i64) -> Vec<AbortedTransaction> {
            self.inner.aborted_transactions(first, last)
        }
    }

    /// Stop a shard while a slow fetch is running on it and return the fetch outcome.
    async fn stop_during_fetch(grace_period_sec: u64) -> Result<usize, ShardError> {
        let mut config = config::Configuration::default();
        config.server.shard_count = Some(1);
        config.server.grace_period_sec = grace_period_sec;
        let config = Arc::new(config);
        let sessions = Arc::new(FetchSessionCache::new(config.fetch.session_cache.clone()));
        let shards = ShardSet::<SlowLog>::start(&config, &sessions)?;

        let ntp = Ntp::kafka("orders", 0);
        let inner = MemoryPartitionLog::new();
        inner.append(Bytes::from_static(b"payload"), 1);
        let log = SlowLog {
            inner,
            delay: Duration::from_millis(100),
        };
        let shard = shards.handle(0)?;
        shard.manage(ntp.clone(), log).await?;

        let mut fetch = ShardFetch::new(0);
        fetch.push_back(
            NtpFetchConfig {
                ntp,
                config: FetchConfig {
                    start_offset: 0,
                    max_bytes: 1024,
                    isolation_level: IsolationLevel::ReadUncommitted,
                    deadline: Instant::now() + Duration::from_secs(5),
                    strict_max_bytes: false,
                    overshoot_max_bytes: 1024,
                },
            },
            SlotId(0),
        );

        let (results, stopped) = tokio::join!(shard.fetch(fetch), async {
            sleep(Duration::from_millis(20)).await;
            shard.stop()
        });
        stopped?;
        Ok(results?.iter().map(|(_, r)| r.records_size()).sum())
    }

    #[tokio::test]
    async fn test_shutdown_drains_inflight_fetches() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        assert_eq!(7, stop_during_fetch(5).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_without_grace_period() {
        assert!(matches!(
            stop_during_fetch(0).await,
            Err(ShardError::Stopped(0))
        ));
    }

    #[tokio::test]
    async fn test_invoke_on() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        let config = configuration(2);
        let sessions = Arc::new(FetchSessionCache::new(config.fetch.session_cache.clone()));
        let mut shards = ShardSet::<MemoryPartitionLog>::start(&config, &sessions)?;
        assert_eq!(2, shards.len());

        let ntp = Ntp::kafka("orders", 0);
        let shard = shards.handle(1)?;
        shard.manage(ntp.clone(), MemoryPartitionLog::new()).await?;

        let thread = shard
            .invoke_on(|_| std::thread::current().name().map(str::to_owned))
            .await?;
        assert_eq!(Some("broker-shard-1".to_owned()), thread);

        let target = ntp.clone();
        let offset = shard
            .invoke_on(move |manager| {
                manager
                    .get(&target)
                    .map(|log| log.append(Bytes::from_static(b"abc"), 1))
            })
            .await?;
        assert_eq!(Some(0), offset);

        assert!(shard.remove(ntp.clone()).await?);
        assert!(!shard.remove(ntp).await?);

        assert!(matches!(shards.handle(2), Err(ShardError::NotFound(2))));

        let handle = shards.handle(0)?.clone();
        shards.shutdown();
        assert!(matches!(
            handle.invoke_on(|manager| manager.len()).await,
            Err(ShardError::Stopped(0))
        ));
        Ok(())
    }
}
