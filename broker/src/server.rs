use std::sync::Arc;

use config::Configuration;
use futures::executor::block_on;
use log::{error, info, warn};
use model::{fetch::FetchRequest, response::FetchResponse, Ntp};
use tokio::sync::broadcast;

use crate::{
    error::{LaunchError, ShardError},
    fetch::{session_cache::FetchSessionCache, FetchOperation},
    shard::{PartitionLocator, PartitionManager, ShardId, ShardSet, ShardTable},
    storage::{MemoryPartitionLog, PartitionLog},
};

/// A broker node: its shards, the partition placement and the fetch session cache.
pub struct Broker<L> {
    config: Arc<Configuration>,
    shards: ShardSet<L>,
    table: Arc<ShardTable>,
    sessions: Arc<FetchSessionCache>,
}

impl<L> Broker<L>
where
    L: PartitionLog + Send + 'static,
{
    pub fn start(config: Configuration) -> Result<Self, LaunchError> {
        if config.shard_count() == 0 {
            return Err(LaunchError::NoShards);
        }
        let config = Arc::new(config);
        let sessions = Arc::new(FetchSessionCache::new(
            config.fetch.session_cache.clone(),
        ));
        let shards = ShardSet::start(&config, &sessions)?;
        info!(
            "Broker {} started with {} shards",
            config.server.server_id,
            shards.len()
        );
        Ok(Self {
            config,
            shards,
            table: Arc::new(ShardTable::new()),
            sessions,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn locator(&self) -> Arc<ShardTable> {
        Arc::clone(&self.table)
    }

    pub fn sessions(&self) -> &FetchSessionCache {
        &self.sessions
    }

    /// Host `log` as partition `ntp` on `shard`.
    pub async fn manage(&self, ntp: Ntp, shard: ShardId, log: L) -> Result<(), ShardError> {
        self.shards.handle(shard)?.manage(ntp.clone(), log).await?;
        if let Some(previous) = self.table.assign(ntp.clone(), shard) {
            if previous != shard {
                warn!("{} moved from shard {} to shard {}", ntp, previous, shard);
                self.shards.handle(previous)?.remove(ntp).await?;
            }
        }
        Ok(())
    }

    /// Stop hosting `ntp`. Returns `false` if it was not hosted.
    pub async fn remove(&self, ntp: &Ntp) -> Result<bool, ShardError> {
        match self.table.unassign(ntp) {
            Some(shard) => self.shards.handle(shard)?.remove(ntp.clone()).await,
            None => Ok(false),
        }
    }

    pub async fn invoke_on<F, T>(&self, shard: ShardId, f: F) -> Result<T, ShardError>
    where
        F: FnOnce(&PartitionManager<L>) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.shards.handle(shard)?.invoke_on(f).await
    }

    /// Serve a fetch request. Structural failures are reported through the top-level error code.
    pub async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        self.fetch_with(request, self.table.as_ref()).await
    }

    /// Serve a fetch request, placing partitions with `locator` instead of the shard table.
    pub async fn fetch_with<P>(&self, request: FetchRequest, locator: &P) -> FetchResponse
    where
        P: PartitionLocator + ?Sized,
    {
        let operation = FetchOperation::new(
            self.shards.handles(),
            locator,
            &self.sessions,
            &self.config.fetch,
        );
        match operation.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetch request rejected: {}", e);
                FetchResponse::with_error(e.error_code())
            }
        }
    }

    /// Stop every shard and drop all fetch sessions.
    pub fn shutdown(mut self) {
        info!("Broker {} shutting down", self.config.server.server_id);
        self.shards.shutdown();
        self.sessions.clear();
    }
}

/// Run a broker backed by in-memory partition logs until `shutdown` fires.
pub fn launch(config: Configuration, shutdown: broadcast::Sender<()>) -> Result<(), LaunchError> {
    let mut shutdown_rx = shutdown.subscribe();
    let broker = match Broker::<MemoryPartitionLog>::start(config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("Failed to launch broker: {}", e);
            return Err(e);
        }
    };

    if block_on(shutdown_rx.recv()).is_err() {
        warn!("Shutdown channel closed");
    }
    broker.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        thread,
        time::{Duration, Instant},
    };

    use model::{
        fetch::{FetchPartition, FetchRequest},
        ErrorCode, Ntp,
    };
    use tokio::sync::broadcast;

    use super::{launch, Broker};
    use crate::{shard::MockPartitionLocator, storage::MemoryPartitionLog};

    fn configuration() -> config::Configuration {
        let mut config = config::Configuration::default();
        config.server.shard_count = Some(2);
        config
    }

    #[tokio::test]
    async fn test_manage_and_remove() -> Result<(), Box<dyn Error>> {
        ulog::try_init_log();
        let broker = Broker::<MemoryPartitionLog>::start(configuration())?;
        let ntp = Ntp::kafka("orders", 0);
        broker.manage(ntp.clone(), 0, MemoryPartitionLog::new()).await?;
        broker.manage(ntp.clone(), 1, MemoryPartitionLog::new()).await?;
        assert_eq!(1, broker.locator().len());

        let target = ntp.clone();
        assert!(!broker.invoke_on(0, move |m| m.get(&target).is_some()).await?);
        let target = ntp.clone();
        assert!(broker.invoke_on(1, move |m| m.get(&target).is_some()).await?);

        assert!(broker.remove(&ntp).await?);
        assert!(!broker.remove(&ntp).await?);
        assert!(broker.locator().is_empty());
        broker.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn test_locator_out_of_range() -> Result<(), Box<dyn Error>> {
        let broker = Broker::<MemoryPartitionLog>::start(configuration())?;
        let mut locator = MockPartitionLocator::new();
        locator.expect_shard_for().returning(|_| Some(7));

        let mut request = FetchRequest::default();
        request.add_partition("orders", FetchPartition::new(0, 0, 1024));
        let response = broker.fetch_with(request, &locator).await;
        assert_eq!(
            Some(ErrorCode::NotLeaderForPartition),
            response.partition("orders", 0).map(|p| p.error_code)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stopped_shard() -> Result<(), Box<dyn Error>> {
        let broker = Broker::<MemoryPartitionLog>::start(configuration())?;
        broker
            .manage(Ntp::kafka("orders", 0), 1, MemoryPartitionLog::new())
            .await?;
        broker
            .manage(Ntp::kafka("orders", 1), 0, MemoryPartitionLog::new())
            .await?;
        broker.shards.handle(1)?.stop()?;

        let mut request = FetchRequest {
            min_bytes: 1,
            max_wait_ms: 5000,
            ..Default::default()
        };
        request.add_partition("orders", FetchPartition::new(0, 0, 1024));
        request.add_partition("orders", FetchPartition::new(1, 0, 1024));

        let start = Instant::now();
        let response = broker.fetch(request).await;
        // The failed shard ends the wait right away.
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(ErrorCode::None, response.error_code);
        assert_eq!(
            Some(ErrorCode::UnknownServerError),
            response.partition("orders", 0).map(|p| p.error_code)
        );
        assert_eq!(
            Some(ErrorCode::None),
            response.partition("orders", 1).map(|p| p.error_code)
        );
        Ok(())
    }

    #[test]
    fn test_launch() -> Result<(), Box<dyn Error>> {
        let (tx, _rx) = broadcast::channel(1);
        let shutdown = tx.clone();
        let handle = thread::spawn(move || launch(configuration(), shutdown));
        // The signal is only observed once `launch` has subscribed.
        while !handle.is_finished() {
            tx.send(())?;
            thread::sleep(Duration::from_millis(20));
        }
        assert!(handle.join().map_err(|_| "launch panicked")?.is_ok());
        Ok(())
    }
}
