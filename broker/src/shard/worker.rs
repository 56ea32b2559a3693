use std::{cell::Cell, io, rc::Rc, sync::Arc, thread::JoinHandle, time::Duration};

use log::{debug, error, info, trace};
use tokio::{
    runtime,
    sync::mpsc,
    task::LocalSet,
    time::{sleep, Instant},
};

use crate::{
    fetch::{read::execute_shard_fetch, session_cache::FetchSessionCache},
    storage::PartitionLog,
};

use super::{PartitionManager, ShardConfig, ShardTask};

/// Spawn the thread of one shard.
///
/// The thread runs a current-thread runtime, so every task of the shard is polled on it and
/// shard-local state needs no synchronization. The primary shard additionally sweeps idle fetch
/// sessions.
pub(crate) fn spawn<L>(
    config: ShardConfig,
    server_config: Arc<config::Configuration>,
    sessions: Arc<FetchSessionCache>,
    rx: mpsc::UnboundedReceiver<ShardTask<L>>,
) -> io::Result<JoinHandle<()>>
where
    L: PartitionLog + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("broker-shard-{}", config.id))
        .spawn(move || {
            if let Some(core) = config.core {
                if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
                    info!("Bind shard {} to processor-{}", config.id, core);
                } else {
                    error!("Failed to bind shard {} to processor-{}", config.id, core);
                }
            }

            let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to build runtime of shard {}. Cause: {}", config.id, e);
                    return;
                }
            };

            let grace_period = server_config.server_grace_period();
            let local = LocalSet::new();
            local.block_on(&runtime, async move {
                if config.primary {
                    sweep_sessions(sessions, &server_config);
                }
                serve(config.id, rx, grace_period).await;
            });
            info!("Shard {} stopped", config.id);
        })
}

fn sweep_sessions(sessions: Arc<FetchSessionCache>, config: &config::Configuration) {
    let period = config.fetch.session_cache.eviction_interval();
    tokio::task::spawn_local(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            sessions.evict_expired();
        }
    });
}

async fn serve<L>(
    id: usize,
    mut rx: mpsc::UnboundedReceiver<ShardTask<L>>,
    grace_period: Duration,
) where
    L: PartitionLog + 'static,
{
    let manager = Rc::new(PartitionManager::<L>::new(id));
    let inflight = Rc::new(Cell::new(0usize));
    info!("Shard {} is serving", id);
    while let Some(task) = rx.recv().await {
        match task {
            ShardTask::Fetch { fetch, tx } => {
                trace!("Shard {} reads {} partitions", id, fetch.len());
                let manager = Rc::clone(&manager);
                let inflight = Rc::clone(&inflight);
                inflight.set(inflight.get() + 1);
                tokio::task::spawn_local(async move {
                    let results = execute_shard_fetch(&manager, fetch).await;
                    inflight.set(inflight.get() - 1);
                    if tx.send(results).is_err() {
                        debug!("Fetch on shard {} completed after its caller gave up", id);
                    }
                });
            }
            ShardTask::Manage { ntp, log, tx } => {
                manager.manage(ntp, log);
                let _ = tx.send(());
            }
            ShardTask::Remove { ntp, tx } => {
                let _ = tx.send(manager.remove(&ntp));
            }
            ShardTask::Invoke(f) => f(manager.as_ref()),
            ShardTask::Shutdown => {
                info!("Shard {} received shutdown signal", id);
                break;
            }
        }
    }

    // Let fetches already running finish, up to the grace period.
    let start = Instant::now();
    while inflight.get() > 0 {
        let waited = start.elapsed();
        if waited >= grace_period {
            info!(
                "Shard {} abandons {} fetches after {}ms",
                id,
                inflight.get(),
                waited.as_millis()
            );
            break;
        }
        debug!(
            "Shard {} has {} fetches left. Waited for {}/{}ms",
            id,
            inflight.get(),
            waited.as_millis(),
            grace_period.as_millis()
        );
        sleep(Duration::from_millis(10).min(grace_period - waited)).await;
    }
}
