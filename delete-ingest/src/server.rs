use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use delete_common::queue::memory::MemoryQueue;
use delete_common::queue::pool::QueuePool;
use delete_common::queue::strategy::RoundRobin;
use delete_common::queue::BackingQueue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dedup::redis::RedisDedupStore;
use crate::dedup::store::{DedupStore, MemoryDedupStore};
use crate::dedup::DedupFilter;
use crate::gateway::IngestionGateway;
use crate::router;
use crate::time::SystemTime;

const APP_NAME: &str = "delete-ingest";

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();

    let (queues, store): (Vec<Arc<dyn BackingQueue>>, Arc<dyn DedupStore>) = if config.print_sink
    {
        tracing::warn!("running with in-memory queue and dedup store, nothing is persisted");
        let queue: Arc<dyn BackingQueue> = Arc::new(MemoryQueue::new("local", "device-delete-0"));
        let store: Arc<dyn DedupStore> = Arc::new(MemoryDedupStore::new());
        (vec![queue], store)
    } else {
        let queues = config
            .queue
            .pg_queues(APP_NAME)
            .context("failed to configure queues")?;
        let store: Arc<dyn DedupStore> = Arc::new(
            RedisDedupStore::new(
                config.redis_url.clone(),
                config.redis_key_prefix.clone().unwrap_or_default(),
                config.redis_timeout.0,
            )
            .await
            .context("failed to create redis dedup store")?,
        );
        (queues, store)
    };

    let pool = Arc::new(
        QueuePool::new(
            queues,
            RoundRobin::new(),
            config.queue.pool_config(),
            &cancel,
        )
        .context("failed to create queue pool")?,
    );

    let dedup = DedupFilter::new(store, config.system_window(), config.user_window());
    let gateway = Arc::new(IngestionGateway::new(
        dedup,
        pool.clone(),
        Arc::new(SystemTime {}),
        config.max_visibility_minutes,
        cancel.clone(),
    ));

    let app = router::router(gateway, config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server failed")?;

    cancel.cancel();
    pool.shutdown().await;

    Ok(())
}
