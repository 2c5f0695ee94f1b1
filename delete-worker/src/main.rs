//! Drain device delete work items and forward them as delete commands.
use std::sync::Arc;

use axum::routing::get;
use envconfig::Envconfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use delete_common::metrics::{serve, setup_metrics_router};
use delete_common::queue::pool::QueuePool;
use delete_common::queue::strategy::RoundRobin;
use delete_worker::config::Config;
use delete_worker::error::WorkerError;
use delete_worker::fanout::SignalFanoutProcessor;
use delete_worker::forwarder::{build_http_client, CommandForwarder, HttpCommandForwarder};
use delete_worker::verifier::{HttpVerifierClient, VerifierClient};
use delete_worker::worker::DeleteWorker;

async fn shutdown(cancel: CancellationToken) {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::init_from_env().expect("Invalid configuration:");

    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(config.log_level).into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let cancel = CancellationToken::new();

    let client = build_http_client(config.request_timeout.0)?;
    let verifier: Arc<dyn VerifierClient> =
        Arc::new(HttpVerifierClient::new(client.clone(), &config.verifier_url)?);
    let forwarder: Arc<dyn CommandForwarder> =
        Arc::new(HttpCommandForwarder::new(client, &config.command_url)?);

    let pool = Arc::new(QueuePool::new(
        config.queue.pg_queues("delete-worker")?,
        RoundRobin::new(),
        config.queue.pool_config(),
        &cancel,
    )?);

    let worker = DeleteWorker::new(
        &config.worker_name,
        pool.clone(),
        SignalFanoutProcessor::new(verifier, config.data_types()),
        forwarder,
        config.poll_interval.0,
        config.drain_batch_size,
    );

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router().route("/_liveness", get(|| async { "ok" }));
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    tokio::spawn(shutdown(cancel.clone()));

    worker.run(cancel).await;
    pool.shutdown().await;

    Ok(())
}
