//! Command handlers.

use anyhow::{Context, bail};
use courier_api::AppState;
use courier_core::MessageQueue;
use courier_mailer::{Consumer, SimulatedMailSender};
use courier_queue::{MemoryQueue, NatsQueue, QueueBackend};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::settings::CourierConfig;

/// Flips to `true` on Ctrl-C.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                // Keep the sender alive so receivers do not see a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Connect the configured queue. An unreachable broker is an error.
async fn connect_queue(config: &CourierConfig) -> anyhow::Result<Arc<dyn MessageQueue>> {
    let queue_config = config.queue.to_queue_config();
    let queue: Arc<dyn MessageQueue> = match queue_config.backend {
        QueueBackend::Nats => Arc::new(
            NatsQueue::connect(queue_config)
                .await
                .context("Queue broker is unreachable")?,
        ),
        QueueBackend::Memory => Arc::new(
            MemoryQueue::new(queue_config.name).with_placement(queue_config.carrier_placement),
        ),
    };
    Ok(queue)
}

async fn serve_api(
    config: &CourierConfig,
    queue: Arc<dyn MessageQueue>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = Arc::new(AppState::new(queue.clone()));
    courier_api::serve(listener, state, wait_for_shutdown(shutdown)).await?;

    info!("API stopped accepting requests");
    queue.close().await?;
    Ok(())
}

fn consumer(config: &CourierConfig, queue: Arc<dyn MessageQueue>) -> Consumer {
    Consumer::new(
        queue,
        Arc::new(SimulatedMailSender::from_config(&config.mailer)),
    )
    .with_placement(config.queue.carrier_placement)
}

pub async fn api(config: &CourierConfig) -> anyhow::Result<()> {
    if config.queue.backend == QueueBackend::Memory {
        warn!("In-memory queue has no consumer in api mode; use standalone instead");
    }
    let queue = connect_queue(config).await?;
    serve_api(config, queue, shutdown_signal()).await
}

pub async fn worker(config: &CourierConfig) -> anyhow::Result<()> {
    if config.queue.backend == QueueBackend::Memory {
        bail!("The worker needs a broker-backed queue; use standalone for the in-memory queue");
    }
    let queue = connect_queue(config).await?;

    let closer = queue.clone();
    let shutdown = shutdown_signal();
    tokio::spawn(async move {
        wait_for_shutdown(shutdown).await;
        if let Err(e) = closer.close().await {
            error!("Failed to close queue: {}", e);
        }
    });

    let stats = consumer(config, queue).run().await?;
    info!(processed = stats.processed, failed = stats.failed, "Worker stopped");
    Ok(())
}

/// API and worker over one in-memory queue. On shutdown the server stops,
/// the queue closes and the worker drains what is left.
pub async fn standalone(config: &CourierConfig) -> anyhow::Result<()> {
    let queue: Arc<dyn MessageQueue> = Arc::new(
        MemoryQueue::new(config.queue.name.clone()).with_placement(config.queue.carrier_placement),
    );

    let worker = consumer(config, queue.clone());
    let worker = tokio::spawn(async move { worker.run().await });

    serve_api(config, queue, shutdown_signal()).await?;

    let stats = worker.await.context("Worker task panicked")??;
    info!(processed = stats.processed, failed = stats.failed, "Worker drained");
    Ok(())
}
