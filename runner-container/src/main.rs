use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_core::config::BridgeConfig;
use bridge_core::errors::BridgeError;
use bridge_core::position::MemoryPositionStore;
use bridge_core::sink::Sink;
use bridge_core::sink::log::LogSink;
use bridge_core::source::kafka::KafkaConnector;
use bridge_core::task::{PollOutcome, SourceTask};
use bridge_core::telemetry::init_tracing;
use tracing::{error, info, warn};

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Entry point for running the bridge as a long-lived container job.
///
/// Loads config from `BRIDGE_CONFIG`, then polls until Ctrl-C:
///     - read a batch from the owned Kafka partitions
///     - hand it to the sink, which confirms delivered positions
///     - commit confirmed offsets on the task's schedule
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BridgeConfig::from_env()?;
    config.validate().context("Invalid bridge configuration")?;

    let store = Arc::new(MemoryPositionStore::new());
    let sink = LogSink::new(Arc::clone(&store));
    let mut task = SourceTask::start(&config, store, &KafkaConnector)
        .context("Failed to start source task")?;

    let stop = task.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        stop.stop();
    });

    // commits still run on the poll loop, this only asks for one
    let trigger = task.commit_trigger();
    let commit_interval = config.task.commit_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(commit_interval);
        loop {
            ticker.tick().await;
            trigger.request();
        }
    });

    let metrics = task.metrics();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match serde_json::to_string(&metrics.snapshot()) {
                Ok(line) => info!("Task metrics: {}", line),
                Err(e) => warn!("Failed to serialize task metrics: {}", e),
            }
        }
    });

    let mut failure = None;
    loop {
        match task.poll().await {
            PollOutcome::Batch(entries) => {
                let count = entries.len();
                if let Err(e) = sink.put(entries).await {
                    let err = BridgeError::from(e);
                    if !err.is_retryable() {
                        error!("Sink rejected {} entries, stopping: {}", count, err);
                        failure = Some(err);
                        break;
                    }
                    // unconfirmed entries are read again after the next reconcile
                    let delay = err.get_retry_delay_ms();
                    warn!("Sink rejected {} entries, retrying in {} ms: {}", count, delay, err);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
            PollOutcome::Idle(_) => continue,
            PollOutcome::Stopped => break,
        }
    }

    task.stop().await;
    if let Some(err) = failure {
        return Err(anyhow::Error::new(err).context("Bridge stopped on a sink failure"));
    }
    info!("Bridge shut down");
    Ok(())
}
