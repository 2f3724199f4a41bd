// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use anyhow::{anyhow, Result};
use rabbitmq_worker::{configs::WorkerConfig, AmqpError, ConsumerSession, Delivery};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cfg = WorkerConfig::load()?;
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(err) => error!(error = err.to_string(), "failure to listen for shutdown signal"),
        }
        trigger.cancel();
    });

    let mut session =
        match ConsumerSession::new(cfg.broker_options()?, cfg.backoff()?, shutdown).await {
            Ok(session) => session,
            Err(AmqpError::SessionClosed) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

    info!(consumer_tag = session.consumer_tag(), "background job is now running");

    session.serve(&listen_request).await?;

    info!("background job stopped");
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("failure to install the log subscriber: {}", e))
}

/// Acknowledges receipt in the log. Payloads are expected to be JSON documents.
fn listen_request(delivery: &Delivery) {
    if let Err(err) = serde_json::from_slice::<serde_json::Value>(delivery.body()) {
        warn!(
            delivery_tag = delivery.delivery_tag(),
            error = err.to_string(),
            "message body is not valid json"
        );
    }

    info!(delivery_tag = delivery.delivery_tag(), "message received");
}
