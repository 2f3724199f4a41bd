// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module provides the consuming side of the worker. A `ConsumerSession` attaches an
//! auto-ack consumer to the queue derived from the broker options and drives the dispatch
//! loop over it, re-attaching whenever the consumer stream ends, until shutdown.
//!
//! Deliveries are acknowledged by the broker when sent, so a message whose handler fails
//! or panics is not redelivered.

use crate::{
    backoff::BackoffPolicy,
    connection::ConnectionManager,
    dispatcher::{DeliveryStream, DispatchState, Dispatcher},
    errors::AmqpError,
    message::Delivery,
    options::BrokerOptions,
};
use async_trait::async_trait;
use futures_util::{future, Stream, StreamExt};
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel};
use opentelemetry::Context;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Application callback invoked once per delivery.
///
/// Invocations never overlap: the next delivery is handed over only after `exec` returns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, delivery: &Delivery);
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&Delivery) + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, delivery: &Delivery) {
        self(delivery)
    }
}

/// Consume-capable session.
pub struct ConsumerSession {
    manager: ConnectionManager,
    consumer_tag: String,
}

impl ConsumerSession {
    /// Connects to the broker and declares the topology.
    ///
    /// # Parameters
    /// * `options` - Broker URL and topology settings
    /// * `backoff` - Delays between reconnect and re-attach attempts
    /// * `shutdown` - Cancelling this token stops `serve`
    pub async fn new(
        options: BrokerOptions,
        backoff: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Result<ConsumerSession, AmqpError> {
        let consumer_tag = format!("{}-{}", options.connection_name(), Uuid::new_v4());
        let manager = ConnectionManager::connect(options, backoff, shutdown).await?;

        Ok(ConsumerSession {
            manager,
            consumer_tag,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.manager.is_alive()
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Serves deliveries to `handler` until shutdown.
    ///
    /// Consumer and connection errors are logged and never end the loop. When the consumer
    /// stream ends the session reconnects if needed and attaches a new consumer.
    ///
    /// # Returns
    /// Ok(()) after shutdown, or a fatal error raised while reconnecting
    pub async fn serve<H>(&mut self, handler: &H) -> Result<(), AmqpError>
    where
        H: ConsumerHandler + ?Sized,
    {
        let dispatcher = Dispatcher::new(handler);
        let shutdown = self.manager.shutdown_token();
        let mut retry = AttachRetry::new(*self.manager.backoff());

        let result = loop {
            if !self.manager.is_alive() {
                break Ok(());
            }

            let mut deliveries = match self.attach().await {
                Ok(stream) => {
                    retry.attached();
                    stream
                }
                Err(AmqpError::SessionClosed) => break Ok(()),
                Err(err) if err.is_fatal() => break Err(err),
                Err(err) => {
                    let delay = match retry.failed() {
                        Ok(delay) => delay,
                        Err(exhausted) => {
                            error!(error = err.to_string(), "giving up attaching the consumer");
                            break Err(exhausted);
                        }
                    };

                    warn!(
                        error = err.to_string(),
                        delay_ms = delay.as_millis() as u64,
                        "failure to attach the consumer, retrying"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            match dispatcher
                .drain(&mut deliveries, self.manager.errors(), &shutdown)
                .await
            {
                DispatchState::Stopped => break Ok(()),
                DispatchState::Running => info!("re-attaching consumer"),
            }
        };

        self.manager.close().await;
        info!("dispatch loop stopped");

        result
    }

    /// Starts an auto-ack consumer on the topology queue.
    async fn attach(&mut self) -> Result<DeliveryStream, AmqpError> {
        let channel = self.manager.channel().await?;
        let queue = self.manager.topology().queue().name().to_owned();

        let consumer = match channel
            .basic_consume(
                &queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: true,
                    exclusive: self.manager.options().exclusive(),
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = %queue, "failure to declare consumer");
                Err(AmqpError::BindingConsumerError(queue.clone()))
            }
            Ok(c) => Ok(c),
        }?;

        info!(queue = %queue, consumer_tag = %self.consumer_tag, "consumer attached");

        Ok(delivery_stream(consumer, channel, queue))
    }
}

/// Spacing between failed attach attempts. A successful attach starts the sequence over.
struct AttachRetry {
    policy: BackoffPolicy,
    delays: Box<dyn Iterator<Item = Duration> + Send>,
    failures: usize,
}

impl AttachRetry {
    fn new(policy: BackoffPolicy) -> Self {
        AttachRetry {
            delays: Box::new(policy.delays()),
            policy,
            failures: 0,
        }
    }

    fn attached(&mut self) {
        self.delays = Box::new(self.policy.delays());
        self.failures = 0;
    }

    /// Delay before the next attempt, or `ReconnectExhausted` once a bounded policy runs out.
    fn failed(&mut self) -> Result<Duration, AmqpError> {
        self.failures += 1;
        self.delays
            .next()
            .ok_or(AmqpError::ReconnectExhausted(self.failures))
    }
}

/// Adapts a lapin consumer into a stream of deliveries.
fn delivery_stream(
    consumer: lapin::Consumer,
    channel: Arc<Channel>,
    queue: String,
) -> DeliveryStream {
    let items = consumer.map(move |item| match item {
        Ok(delivery) => Ok(Delivery::from_lapin(&queue, delivery)),
        Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
    });

    until_channel_down(items, move || channel.status().connected())
}

/// Ends `items` right after an error seen while `channel_up` reports the channel closed.
///
/// Errors on a live channel are passed through and the stream keeps going.
fn until_channel_down<S, F>(items: S, channel_up: F) -> DeliveryStream
where
    S: Stream<Item = Result<Delivery, AmqpError>> + Send + 'static,
    F: Fn() -> bool + Send + 'static,
{
    items
        .scan(false, move |closed, item| {
            if *closed {
                return future::ready(None);
            }
            if item.is_err() && !channel_up() {
                *closed = true;
            }
            future::ready(Some(item))
        })
        .boxed()
}
