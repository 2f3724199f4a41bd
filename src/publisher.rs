// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides the publishing side of the worker. A `PublisherSession` owns the
//! connection manager and keeps the connection alive; `RabbitMQPublisher` is the cheap,
//! clonable handle that sends messages over whatever channel the session currently holds.
//!
//! Every message is persistent, carries the `application/json` content type and one of the
//! two supported priorities. Sends are fire-and-forget: there are no publisher confirms and
//! no retries, a transport failure is returned to the caller.

use crate::{
    backoff::BackoffPolicy,
    connection::ConnectionManager,
    errors::AmqpError,
    message::{Priority, JSON_CONTENT_TYPE, PERSISTENT_DELIVERY_MODE},
    options::BrokerOptions,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Sends payloads to the exchange and routing key fixed at construction.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message with the given priority.
    ///
    /// # Returns
    /// Ok(()) once the message was handed to the broker, or the transport error
    async fn publish(&self, payload: &[u8], priority: Priority) -> Result<(), AmqpError>;

    /// Publishes with priority 1.
    async fn publish_prioritized(&self, payload: &[u8]) -> Result<(), AmqpError> {
        self.publish(payload, Priority::Prioritized).await
    }

    /// Publishes with priority 0.
    async fn publish_unprioritized(&self, payload: &[u8]) -> Result<(), AmqpError> {
        self.publish(payload, Priority::Unprioritized).await
    }
}

/// RabbitMQ implementation of the Publisher trait.
///
/// The handle follows the session across reconnects; while the session is reconnecting
/// `publish` fails with `AmqpError::NotConnected`.
#[derive(Clone)]
pub struct RabbitMQPublisher {
    channel: watch::Receiver<Option<Arc<Channel>>>,
    exchange: String,
    routing_key: String,
}

impl RabbitMQPublisher {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(&self, payload: &[u8], priority: Priority) -> Result<(), AmqpError> {
        let current = self.channel.borrow().clone();
        let Some(channel) = current else {
            return Err(AmqpError::NotConnected);
        };

        let headers = otel::inject_headers(&Context::current());

        match channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                message_properties(priority, headers),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => {
                debug!(
                    exchange = %self.exchange,
                    routing_key = %self.routing_key,
                    priority = u8::from(priority),
                    "message published"
                );
                Ok(())
            }
        }
    }
}

/// Properties attached to every published message.
pub(crate) fn message_properties(priority: Priority, headers: FieldTable) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_priority(priority.into())
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(headers)
}

/// A channel error always means the broker closed the channel, even if lapin has not
/// updated its status yet.
fn needs_reconnect(err: &AmqpError, connected: bool) -> bool {
    matches!(err, AmqpError::ChannelError(_)) || !connected
}

/// Publish-capable session.
///
/// Constructing the session connects and declares the topology, so the first publish
/// never races the declarations.
pub struct PublisherSession {
    manager: ConnectionManager,
}

impl PublisherSession {
    /// Connects to the broker and declares the topology.
    pub async fn new(
        options: BrokerOptions,
        backoff: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Result<PublisherSession, AmqpError> {
        let manager = ConnectionManager::connect(options, backoff, shutdown).await?;
        Ok(PublisherSession { manager })
    }

    /// Handle for sending messages. Handles stay valid across reconnects.
    pub fn publisher(&self) -> RabbitMQPublisher {
        let opts = self.manager.options();
        RabbitMQPublisher {
            channel: self.manager.subscribe(),
            exchange: opts.exchange_name().to_owned(),
            routing_key: opts.routing_key().to_owned(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.manager.is_alive()
    }

    /// Keeps the connection alive until shutdown.
    ///
    /// Connection and channel errors are logged; when one leaves the channel or the
    /// connection closed the session reconnects and declares the topology again.
    ///
    /// # Returns
    /// Ok(()) after shutdown, or a fatal error raised while reconnecting
    pub async fn serve(&mut self) -> Result<(), AmqpError> {
        let shutdown = self.manager.shutdown_token();

        while self.manager.is_alive() {
            let err = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(err) = self.manager.errors().recv() => err,
            };
            error!(error = err.to_string(), "client error");

            if needs_reconnect(&err, self.manager.is_connected()) {
                match self.manager.establish().await {
                    Ok(_) => info!("publisher reconnected"),
                    Err(AmqpError::SessionClosed) => break,
                    Err(err) => return Err(err),
                }
            }
        }

        self.manager.close().await;
        Ok(())
    }
}
