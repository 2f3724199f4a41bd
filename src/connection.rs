// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module owns the single logical connection to the broker. It opens the AMQP
//! connection and channel, declares the topology on them and, when the connection is
//! lost, re-establishes everything under the configured backoff policy.
//!
//! Connection-level failures reported by lapin are forwarded into an error stream that
//! the serve loops drain and log. The manager stays alive until the shutdown token passed
//! in at construction time is cancelled.

use crate::{
    backoff::BackoffPolicy,
    errors::AmqpError,
    options::BrokerOptions,
    topology::{AmqpDeclarator, Topology, TopologyDeclarator},
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reply code sent to the broker when closing on shutdown
const REPLY_SUCCESS: u16 = 200;

/// Owner of the broker connection and the channel built on it.
pub struct ConnectionManager {
    options: BrokerOptions,
    topology: Topology,
    backoff: BackoffPolicy,
    shutdown: CancellationToken,
    errors_tx: mpsc::UnboundedSender<AmqpError>,
    errors_rx: mpsc::UnboundedReceiver<AmqpError>,
    connection: Option<Connection>,
    channel: watch::Sender<Option<Arc<Channel>>>,
}

impl ConnectionManager {
    /// Connects to the broker and declares the topology derived from `options`.
    ///
    /// Transient failures are retried under `backoff`. Only invalid options (including a
    /// backoff that does not grow), a topology conflict or an exhausted bounded backoff end
    /// the attempt with an error.
    ///
    /// # Parameters
    /// * `options` - Broker URL and topology settings
    /// * `backoff` - Delays between reconnect attempts
    /// * `shutdown` - Cancelling this token stops the manager and every loop serving it
    ///
    /// # Returns
    /// A connected manager, or the error that made connecting impossible
    pub async fn connect(
        options: BrokerOptions,
        backoff: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Result<ConnectionManager, AmqpError> {
        backoff.validate()?;

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (channel, _) = watch::channel(None);

        let mut manager = ConnectionManager {
            topology: Topology::from_options(&options),
            options,
            backoff,
            shutdown,
            errors_tx,
            errors_rx,
            connection: None,
            channel,
        };

        manager.establish().await?;

        Ok(manager)
    }

    /// True while the session should keep being served.
    pub fn is_alive(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// True when both the connection and the channel are open.
    pub fn is_connected(&self) -> bool {
        let connection_up = self
            .connection
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false);

        let channel_up = self
            .channel
            .borrow()
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false);

        connection_up && channel_up
    }

    /// Connection-level errors, in the order lapin reported them.
    pub fn errors(&mut self) -> &mut mpsc::UnboundedReceiver<AmqpError> {
        &mut self.errors_rx
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Watches the current channel. `None` while reconnecting.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Channel>>> {
        self.channel.subscribe()
    }

    /// Returns the current channel, re-establishing the connection first if it is gone.
    pub async fn channel(&mut self) -> Result<Arc<Channel>, AmqpError> {
        if self.is_connected() {
            if let Some(channel) = self.channel.borrow().clone() {
                return Ok(channel);
            }
        }

        self.establish().await
    }

    /// Drops the current connection and opens a new one, declaring the topology again.
    ///
    /// Attempts are spaced by the backoff policy. Waiting is interrupted by the shutdown
    /// token, in which case `AmqpError::SessionClosed` is returned.
    pub async fn establish(&mut self) -> Result<Arc<Channel>, AmqpError> {
        self.channel.send_replace(None);
        if let Some(stale) = self.connection.take() {
            if stale.status().connected() {
                if let Err(err) = stale.close(REPLY_SUCCESS, "reconnecting").await {
                    debug!(error = err.to_string(), "error closing the stale connection");
                }
            }
        }

        let mut delays = self.backoff.delays();
        let mut attempt = 0;

        loop {
            if !self.is_alive() {
                return Err(AmqpError::SessionClosed);
            }

            attempt += 1;
            let err = match self.open().await {
                Ok((conn, channel)) => match AmqpDeclarator::new(channel.clone())
                    .declare(&self.topology)
                    .await
                {
                    Ok(()) => {
                        info!(attempt, "amqp session established");
                        self.connection = Some(conn);
                        self.channel.send_replace(Some(channel.clone()));
                        return Ok(channel);
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            let Some(delay) = delays.next() else {
                error!(attempt, error = err.to_string(), "giving up reconnecting");
                return Err(AmqpError::ReconnectExhausted(attempt));
            };

            warn!(
                attempt,
                error = err.to_string(),
                delay_ms = delay.as_millis() as u64,
                "amqp connection attempt failed, retrying"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(AmqpError::SessionClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Closes the connection, if any. Used once the session stops being served.
    pub async fn close(&mut self) {
        self.channel.send_replace(None);

        if let Some(conn) = self.connection.take() {
            if !conn.status().connected() {
                return;
            }

            match conn.close(REPLY_SUCCESS, "shutdown").await {
                Ok(()) => debug!("amqp connection closed"),
                Err(err) => error!(error = err.to_string(), "error closing the connection"),
            }
        }
    }

    /// Opens a connection and a channel on it.
    ///
    /// lapin errors on the new connection are forwarded to the error stream.
    async fn open(&self) -> Result<(Connection, Arc<Channel>), AmqpError> {
        debug!("creating amqp connection...");
        let properties = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.options.connection_name.clone()));

        let conn = match Connection::connect(&self.options.url, properties).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        conn.on_error(forward_errors(
            self.errors_tx.clone(),
            "connection",
            AmqpError::ConnectionError,
        ));

        debug!("creating amqp channel...");
        let channel = match conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        // a channel can be closed by the broker while the connection stays up
        channel.on_error(forward_errors(
            self.errors_tx.clone(),
            "channel",
            AmqpError::ChannelError,
        ));

        Ok((conn, Arc::new(channel)))
    }
}

/// Callback that logs a lapin error and forwards it to the error stream as `wrap(message)`.
fn forward_errors(
    errors: mpsc::UnboundedSender<AmqpError>,
    source: &'static str,
    wrap: fn(String) -> AmqpError,
) -> impl FnMut(lapin::Error) + Send + 'static {
    move |err| {
        error!(error = err.to_string(), source, "amqp error");
        let _ = errors.send(wrap(err.to_string()));
    }
}
