// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Worker
//!
//! This module provides the error taxonomy shared by every component of the worker.
//! The `AmqpError` enum separates fatal startup errors (bad configuration, topology
//! conflicts) from transient ones (dropped connections, closed channels, failed publishes)
//! so that the serve loops can decide whether to stop or to keep going.

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use thiserror::Error;

/// Represents errors that can occur while talking to the broker.
///
/// Variants carry the rendered message of the underlying transport error, which keeps
/// the enum comparable in tests and cheap to clone into error streams.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The broker options are structurally invalid (malformed URL, empty names, ...)
    #[error("invalid broker options: {0}")]
    InvalidOptions(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// The broker already holds a definition with different parameters
    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error reported by the consumer stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The session is between connections
    #[error("not connected")]
    NotConnected,

    /// A bounded backoff policy ran out of attempts
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(usize),

    /// The shutdown signal fired
    #[error("session closed")]
    SessionClosed,
}

impl AmqpError {
    /// Whether the error must terminate the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AmqpError::InvalidOptions(_)
                | AmqpError::TopologyConflict(_)
                | AmqpError::ReconnectExhausted(_)
        )
    }
}

/// Reports whether the broker refused a declaration because an entity with the same
/// name already exists with different parameters (AMQP reply code 406).
pub(crate) fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp) => matches!(
            amqp.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_startup_errors() {
        assert!(AmqpError::InvalidOptions("url".to_owned()).is_fatal());
        assert!(AmqpError::TopologyConflict("exchange".to_owned()).is_fatal());
        assert!(AmqpError::ReconnectExhausted(3).is_fatal());
    }

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!AmqpError::ConnectionError("reset".to_owned()).is_fatal());
        assert!(!AmqpError::ConsumerError("closed".to_owned()).is_fatal());
        assert!(!AmqpError::PublishingError("closed".to_owned()).is_fatal());
        assert!(!AmqpError::DeclareQueueError("q".to_owned()).is_fatal());
        assert!(!AmqpError::NotConnected.is_fatal());
    }

    #[test]
    fn non_protocol_errors_are_not_conflicts() {
        assert!(!is_precondition_failed(&lapin::Error::ChannelsLimitReached));
    }
}
