// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! This module provides the types describing the exchange the worker publishes to and
//! binds its queue to. Exchanges are the routing mechanism in RabbitMQ that determine how
//! messages are distributed to queues.

use crate::errors::AmqpError;
use std::{fmt, str::FromStr};

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    /// Parses the broker spelling of an exchange type (`direct`, `fanout`, `topic`, `headers`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(AmqpError::InvalidOptions(format!(
                "unsupported exchange kind `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        };
        f.write_str(name)
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure exchange definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a new exchange definition with the given name.
    ///
    /// By default, the exchange is created as a non-durable Direct exchange.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
        }
    }

    /// Sets the exchange type.
    ///
    /// # Parameters
    /// * `kind` - The exchange type
    ///
    /// # Returns
    /// Self for method chaining
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_spelling() {
        assert_eq!("direct".parse::<ExchangeKind>().unwrap(), ExchangeKind::Direct);
        assert_eq!("Fanout".parse::<ExchangeKind>().unwrap(), ExchangeKind::Fanout);
        assert_eq!(" topic ".parse::<ExchangeKind>().unwrap(), ExchangeKind::Topic);
        assert_eq!("HEADERS".parse::<ExchangeKind>().unwrap(), ExchangeKind::Headers);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "x-delayed-message".parse::<ExchangeKind>().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn display_matches_parse() {
        for kind in [
            ExchangeKind::Direct,
            ExchangeKind::Fanout,
            ExchangeKind::Topic,
            ExchangeKind::Headers,
        ] {
            assert_eq!(kind.to_string().parse::<ExchangeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn converts_to_lapin_kind() {
        assert_eq!(
            lapin::ExchangeKind::from(&ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        );
        assert_eq!(
            lapin::ExchangeKind::from(&ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        );
    }

    #[test]
    fn builder_sets_flags() {
        let def = ExchangeDefinition::new("notification_mataair")
            .kind(ExchangeKind::Direct)
            .durable();

        assert_eq!(def.name(), "notification_mataair");
        assert!(def.is_durable());
        assert!(!def.is_auto_delete());
    }
}
