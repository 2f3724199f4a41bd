// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the types describing the queue the worker consumes from and the
//! binding that links it to the exchange.

use lapin::types::{AMQPValue, FieldTable, ShortShortUInt, ShortString};
use std::collections::BTreeMap;

/// Constant for the argument used to enable message priorities on a queue
pub const AMQP_HEADERS_MAX_PRIORITY: &str = "x-max-priority";

/// Queue declaration parameters, built by chaining the setters below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) max_priority: Option<u8>,
}

impl QueueDefinition {
    /// Transient, shared, never auto-deleted and without priorities until told otherwise.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            delete: false,
            exclusive: false,
            max_priority: None,
        }
    }

    /// The queue and its persistent messages survive a broker restart.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Auto-delete once the last consumer goes away.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Exclusive queues die with their connection and are declared again on reconnect.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Enables priorities up to `max` through the `x-max-priority` argument.
    pub fn max_priority(mut self, max: u8) -> Self {
        self.max_priority = Some(max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Declaration arguments derived from the definition.
    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        if let Some(max) = self.max_priority {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_PRIORITY),
                AMQPValue::ShortShortUInt(ShortShortUInt::from(max)),
            );
        }

        FieldTable::from(args)
    }
}

/// Links the queue to the exchange on a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Binding for `queue`; exchange and key start empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_queue_has_no_arguments() {
        let def = QueueDefinition::new("notification.mataair").durable();

        assert!(def.arguments().inner().is_empty());
        assert!(def.is_durable());
        assert!(!def.is_auto_delete());
        assert!(!def.is_exclusive());
    }

    #[test]
    fn priority_queue_declares_max_priority() {
        let def = QueueDefinition::new("notification.mataair").max_priority(1);
        let args = def.arguments();

        assert_eq!(
            args.inner().get(AMQP_HEADERS_MAX_PRIORITY),
            Some(&AMQPValue::ShortShortUInt(1))
        );
    }

    #[test]
    fn binding_links_queue_and_exchange() {
        let binding = QueueBinding::new("notification.mataair")
            .exchange("notification_mataair")
            .routing_key("notification.mataair");

        assert_eq!(binding.queue_name(), "notification.mataair");
        assert_eq!(binding.exchange_name(), "notification_mataair");
        assert_eq!(binding.key(), "notification.mataair");
    }
}
