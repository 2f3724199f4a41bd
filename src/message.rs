// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages
//!
//! Inbound deliveries handed to the consumer handler and the priority levels used when
//! publishing. Payloads are opaque bytes; the worker never inspects them.

use lapin::{types::ShortString, BasicProperties};

/// Content type attached to every published message
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Priority attached to a published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Unprioritized,
    Prioritized,
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        match priority {
            Priority::Unprioritized => 0,
            Priority::Prioritized => 1,
        }
    }
}

/// One message handed from the queue to the consumer.
///
/// Deliveries are acknowledged by the broker as soon as they are sent, so holding on
/// to one has no effect on redelivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub(crate) queue: String,
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) delivery_tag: u64,
    pub(crate) redelivered: bool,
    pub(crate) properties: BasicProperties,
    pub(crate) data: Vec<u8>,
}

impl Delivery {
    /// Builds a delivery from its parts.
    ///
    /// # Parameters
    /// * `queue` - Queue the message was consumed from
    /// * `routing_key` - Routing key the message was published with
    /// * `data` - Message payload
    pub fn new(queue: &str, routing_key: &str, data: Vec<u8>) -> Delivery {
        Delivery {
            queue: queue.to_owned(),
            exchange: String::new(),
            routing_key: routing_key.to_owned(),
            delivery_tag: 0,
            redelivered: false,
            properties: BasicProperties::default(),
            data,
        }
    }

    pub fn with_exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.to_owned();
        self
    }

    pub fn with_delivery_tag(mut self, tag: u64) -> Self {
        self.delivery_tag = tag;
        self
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Converts a lapin delivery consumed from `queue`, taking ownership of its payload.
    pub(crate) fn from_lapin(queue: &str, delivery: lapin::message::Delivery) -> Delivery {
        Delivery {
            queue: queue.to_owned(),
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    /// Raw payload bytes.
    pub fn body(&self) -> &[u8] {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type().as_ref().map(ShortString::as_str)
    }

    pub fn priority(&self) -> Option<u8> {
        *self.properties.priority()
    }

    pub fn is_persistent(&self) -> bool {
        *self.properties.delivery_mode() == Some(PERSISTENT_DELIVERY_MODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_levels_map_to_amqp_values() {
        assert_eq!(u8::from(Priority::Unprioritized), 0);
        assert_eq!(u8::from(Priority::Prioritized), 1);
        assert_eq!(Priority::default(), Priority::Unprioritized);
    }

    #[test]
    fn delivery_exposes_metadata() {
        let props = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_priority(1);

        let body = br#"{"a":1}"#.to_vec();
        let delivery = Delivery::new("notification.mataair", "notification.mataair", body)
            .with_exchange("notification_mataair")
            .with_delivery_tag(7)
            .with_properties(props);

        assert_eq!(delivery.queue(), "notification.mataair");
        assert_eq!(delivery.exchange(), "notification_mataair");
        assert_eq!(delivery.delivery_tag(), 7);
        assert!(!delivery.redelivered());
        assert_eq!(delivery.body(), br#"{"a":1}"#);
        assert_eq!(delivery.content_type(), Some(JSON_CONTENT_TYPE));
        assert_eq!(delivery.priority(), Some(1));
        assert!(delivery.is_persistent());
    }

    #[test]
    fn bare_delivery_has_no_metadata() {
        let delivery = Delivery::new("q", "q", vec![]);

        assert_eq!(delivery.content_type(), None);
        assert_eq!(delivery.priority(), None);
        assert!(!delivery.is_persistent());
    }
}
