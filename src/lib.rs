// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod backoff;
pub mod configs;
pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod options;
pub mod publisher;
pub mod queue;
pub mod topology;

pub use backoff::BackoffPolicy;
pub use connection::ConnectionManager;
pub use consumer::{ConsumerHandler, ConsumerSession};
pub use dispatcher::{DispatchState, Dispatcher};
pub use errors::AmqpError;
pub use message::{Delivery, Priority};
pub use options::BrokerOptions;
pub use publisher::{Publisher, PublisherSession, RabbitMQPublisher};
pub use topology::{Topology, TopologyDeclarator};
