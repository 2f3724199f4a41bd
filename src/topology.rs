// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module derives the worker topology from the broker options and declares it on
//! the broker. The topology is one exchange, one queue named after the routing key and
//! the binding between them.
//!
//! The main components are:
//! - `Topology`: the declarations derived from `BrokerOptions`
//! - `TopologyDeclarator` trait: interface for installing a topology
//! - `AmqpDeclarator`: implementation of the trait over a lapin channel
//!
//! Declarations are idempotent on the broker side, so the topology is declared again
//! after every reconnect. A declaration that contradicts an existing broker definition
//! is reported as `AmqpError::TopologyConflict`.

use crate::{
    errors::{is_precondition_failed, AmqpError},
    exchange::ExchangeDefinition,
    options::BrokerOptions,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Exchange, queue and binding used by both the publisher and the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue: QueueDefinition,
    pub(crate) binding: QueueBinding,
}

impl Topology {
    /// Derives the topology from the broker options.
    ///
    /// The exchange is always durable and never auto-deleted. The queue takes its name
    /// from the routing key and its durability from the options.
    pub fn from_options(opts: &BrokerOptions) -> Topology {
        let exchange = ExchangeDefinition::new(&opts.exchange_name)
            .kind(opts.exchange_kind.clone())
            .durable();

        let mut queue = QueueDefinition::new(&opts.routing_key);
        if opts.durable {
            queue = queue.durable();
        }
        if let Some(max) = opts.max_priority {
            queue = queue.max_priority(max);
        }

        let binding = QueueBinding::new(&opts.routing_key)
            .exchange(&opts.exchange_name)
            .routing_key(&opts.routing_key);

        Topology {
            exchange,
            queue,
            binding,
        }
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    pub fn binding(&self) -> &QueueBinding {
        &self.binding
    }
}

/// Trait defining the interface for installing a topology on the broker.
#[async_trait]
pub trait TopologyDeclarator {
    /// Declares the exchange, then the queue, then the binding.
    async fn declare(&self, topology: &Topology) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the TopologyDeclarator trait.
pub struct AmqpDeclarator {
    channel: Arc<Channel>,
}

impl AmqpDeclarator {
    /// Creates a new AmqpDeclarator instance.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// A new AmqpDeclarator instance
    pub fn new(channel: Arc<Channel>) -> AmqpDeclarator {
        AmqpDeclarator { channel }
    }
}

#[async_trait]
impl TopologyDeclarator for AmqpDeclarator {
    /// Installs the topology to the RabbitMQ server.
    ///
    /// # Returns
    /// Ok(()) on success or AmqpError on failure
    async fn declare(&self, topology: &Topology) -> Result<(), AmqpError> {
        self.install_exchange(&topology.exchange).await?;
        self.install_queue(&topology.queue).await?;
        self.binding_queue(&topology.binding).await
    }
}

impl AmqpDeclarator {
    async fn install_exchange(&self, exch: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", exch.name);

        match self
            .channel
            .exchange_declare(
                &exch.name,
                lapin::ExchangeKind::from(&exch.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: exch.durable,
                    auto_delete: exch.delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) if is_precondition_failed(&err) => {
                error!(
                    error = err.to_string(),
                    name = %exch.name,
                    "exchange already exists with different parameters"
                );
                Err(AmqpError::TopologyConflict(format!(
                    "exchange `{}`: {}",
                    exch.name, err
                )))
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %exch.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(exch.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", exch.name);
                Ok(())
            }
        }
    }

    async fn install_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                def.arguments(),
            )
            .await
        {
            Err(err) if is_precondition_failed(&err) => {
                error!(
                    error = err.to_string(),
                    name = %def.name,
                    "queue already exists with different parameters"
                );
                Err(AmqpError::TopologyConflict(format!(
                    "queue `{}`: {}",
                    def.name, err
                )))
            }
            Err(err) => {
                error!(error = err.to_string(), name = %def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn binding_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");

                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => {
                debug!("queue was bounded");
                Ok(())
            }
        }
    }
}
