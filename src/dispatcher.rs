// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Dispatcher
//!
//! The serving loop that hands deliveries to the consumer handler. While running it waits
//! on three event sources at once:
//!
//! 1. a delivery from the consumer stream, which is logged and passed to the handler
//! 2. an error from the consumer stream, which is logged
//! 3. an error from the connection, which is logged
//!
//! The handler runs to completion before the next event is taken, so at most one handler
//! invocation is in flight and deliveries are handled in the order the broker sent them.
//! Errors never stop the loop; only the shutdown token does.

use crate::{consumer::ConsumerHandler, errors::AmqpError, message::Delivery, otel};
use futures_util::{future::FutureExt, stream::BoxStream, Stream, StreamExt};
use opentelemetry::global::{self, BoxedTracer};
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Stream of deliveries and consumer-level errors for one attached consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Where the loop stands after draining a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// The consumer stream ended; the session must attach a new consumer and keep going.
    Running,
    /// Shutdown was requested. Terminal.
    Stopped,
}

/// Dispatches deliveries to a handler, one at a time.
pub struct Dispatcher<'h, H: ?Sized> {
    handler: &'h H,
    tracer: BoxedTracer,
}

impl<'h, H> Dispatcher<'h, H>
where
    H: ConsumerHandler + ?Sized,
{
    pub fn new(handler: &'h H) -> Self {
        Dispatcher {
            handler,
            tracer: global::tracer(otel::CONSUMER_TRACER),
        }
    }

    /// Serves one consumer until its stream ends or shutdown is requested.
    ///
    /// # Parameters
    /// * `deliveries` - Deliveries and consumer errors, in broker order
    /// * `connection_errors` - Connection-level errors
    /// * `shutdown` - Stops the loop once cancelled
    ///
    /// # Returns
    /// `DispatchState::Running` when the consumer must be re-attached,
    /// `DispatchState::Stopped` after shutdown
    pub async fn drain<S>(
        &self,
        deliveries: &mut S,
        connection_errors: &mut mpsc::UnboundedReceiver<AmqpError>,
        shutdown: &CancellationToken,
    ) -> DispatchState
    where
        S: Stream<Item = Result<Delivery, AmqpError>> + Unpin + ?Sized,
    {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("shutdown requested, stopping dispatch");
                    return DispatchState::Stopped;
                }

                Some(err) = connection_errors.recv() => {
                    error!(error = err.to_string(), "client error");
                }

                item = deliveries.next() => match item {
                    Some(Ok(delivery)) => self.dispatch(delivery).await,
                    Some(Err(err)) => error!(error = err.to_string(), "consumer error"),
                    None => {
                        warn!("consumer stream closed");
                        return DispatchState::Running;
                    }
                },
            }
        }
    }

    async fn dispatch(&self, delivery: Delivery) {
        info!(
            queue = delivery.queue(),
            delivery_tag = delivery.delivery_tag(),
            body = %String::from_utf8_lossy(delivery.body()),
            "received message"
        );

        let ctx = otel::delivery_context(&delivery, &self.tracer);

        // the delivery is already acknowledged, a panicking handler only loses this message
        let outcome = AssertUnwindSafe(self.handler.exec(&ctx, &delivery))
            .catch_unwind()
            .await;

        if outcome.is_err() {
            error!(
                delivery_tag = delivery.delivery_tag(),
                "handler panicked while processing message"
            );
        }
    }
}
