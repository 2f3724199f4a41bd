// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! Trace context travels in the AMQP message headers: the publisher injects the current
//! context, the dispatcher extracts it and opens a consumer span for every delivery it
//! hands to the handler.

use crate::message::Delivery;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use opentelemetry::{
    global::{self, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, TraceContextExt, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Name of the tracer used for delivery spans
pub(crate) const CONSUMER_TRACER: &str = "amqp consumer";

/// Writes trace context entries into outgoing AMQP headers.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

/// Reads trace context entries from incoming AMQP headers.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a BTreeMap<ShortString, AMQPValue>,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    /// Gets a trace context value from the headers.
    ///
    /// Only long string values are considered, which is what the injector writes.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Serializes `ctx` into a header table for an outgoing message.
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderInjector::new(&mut headers))
    });

    FieldTable::from(headers)
}

/// Creates a consumer span for a delivery.
///
/// The parent context is extracted from the delivery headers. The returned context
/// carries the new span, which ends when the context is dropped.
///
/// # Parameters
/// * `delivery` - The delivery about to be handled
/// * `tracer` - OpenTelemetry tracer
///
/// # Returns
/// A context holding the delivery span
pub(crate) fn delivery_context(delivery: &Delivery, tracer: &BoxedTracer) -> Context {
    let empty = FieldTable::default();
    let headers = delivery.properties().headers().as_ref().unwrap_or(&empty);

    let parent = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(headers.inner()))
    });

    let span = tracer
        .span_builder(Cow::from(delivery.routing_key().to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &parent);

    parent.with_span(span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::LongString;

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = BTreeMap::new();
        HeaderInjector::new(&mut headers).set("TraceParent", "00-abc-def-01".to_owned());

        assert_eq!(
            headers.get("traceparent"),
            Some(&AMQPValue::LongString(LongString::from("00-abc-def-01")))
        );
    }

    #[test]
    fn extractor_reads_only_long_strings() {
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString(LongString::from("00-abc-def-01")),
        );
        headers.insert(ShortString::from("retries"), AMQPValue::LongInt(3));

        let extractor = HeaderExtractor::new(&headers);
        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.get("retries"), None);
        assert_eq!(extractor.get("missing"), None);

        let mut keys = extractor.keys();
        keys.sort();
        assert_eq!(keys, vec!["retries", "traceparent"]);
    }

    #[test]
    fn delivery_without_headers_gets_a_root_span() {
        let tracer = global::tracer(CONSUMER_TRACER);
        let delivery = Delivery::new("q", "q", b"{}".to_vec());

        let ctx = delivery_context(&delivery, &tracer);
        assert!(!ctx.span().span_context().is_remote());
    }
}
