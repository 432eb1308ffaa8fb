//! Span helpers for consumers and the recovery sweeper.

use tracing::Span;

use crate::model::{Delivery, Status};

/// Start a span covering the processing of one delivery.
///
/// The `item.status` field is declared empty and updated via
/// [`record_status_transition`].
pub fn start_delivery_span(queue: &str, delivery: &Delivery) -> Span {
    tracing::info_span!(
        "queue.process",
        "queue.name" = queue,
        "item.id" = delivery.id.0,
        "item.ack_id" = %delivery.ack_id,
        "item.status" = tracing::field::Empty,
    )
}

/// Start a span for one recovery sweep.
pub fn start_sweep_span(queue: &str) -> Span {
    tracing::info_span!(
        "queue.sweep",
        "queue.name" = queue,
        "sweep.recovered" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an event inside it.
pub fn record_status_transition(span: &Span, from: Status, to: Status) {
    span.record("item.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "status_transition");
    });
}
