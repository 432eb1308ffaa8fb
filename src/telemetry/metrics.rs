//! Metric instrument factories for ackq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one installed, instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ackq")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation`, `result` ("ok" | "error").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("ackq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: in-flight items returned to pending by a recovery sweep.
/// Labels: `queue`.
pub fn items_recovered() -> Counter<u64> {
    meter()
        .u64_counter("ackq.queue.recovered")
        .with_description("Unacknowledged items requeued by recovery")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ackq.operation.duration_ms")
        .with_description("Queue operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
