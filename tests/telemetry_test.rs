//! Telemetry setup without an exporter, plus the span helpers.

use ackq::telemetry::queue::{record_status_transition, start_delivery_span, start_sweep_span};
use ackq::telemetry::{TelemetryConfig, init_telemetry};
use ackq::{AckId, Delivery, ItemId, QueueOptions, Registry, Status};

#[test]
fn local_telemetry_and_spans() {
    let guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "ackq-test".to_string(),
        log_level: "debug".to_string(),
    })
    .unwrap();
    assert!(!guard.is_exporting());
    guard.force_flush();

    // A second global subscriber is refused.
    assert!(
        init_telemetry(TelemetryConfig {
            endpoint: None,
            service_name: "ackq-test".to_string(),
            log_level: "info".to_string(),
        })
        .is_err()
    );

    let delivery = Delivery {
        id: ItemId(7),
        payload: b"job".to_vec(),
        ack_id: AckId::new(),
    };
    let span = start_delivery_span("jobs", &delivery);
    record_status_transition(&span, Status::Pending, Status::Processing);
    record_status_transition(&span, Status::Processing, Status::Done);
    let _sweep = start_sweep_span("jobs");

    // Queue operations log and record metrics with the subscriber installed.
    let registry = Registry::in_memory().unwrap();
    let queue = registry.queue("jobs", QueueOptions::new()).unwrap();
    queue.enqueue("job").unwrap();
    let delivery = queue.dequeue_with_ack().unwrap().unwrap();
    assert!(queue.acknowledge(&delivery.ack_id).unwrap());
}
