//! Registry lifecycle: durability across reopen, schema checks, close.

use ackq::{Error, QueueKind, QueueOptions, Registry, StoreOptions, JournalMode};

#[test]
fn items_survive_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");

    {
        let registry = Registry::open(&path).unwrap();
        let queue = registry.queue("mail", QueueOptions::new()).unwrap();
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        queue.enqueue("c").unwrap();
        queue.dequeue().unwrap();
        registry.close().unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    let queue = registry.queue("mail", QueueOptions::new()).unwrap();
    assert_eq!(queue.values().unwrap(), vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn reopening_recovers_abandoned_deliveries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");

    let abandoned = {
        let registry = Registry::open(&path).unwrap();
        let queue = registry.queue("mail", QueueOptions::new()).unwrap();
        queue.enqueue("first").unwrap();
        queue.enqueue("second").unwrap();
        let delivery = queue.dequeue_with_ack().unwrap().unwrap();
        registry.close().unwrap();
        delivery
    };

    let registry = Registry::open(&path).unwrap();
    let queue = registry.queue("mail", QueueOptions::new()).unwrap();
    assert_eq!(queue.stats().unwrap().processing, 0);
    assert!(!queue.acknowledge(&abandoned.ack_id).unwrap());
    assert_eq!(
        queue.values().unwrap(),
        vec![b"first".to_vec(), b"second".to_vec()]
    );
}

#[test]
fn recovery_on_open_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");

    let in_flight = {
        let registry = Registry::open(&path).unwrap();
        let queue = registry.queue("mail", QueueOptions::new()).unwrap();
        queue.enqueue("job").unwrap();
        queue.dequeue_with_ack().unwrap().unwrap()
    };

    let registry = Registry::open(&path).unwrap();
    let queue = registry
        .queue("mail", QueueOptions::new().recover_on_open(false))
        .unwrap();
    assert_eq!(queue.stats().unwrap().processing, 1);
    assert!(queue.acknowledge(&in_flight.ack_id).unwrap());
    assert_eq!(queue.stats().unwrap().done, 1);
}

#[test]
fn ids_are_not_reused_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");

    let first = {
        let registry = Registry::open(&path).unwrap();
        let queue = registry
            .queue("mail", QueueOptions::new().retain_on_completion(false))
            .unwrap();
        let id = queue.enqueue("job").unwrap();
        queue.dequeue().unwrap();
        id
    };

    let registry = Registry::open(&path).unwrap();
    let queue = registry.queue("mail", QueueOptions::new()).unwrap();
    assert!(queue.enqueue("next").unwrap() > first);
}

#[test]
fn delete_journal_mode_is_durable_too() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");
    let options = StoreOptions {
        journal_mode: JournalMode::Delete,
        ..StoreOptions::default()
    };

    {
        let registry = Registry::open_with(&path, &options).unwrap();
        let queue = registry.priority_queue("jobs", QueueOptions::new()).unwrap();
        queue.enqueue("low", 9).unwrap();
        queue.enqueue("high", 1).unwrap();
    }

    let registry = Registry::open_with(&path, &options).unwrap();
    let queue = registry.priority_queue("jobs", QueueOptions::new()).unwrap();
    assert_eq!(queue.dequeue().unwrap(), Some(b"high".to_vec()));
}

#[test]
fn queues_in_one_store_are_independent() {
    let registry = Registry::in_memory().unwrap();
    let mail = registry.queue("mail", QueueOptions::new()).unwrap();
    let jobs = registry.priority_queue("jobs", QueueOptions::new()).unwrap();

    mail.enqueue("m").unwrap();
    jobs.enqueue("j", 0).unwrap();

    assert_eq!(mail.dequeue().unwrap(), Some(b"m".to_vec()));
    assert_eq!(mail.dequeue().unwrap(), None);
    assert_eq!(jobs.len().unwrap(), 1);
}

#[test]
fn opening_with_the_wrong_kind_is_a_schema_mismatch() {
    let registry = Registry::in_memory().unwrap();
    registry.queue("mail", QueueOptions::new()).unwrap();
    registry.priority_queue("jobs", QueueOptions::new()).unwrap();

    match registry.priority_queue("mail", QueueOptions::new()) {
        Err(Error::SchemaMismatch { queue, expected }) => {
            assert_eq!(queue, "mail");
            assert_eq!(expected, QueueKind::Priority);
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
    assert!(matches!(
        registry.queue("jobs", QueueOptions::new()),
        Err(Error::SchemaMismatch { .. })
    ));
}

#[test]
fn invalid_queue_names_are_rejected() {
    let registry = Registry::in_memory().unwrap();
    for name in ["", "1abc", "has space", "drop\"table", "sqlite_master"] {
        assert!(
            matches!(
                registry.queue(name, QueueOptions::new()),
                Err(Error::InvalidQueueName(_))
            ),
            "{name:?} should be rejected"
        );
    }
    assert!(registry.queue("_ok_42", QueueOptions::new()).is_ok());
}

#[test]
fn closed_registry_fails_store_operations() {
    let registry = Registry::in_memory().unwrap();
    let queue = registry.queue("mail", QueueOptions::new()).unwrap();
    queue.enqueue("job").unwrap();

    registry.close().unwrap();
    registry.close().unwrap();
    assert!(registry.is_closed());

    assert!(matches!(queue.enqueue("late"), Err(Error::StoreClosed)));
    assert!(matches!(queue.len(), Err(Error::StoreClosed)));
    assert!(matches!(
        registry.queue("other", QueueOptions::new()),
        Err(Error::StoreClosed)
    ));
}

#[test]
fn location_reports_the_store_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queues.db");
    let registry = Registry::open(&path).unwrap();
    assert!(registry.location().ends_with("queues.db"));
}
