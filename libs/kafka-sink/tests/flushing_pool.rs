//! Flushing pool lifecycle against an in-memory broker client.
//!
//! Run with: cargo test -p kafka-sink --test flushing_pool

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apache_avro::Schema;
use common::{CollectingReporter, MemoryBroker, TRIPLET_SCHEMA, plain_binding, pool_config};
use kafka_sink::{
    AvroRecordEncoder, ErrorKind, Event, FlushState, Identifier, KafkaFlushingPool, SinkError,
};
use processing_pool::{OverflowPolicy, PoolError, Router};
use tokio::sync::Semaphore;

fn event(id: &str, seq: u32) -> Event {
    Event::new(Identifier::new(seq as i64, id), seq.to_be_bytes().to_vec())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_drains_every_worker_then_closes_once() {
    let broker = MemoryBroker::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(3, 1024, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    );
    pool.start().unwrap();
    assert_eq!(pool.state(), FlushState::Running);

    for seq in 0..600 {
        pool.enqueue(event(&format!("user-{}", seq % 50), seq)).await.unwrap();
    }

    let processed = pool.stop().await.unwrap();
    assert_eq!(processed, 600);
    assert_eq!(pool.state(), FlushState::Stopped);
    assert_eq!(broker.sent().len(), 600);
    assert_eq!(broker.delivered_at_close(), 600);
    assert_eq!(broker.closes(), 1);
    assert_eq!(broker.sends_after_close(), 0);

    // Second stop is a no-op.
    assert_eq!(pool.stop().await.unwrap(), 0);
    assert_eq!(broker.closes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_identifier_order_is_preserved() {
    let broker = MemoryBroker::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(4, 64, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    );
    pool.start().unwrap();

    for seq in 0..1000 {
        pool.enqueue(event(&format!("s{}", seq % 7), seq)).await.unwrap();
    }
    pool.stop().await.unwrap();

    let mut last: HashMap<Vec<u8>, u32> = HashMap::new();
    for record in broker.sent() {
        let seq = u32::from_be_bytes(record.value.as_slice().try_into().unwrap());
        if let Some(prev) = last.insert(record.key.clone(), seq) {
            assert!(prev < seq, "out of order for {:?}: {prev} then {seq}", String::from_utf8_lossy(&record.key));
        }
    }
    assert_eq!(last.len(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_keeps_accepting_while_acks_are_pending() {
    let acks = Arc::new(Semaphore::new(0));
    let broker = MemoryBroker::slow_acks(acks.clone());
    let mut pool = KafkaFlushingPool::new(
        pool_config(1, 8, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    );
    pool.start().unwrap();

    for seq in 0..5 {
        pool.enqueue(event("same", seq)).await.unwrap();
    }

    // No delivery is acknowledged, yet the single worker hands over all five.
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.sent().len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("worker blocked on an unacknowledged send");
    assert_eq!(broker.delivered(), 0);

    let stopping = tokio::spawn(async move {
        let processed = pool.stop().await;
        (pool, processed)
    });

    // Stop waits for the pending deliveries before closing the client.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.closes(), 0);

    acks.add_permits(5);
    let (pool, processed) = stopping.await.unwrap();
    assert_eq!(processed.unwrap(), 5);
    assert_eq!(pool.state(), FlushState::Stopped);
    assert_eq!(broker.delivered_at_close(), 5);
    assert_eq!(broker.closes(), 1);

    let seqs: Vec<u32> = broker
        .sent()
        .iter()
        .map(|r| u32::from_be_bytes(r.value.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(seqs, [0, 1, 2, 3, 4]);
}

struct IdLengthRouter;

impl Router<Event> for IdLengthRouter {
    fn route(&self, event: &Event, workers: usize) -> usize {
        event.key.id().len() % workers
    }
}

#[tokio::test]
async fn equal_ids_share_a_worker() {
    let broker = MemoryBroker::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(4, 8, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    )
    .with_router(Arc::new(IdLengthRouter));

    assert_eq!(pool.worker_for(&event("abc", 1)), None);
    pool.start().unwrap();

    assert_eq!(pool.worker_for(&event("abc", 1)), Some(3));
    assert_eq!(pool.worker_for(&event("abc", 2)), Some(3));
    assert_eq!(pool.worker_for(&event("abcde", 1)), Some(1));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn default_router_is_stable_per_id() {
    let mut pool = KafkaFlushingPool::new(
        pool_config(8, 8, OverflowPolicy::BackPressure),
        plain_binding(MemoryBroker::new()),
    );
    pool.start().unwrap();
    for i in 0..100 {
        let id = format!("session-{i}");
        assert_eq!(pool.worker_for(&event(&id, 1)), pool.worker_for(&event(&id, 999)));
    }
    pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_failures_are_reported_and_workers_keep_going() {
    let broker = MemoryBroker::failing(&["bad"]);
    let reporter = CollectingReporter::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(2, 64, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    )
    .with_reporter(reporter.clone());
    pool.start().unwrap();

    for seq in 0..30 {
        let id = if seq % 3 == 0 { "bad" } else { "good" };
        pool.enqueue(event(id, seq)).await.unwrap();
    }
    assert_eq!(pool.stop().await.unwrap(), 30);

    assert_eq!(broker.sent().len(), 30);
    assert_eq!(broker.delivered(), 20);
    let failures = reporter.take();
    assert_eq!(failures.len(), 10);
    for failure in failures {
        assert!(failure.key.ends_with(":bad"));
        assert_eq!(failure.topic, "events");
        assert_eq!(failure.error.kind(), ErrorKind::Io);
    }
}

#[tokio::test]
async fn records_not_matching_schema_are_reported() {
    let broker = MemoryBroker::new();
    let reporter = CollectingReporter::new();
    let mut binding = plain_binding(broker.clone());
    binding.value_codec = Arc::new(AvroRecordEncoder::new(Schema::parse_str(TRIPLET_SCHEMA).unwrap()));

    let mut pool = KafkaFlushingPool::new(pool_config(1, 8, OverflowPolicy::BackPressure), binding)
        .with_reporter(reporter.clone());
    pool.start().unwrap();
    pool.enqueue(Event::new(Identifier::new(1, "ok"), vec![1, 2, 3])).await.unwrap();
    pool.enqueue(Event::new(Identifier::new(2, "short"), vec![1, 2])).await.unwrap();
    pool.stop().await.unwrap();

    assert_eq!(broker.sent().len(), 1);
    let failures = reporter.take();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error.kind(), ErrorKind::Format);
}

#[tokio::test]
async fn enqueue_outside_running_is_rejected() {
    let broker = MemoryBroker::new();
    let reporter = CollectingReporter::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(1, 8, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    )
    .with_reporter(reporter.clone());

    let err = pool.enqueue(event("early", 1)).await.unwrap_err();
    assert!(matches!(err, SinkError::Lifecycle { state: "created", .. }));

    pool.start().unwrap();
    pool.stop().await.unwrap();

    let err = pool.enqueue(event("late", 2)).await.unwrap_err();
    assert!(matches!(err, SinkError::Lifecycle { state: "stopped", .. }));

    assert_eq!(reporter.count(), 2);
    assert!(broker.sent().is_empty());
}

#[tokio::test]
async fn start_twice_fails() {
    let mut pool = KafkaFlushingPool::new(
        pool_config(1, 8, OverflowPolicy::BackPressure),
        plain_binding(MemoryBroker::new()),
    );
    pool.start().unwrap();
    assert!(matches!(pool.start(), Err(SinkError::Lifecycle { state: "running", .. })));
    pool.stop().await.unwrap();
    assert!(pool.start().is_err());
}

#[tokio::test]
async fn stop_without_start_still_closes_client() {
    let broker = MemoryBroker::new();
    let mut pool = KafkaFlushingPool::new(
        pool_config(2, 8, OverflowPolicy::BackPressure),
        plain_binding(broker.clone()),
    );
    assert_eq!(pool.stop().await.unwrap(), 0);
    assert_eq!(pool.state(), FlushState::Stopped);
    assert_eq!(broker.closes(), 1);
    assert!(pool.binding().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_with_drop_policy_rejects() {
    let gate = Arc::new(Semaphore::new(0));
    let broker = MemoryBroker::gated(gate.clone());
    let reporter = CollectingReporter::new();
    let mut pool = KafkaFlushingPool::new(pool_config(1, 1, OverflowPolicy::Drop), plain_binding(broker.clone()))
        .with_reporter(reporter.clone());
    pool.start().unwrap();

    // The worker blocks on the first send; at most one more fits the queue.
    let mut accepted = 0;
    let err = loop {
        match pool.enqueue(event("x", accepted)).await {
            Ok(()) => accepted += 1,
            Err(e) => break e,
        }
        assert!(accepted <= 2);
    };
    assert!(matches!(err, SinkError::Pool(PoolError::QueueFull { worker: 0, .. })));
    assert_eq!(reporter.count(), 1);

    gate.add_permits(16);
    assert_eq!(pool.stop().await.unwrap(), accepted as u64);
    assert_eq!(broker.sent().len(), accepted as usize);
    assert_eq!(broker.closes(), 1);
}
