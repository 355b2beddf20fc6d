//! Wire-level scenarios: factory → flushing pool → broker bytes.
//!
//! Run with: cargo test -p kafka-sink --test scenarios

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use apache_avro::Schema;
use common::{MemoryBroker, TRIPLET_SCHEMA, pool_config};
use kafka_sink::{
    ConfiguredSchemas, Event, Identifier, KafkaConfig, KafkaFlushingPool, KafkaSinkConfig, SchemaId,
    SchemaIdResolver, SinkError, SinkFactory, SinkMode, SinkSchema,
};
use processing_pool::{BoxFuture, OverflowPolicy};

fn kafka() -> KafkaConfig {
    serde_json::from_value(serde_json::json!({ "brokers": ["localhost:9092"] })).unwrap()
}

fn schemas(schema_id: Option<u32>) -> ConfiguredSchemas {
    let mut schemas = ConfiguredSchemas::new();
    schemas.insert(
        "kafka",
        SinkSchema {
            schema: Schema::parse_str(TRIPLET_SCHEMA).unwrap(),
            schema_id: schema_id.map(SchemaId::new),
        },
    );
    schemas
}

fn sink(mode: SinkMode) -> KafkaSinkConfig {
    let mut sink = KafkaSinkConfig::new("kafka");
    sink.mode = mode;
    sink
}

#[tokio::test]
async fn framed_sink_writes_registry_envelope() {
    let kafka = kafka();
    let schemas = schemas(Some(42));
    let broker = MemoryBroker::new();

    let binding = SinkFactory::new(&kafka, &schemas)
        .build(&sink(SinkMode::SchemaRegistryFramed), broker.clone())
        .await
        .unwrap();
    assert_eq!(binding.topic, "events");
    assert_eq!(binding.schema_id, Some(SchemaId::new(42)));

    let mut pool = KafkaFlushingPool::new(pool_config(2, 16, OverflowPolicy::BackPressure), binding);
    pool.start().unwrap();
    pool.enqueue(Event::new(Identifier::new(1, "abc"), vec![0x01, 0x02, 0x03])).await.unwrap();
    pool.stop().await.unwrap();

    let sent = broker.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "events");
    assert_eq!(sent[0].value, vec![0x00, 0x00, 0x00, 0x00, 0x2A, 0x01, 0x02, 0x03]);
    // Keys carry no registry header.
    assert_eq!(sent[0].key, vec![0x02, 0x30, 0x02, 0x06, 0x61, 0x62, 0x63]);
}

#[tokio::test]
async fn plain_sink_writes_raw_bytes() {
    let kafka = kafka();
    let schemas = schemas(Some(42));
    let broker = MemoryBroker::new();

    let binding = SinkFactory::new(&kafka, &schemas)
        .build(&sink(SinkMode::Plain), broker.clone())
        .await
        .unwrap();
    let mut pool = KafkaFlushingPool::new(pool_config(1, 16, OverflowPolicy::BackPressure), binding);
    pool.start().unwrap();
    pool.enqueue(Event::new(Identifier::new(1, "abc"), vec![0x01, 0x02, 0x03])).await.unwrap();
    pool.stop().await.unwrap();

    let sent = broker.sent();
    assert_eq!(sent[0].key, vec![0x61, 0x62, 0x63]);
    assert_eq!(sent[0].value, vec![0x01, 0x02, 0x03]);
}

#[derive(Default)]
struct CountingResolver {
    calls: AtomicUsize,
    subjects: std::sync::Mutex<Vec<String>>,
}

impl SchemaIdResolver for CountingResolver {
    fn resolve<'a>(&'a self, subject: &'a str, _schema: &'a Schema) -> BoxFuture<'a, Result<SchemaId, SinkError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().unwrap().push(subject.to_string());
            Ok(SchemaId::new(7))
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schema_id_is_resolved_once_per_sink() {
    let kafka = kafka();
    let schemas = schemas(None);
    let resolver = Arc::new(CountingResolver::default());
    let broker = MemoryBroker::new();

    let binding = SinkFactory::new(&kafka, &schemas)
        .with_resolver(resolver.clone())
        .build(&sink(SinkMode::SchemaRegistryFramed), broker.clone())
        .await
        .unwrap();
    let mut pool = KafkaFlushingPool::new(pool_config(3, 64, OverflowPolicy::BackPressure), binding);
    pool.start().unwrap();
    for i in 0..200 {
        pool.enqueue(Event::new(Identifier::new(i, format!("id-{i}")), vec![2, 4, 6])).await.unwrap();
    }
    pool.stop().await.unwrap();

    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*resolver.subjects.lock().unwrap(), ["events-value"]);
    let sent = broker.sent();
    assert_eq!(sent.len(), 200);
    assert!(sent.iter().all(|r| r.value == [0x00, 0x00, 0x00, 0x00, 0x07, 2, 4, 6]));
}

#[tokio::test]
async fn configured_schema_id_wins_over_resolver() {
    let kafka = kafka();
    let schemas = schemas(Some(42));
    let resolver = Arc::new(CountingResolver::default());

    let binding = SinkFactory::new(&kafka, &schemas)
        .with_resolver(resolver.clone())
        .build(&sink(SinkMode::SchemaRegistryFramed), MemoryBroker::new())
        .await
        .unwrap();
    assert_eq!(binding.schema_id, Some(SchemaId::new(42)));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_build_leaves_client_untouched() {
    let kafka = kafka();
    let schemas = schemas(None);
    let broker = MemoryBroker::new();

    let err = SinkFactory::new(&kafka, &schemas)
        .build(&sink(SinkMode::SchemaRegistryFramed), broker.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::MissingSchemaId(_)));
    assert_eq!(broker.closes(), 0);
    assert!(broker.sent().is_empty());
}
