//! Shared test doubles: an in-memory broker client and a collecting reporter.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kafka_sink::{
    AvroRecordEncoder, BrokerClient, Delivery, FailureReporter, IdentifierCodec, ProducerRecord, SendFailure, SinkBinding,
    SinkError, SinkMode,
};
use processing_pool::{BoxFuture, OverflowPolicy, PoolConfig};
use tokio::sync::Semaphore;

/// Broker client that keeps every sent record in memory.
#[derive(Default)]
pub struct MemoryBroker {
    sent: Mutex<Vec<ProducerRecord>>,
    closes: AtomicUsize,
    sends_after_close: AtomicUsize,
    delivered: Arc<AtomicUsize>,
    delivered_at_close: AtomicUsize,
    fail_keys: HashSet<Vec<u8>>,
    gate: Option<Arc<Semaphore>>,
    acks: Option<Arc<Semaphore>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records with one of these keys are accepted, then their delivery
    /// fails with a broker error.
    pub fn failing(keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_keys: keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
            ..Self::default()
        })
    }

    /// Every send waits for a permit from `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self { gate: Some(gate), ..Self::default() })
    }

    /// Records are accepted at once; each delivery waits for a permit
    /// from `acks`.
    pub fn slow_acks(acks: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self { acks: Some(acks), ..Self::default() })
    }

    /// Records accepted by `send`, in acceptance order.
    pub fn sent(&self) -> Vec<ProducerRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sends_after_close(&self) -> usize {
        self.sends_after_close.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// How many deliveries had completed when `close` was called.
    pub fn delivered_at_close(&self) -> usize {
        self.delivered_at_close.load(Ordering::SeqCst)
    }
}

impl BrokerClient for MemoryBroker {
    fn send(&self, record: ProducerRecord) -> BoxFuture<'_, Result<Delivery, SinkError>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.closes.load(Ordering::SeqCst) > 0 {
                self.sends_after_close.fetch_add(1, Ordering::SeqCst);
                return Err(SinkError::ClientClosed);
            }
            // Yield so that workers actually interleave on the shared client.
            tokio::task::yield_now().await;
            let fails = self.fail_keys.contains(&record.key);
            self.sent.lock().unwrap().push(record);

            let acks = self.acks.clone();
            let delivered = self.delivered.clone();
            Ok(Delivery::new(async move {
                if let Some(acks) = acks {
                    acks.acquire().await.unwrap().forget();
                }
                if fails {
                    return Err(SinkError::Broker("injected failure".into()));
                }
                delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            self.delivered_at_close.store(self.delivered(), Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Reporter that keeps failures for inspection.
#[derive(Default)]
pub struct CollectingReporter {
    failures: Mutex<Vec<SendFailure>>,
}

impl CollectingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<String> {
        self.failures.lock().unwrap().iter().map(|f| f.key.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<SendFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap())
    }
}

impl FailureReporter for CollectingReporter {
    fn report(&self, failure: SendFailure) {
        self.failures.lock().unwrap().push(failure);
    }
}

/// Plain binding without record validation on top of `client`.
pub fn plain_binding(client: Arc<MemoryBroker>) -> SinkBinding {
    SinkBinding {
        name: "kafka".into(),
        topic: "events".into(),
        mode: SinkMode::Plain,
        schema_id: None,
        key_codec: Arc::new(IdentifierCodec::new(SinkMode::Plain).unwrap()),
        value_codec: Arc::new(AvroRecordEncoder::unchecked()),
        client,
    }
}

pub fn pool_config(workers: usize, queue_capacity: usize, overflow: OverflowPolicy) -> PoolConfig {
    PoolConfig { workers, queue_capacity, overflow }
}

pub const TRIPLET_SCHEMA: &str = r#"{"type":"record","name":"Triplet","fields":[
    {"name":"a","type":"int"},{"name":"b","type":"int"},{"name":"c","type":"int"}]}"#;
