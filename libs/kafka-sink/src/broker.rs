use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use processing_pool::BoxFuture;

use crate::config::KafkaConfig;
use crate::error::SinkError;

// ═══════════════════════════════════════════════════════════════
//  BrokerClient
// ═══════════════════════════════════════════════════════════════

/// Готовое к отправке сообщение: ключ и значение уже сериализованы.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Подтверждение доставки одной записи.
///
/// Резолвится, когда брокер ответил на produce батча с этой записью.
pub struct Delivery(BoxFuture<'static, Result<(), SinkError>>);

impl Delivery {
    pub fn new(ack: impl Future<Output = Result<(), SinkError>> + Send + 'static) -> Self {
        Self(Box::pin(ack))
    }

    /// Уже известный результат.
    pub fn done(result: Result<(), SinkError>) -> Self {
        Self::new(std::future::ready(result))
    }
}

impl Future for Delivery {
    type Output = Result<(), SinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Delivery")
    }
}

/// Клиент брокера, общий для всех flush-воркеров sink'а.
///
/// `send` принимает запись в буфер продюсера и возвращает `Delivery`,
/// не дожидаясь ответа брокера. Записи одного ключа, принятые друг за
/// другом, уходят в брокер в том же порядке. `send` вызывается
/// конкурентно из нескольких воркеров. `close` вызывается один раз,
/// когда ни одного `send` и ни одной `Delivery` уже не ждут.
pub trait BrokerClient: Send + Sync {
    fn send(&self, record: ProducerRecord) -> BoxFuture<'_, Result<Delivery, SinkError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>>;
}

/// Сжатие батчей при produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionCodec {
    #[default]
    None,
    Gzip,
    Lz4,
    Snappy,
}

impl From<CompressionCodec> for Compression {
    fn from(codec: CompressionCodec) -> Self {
        match codec {
            CompressionCodec::None => Compression::NoCompression,
            CompressionCodec::Gzip => Compression::Gzip,
            CompressionCodec::Lz4 => Compression::Lz4,
            CompressionCodec::Snappy => Compression::Snappy,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Partitioning
// ═══════════════════════════════════════════════════════════════

/// murmur2 в варианте Kafka Java-клиента (seed 0x9747b28c).
pub fn murmur2(data: &[u8]) -> i32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h: u32 = 0x9747_b28c ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

/// Партиция для ключа: `(murmur2(key) & 0x7fffffff) % partitions`.
pub fn partition_for(key: &[u8], partitions: usize) -> usize {
    ((murmur2(key) & 0x7fff_ffff) as usize) % partitions.max(1)
}

// ═══════════════════════════════════════════════════════════════
//  Batching
// ═══════════════════════════════════════════════════════════════

/// Размер батча и сколько ждать его наполнения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub linger: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            linger: Duration::from_millis(config.linger_ms),
        }
    }
}

/// Один produce-запрос в партицию.
trait ProduceBatch: Send + Sync + 'static {
    fn produce(&self, records: Vec<Record>) -> BoxFuture<'_, Result<(), String>>;
}

struct PartitionProducer {
    client: PartitionClient,
    compression: CompressionCodec,
}

impl ProduceBatch for PartitionProducer {
    fn produce(&self, records: Vec<Record>) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.client
                .produce(records, self.compression.into())
                .await
                .map(|_offsets| ())
                .map_err(|e| e.to_string())
        })
    }
}

struct Pending {
    record: Record,
    ack: oneshot::Sender<Result<(), String>>,
}

/// Очередь партиции: записи принимаются в порядке вызова `enqueue`.
#[derive(Clone)]
struct BatchQueue {
    tx: mpsc::Sender<Pending>,
}

impl BatchQueue {
    /// Запустить цикл батчинга. Цикл отправляет остаток и завершается,
    /// когда все копии очереди закрыты.
    fn spawn<P: ProduceBatch>(producer: P, settings: BatchSettings) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.batch_size);
        let handle = tokio::spawn(run_batches(producer, rx, settings));
        (Self { tx }, handle)
    }

    async fn enqueue(&self, record: Record) -> Result<Delivery, SinkError> {
        let (ack, delivered) = oneshot::channel();
        self.tx
            .send(Pending { record, ack })
            .await
            .map_err(|_| SinkError::ClientClosed)?;

        Ok(Delivery::new(async move {
            match delivered.await {
                Ok(result) => result.map_err(|e| SinkError::Broker(format!("produce: {e}"))),
                Err(_) => Err(SinkError::ClientClosed),
            }
        }))
    }
}

async fn run_batches<P: ProduceBatch>(producer: P, mut rx: mpsc::Receiver<Pending>, settings: BatchSettings) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(settings.batch_size);
        batch.push(first);

        let deadline = tokio::time::Instant::now() + settings.linger;
        while batch.len() < settings.batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(next)) => batch.push(next),
                Ok(None) | Err(_) => break,
            }
        }

        let (records, acks): (Vec<_>, Vec<_>) = batch.into_iter().map(|p| (p.record, p.ack)).unzip();
        let count = records.len();
        let result = producer.produce(records).await;
        match &result {
            Ok(()) => tracing::trace!(records = count, "batch produced"),
            Err(e) => tracing::warn!(records = count, error = %e, "batch produce failed"),
        }
        for ack in acks {
            let _ = ack.send(result.clone());
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaBrokerClient
// ═══════════════════════════════════════════════════════════════

type Partitions = Arc<[BatchQueue]>;

/// `BrokerClient` поверх rskafka.
///
/// На каждую партицию topic'а своя очередь и цикл батчинга: записи
/// копятся до `batch_size` или `linger_ms` и уходят одним produce.
/// Очереди создаются лениво при первой отправке в topic. После
/// `close()` отправка возвращает `ClientClosed`.
pub struct KafkaBrokerClient {
    client: Client,
    compression: CompressionCodec,
    batch: BatchSettings,
    partitions: RwLock<HashMap<String, Partitions>>,
    batchers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl KafkaBrokerClient {
    pub async fn connect(config: &KafkaConfig) -> Result<Self, SinkError> {
        let client = ClientBuilder::new(config.brokers.clone())
            .build()
            .await
            .map_err(|e| SinkError::Broker(format!("connect {:?}: {e}", config.brokers)))?;
        let batch = BatchSettings::from_config(config);
        tracing::info!(
            brokers = ?config.brokers,
            compression = ?config.compression,
            batch_size = batch.batch_size,
            linger_ms = config.linger_ms,
            "kafka client connected"
        );

        Ok(Self {
            client,
            compression: config.compression,
            batch,
            partitions: RwLock::new(HashMap::new()),
            batchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn partitions(&self, topic: &str) -> Result<Partitions, SinkError> {
        if let Some(found) = self.partitions.read().await.get(topic) {
            return Ok(found.clone());
        }

        let mut cache = self.partitions.write().await;
        if let Some(found) = cache.get(topic) {
            return Ok(found.clone());
        }

        let topics = self
            .client
            .list_topics()
            .await
            .map_err(|e| SinkError::Broker(format!("list topics: {e}")))?;
        let meta = topics
            .into_iter()
            .find(|t| t.name == topic)
            .ok_or_else(|| SinkError::Broker(format!("topic '{topic}' not found")))?;

        let mut clients = Vec::with_capacity(meta.partitions.len());
        for partition in meta.partitions {
            let pc = self
                .client
                .partition_client(topic.to_string(), partition, UnknownTopicHandling::Retry)
                .await
                .map_err(|e| SinkError::Broker(format!("partition {topic}/{partition}: {e}")))?;
            clients.push(pc);
        }
        if clients.is_empty() {
            return Err(SinkError::Broker(format!("topic '{topic}' has no partitions")));
        }

        let mut batchers = self.batchers.lock().await;
        let queues: Vec<BatchQueue> = clients
            .into_iter()
            .map(|client| {
                let producer = PartitionProducer { client, compression: self.compression };
                let (queue, handle) = BatchQueue::spawn(producer, self.batch);
                batchers.push(handle);
                queue
            })
            .collect();

        tracing::debug!(%topic, partitions = queues.len(), "partition producers ready");
        let queues: Partitions = queues.into();
        cache.insert(topic.to_string(), queues.clone());
        Ok(queues)
    }
}

impl BrokerClient for KafkaBrokerClient {
    fn send(&self, record: ProducerRecord) -> BoxFuture<'_, Result<Delivery, SinkError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(SinkError::ClientClosed);
            }
            let partitions = self.partitions(&record.topic).await?;
            let queue = &partitions[partition_for(&record.key, partitions.len())];

            queue
                .enqueue(Record {
                    key: Some(record.key),
                    value: Some(record.value),
                    headers: BTreeMap::new(),
                    timestamp: chrono::Utc::now(),
                })
                .await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            // Закрыть очереди, затем дождаться, пока циклы отправят остаток.
            self.partitions.write().await.clear();
            let batchers = std::mem::take(&mut *self.batchers.lock().await);
            let mut first_error = None;
            for handle in batchers {
                if let Err(e) = handle.await {
                    first_error.get_or_insert(SinkError::Broker(format!("batch task: {e}")));
                }
            }
            tracing::info!("kafka client closed");
            first_error.map_or(Ok(()), Err)
        })
    }
}
