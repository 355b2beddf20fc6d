use serde::Deserialize;

use processing_pool::{OverflowPolicy, PoolConfig};

use crate::broker::CompressionCodec;
use crate::error::SinkError;
use crate::registry::SchemaId;

/// Topic по умолчанию, если в `[[sinks]]` он не задан.
pub const DEFAULT_TOPIC: &str = "events";

// ═══════════════════════════════════════════════════════════════
//  Sink Mode
// ═══════════════════════════════════════════════════════════════

/// Wire-формат sink'а. Выбирается один раз в конфиге.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// Ключ: UTF-8 id, значение: сырой Avro datum.
    #[default]
    #[serde(alias = "naked")]
    Plain,
    /// Значение в обёртке schema registry: magic byte + schema id + Avro.
    #[serde(alias = "confluent")]
    SchemaRegistryFramed,
}

impl std::fmt::Display for SinkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkMode::Plain => f.write_str("plain"),
            SinkMode::SchemaRegistryFramed => f.write_str("schema_registry_framed"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Kafka (global) Config
// ═══════════════════════════════════════════════════════════════

/// Общие настройки Kafka: подключение и размеры flush-пулов.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap брокеры (`host:port`).
    pub brokers: Vec<String>,
    /// Число flush-воркеров на один sink.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Ёмкость очереди одного воркера.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Что делать, когда очередь воркера полна.
    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,
    #[serde(default)]
    pub compression: CompressionCodec,
    /// Максимум записей в одном produce-запросе в партицию.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Сколько ждать наполнения батча, мс.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// URL schema registry. Нужен только sink'ам в режиме
    /// `schema_registry_framed`, у которых нет заранее известного schema_id.
    #[serde(default)]
    pub schema_registry_url: Option<String>,
}

fn default_threads() -> usize {
    2
}
fn default_buffer_size() -> usize {
    1_048_576
}
fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::BackPressure
}
fn default_batch_size() -> usize {
    1000
}
fn default_linger_ms() -> u64 {
    5
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.brokers.is_empty() {
            return Err(SinkError::Config("kafka.brokers must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(SinkError::Config("kafka.batch_size must be > 0".into()));
        }
        self.pool_config().validate()?;
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.threads,
            queue_capacity: self.buffer_size,
            overflow: self.overflow,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Sink Config
// ═══════════════════════════════════════════════════════════════

/// Один Kafka sink: куда писать и в каком формате.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaSinkConfig {
    #[serde(default = "default_sink_name")]
    pub name: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub mode: SinkMode,
    /// Проверять каждую запись против writer-схемы перед отправкой.
    #[serde(default = "default_validate_records")]
    pub validate_records: bool,
}

fn default_sink_name() -> String {
    "kafka".into()
}
fn default_topic() -> String {
    DEFAULT_TOPIC.into()
}
fn default_validate_records() -> bool {
    true
}

impl KafkaSinkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: default_topic(),
            mode: SinkMode::default(),
            validate_records: default_validate_records(),
        }
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.name.is_empty() {
            return Err(SinkError::Config("sink name must not be empty".into()));
        }
        if self.topic.is_empty() {
            return Err(SinkError::Config(format!("sink [{}]: topic must not be empty", self.name)));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Schema Config
// ═══════════════════════════════════════════════════════════════

/// Writer-схема sink'а и (опционально) её id в registry.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    /// Имя sink'а, которому принадлежит схема.
    pub sink: String,
    /// Путь к .avsc файлу.
    pub schema_path: String,
    /// Заранее зарегистрированный id. Без него framed sink обращается
    /// к registry один раз при старте.
    #[serde(default)]
    pub schema_id: Option<SchemaId>,
}
