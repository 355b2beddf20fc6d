//! Kafka sink: кодеки ключа и значения (plain или в обёртке schema
//! registry), сборка sink'а из конфига и flush-пул, который владеет
//! клиентом брокера.

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod factory;
pub mod flushing;
pub mod identifier;
pub mod record;
pub mod registry;

pub use processing_pool::BoxFuture;

pub use broker::{BatchSettings, BrokerClient, CompressionCodec, Delivery, KafkaBrokerClient, ProducerRecord};
pub use config::{KafkaConfig, KafkaSinkConfig, SchemaConfig, SinkMode};
pub use error::{ErrorKind, SinkError};
pub use event::{Event, EventRecord};
pub use factory::{SinkBinding, SinkFactory};
pub use flushing::{FailureReporter, FlushState, KafkaFlushingPool, SendFailure, TracingFailureReporter};
pub use identifier::{Identifier, IdentifierCodec};
pub use record::{AvroRecordEncoder, FramedEncoder, RecordEncoder};
pub use registry::{
    ConfiguredSchemas, RegistrySchemaIdResolver, SchemaId, SchemaIdResolver, SchemaLookup, SinkSchema,
    StaticSchemaIdResolver,
};
