use std::sync::Arc;

use crate::broker::{BrokerClient, KafkaBrokerClient};
use crate::config::{KafkaConfig, KafkaSinkConfig, SinkMode};
use crate::error::SinkError;
use crate::identifier::IdentifierCodec;
use crate::record::{AvroRecordEncoder, FramedEncoder, RecordEncoder};
use crate::registry::{
    RegistrySchemaIdResolver, SchemaId, SchemaIdResolver, SchemaLookup, StaticSchemaIdResolver,
};

// ═══════════════════════════════════════════════════════════════
//  SinkBinding
// ═══════════════════════════════════════════════════════════════

/// Всё, с чем работает flush-пул одного sink'а: topic, режим, кодеки
/// и общий клиент брокера. Не меняется после сборки.
#[derive(Clone)]
pub struct SinkBinding {
    pub name: String,
    pub topic: String,
    pub mode: SinkMode,
    /// Есть только в режиме `SchemaRegistryFramed`.
    pub schema_id: Option<SchemaId>,
    pub key_codec: Arc<IdentifierCodec>,
    pub value_codec: Arc<dyn RecordEncoder>,
    pub client: Arc<dyn BrokerClient>,
}

impl std::fmt::Debug for SinkBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkBinding")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("mode", &self.mode)
            .field("schema_id", &self.schema_id)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════
//  SinkFactory
// ═══════════════════════════════════════════════════════════════

/// Собирает `SinkBinding` из конфига sink'а.
///
/// Любая ошибка (нет схемы, нет schema id, registry недоступен)
/// возвращается до того, как что-либо будет запущено.
pub struct SinkFactory<'a> {
    kafka: &'a KafkaConfig,
    schemas: &'a dyn SchemaLookup,
    resolver: Option<Arc<dyn SchemaIdResolver>>,
}

impl<'a> SinkFactory<'a> {
    pub fn new(kafka: &'a KafkaConfig, schemas: &'a dyn SchemaLookup) -> Self {
        Self { kafka, schemas, resolver: None }
    }

    pub fn kafka(&self) -> &KafkaConfig {
        self.kafka
    }

    /// Использовать этот resolver для sink'ов без заранее заданного schema_id
    /// вместо HTTP клиента к `kafka.schema_registry_url`.
    pub fn with_resolver(mut self, resolver: Arc<dyn SchemaIdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Подключиться к брокерам из `kafka` конфига.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerClient>, SinkError> {
        let client = KafkaBrokerClient::connect(self.kafka).await?;
        Ok(Arc::new(client))
    }

    /// Собрать кодеки sink'а и связать их с клиентом.
    pub async fn build(
        &self,
        sink: &KafkaSinkConfig,
        client: Arc<dyn BrokerClient>,
    ) -> Result<SinkBinding, SinkError> {
        sink.validate()?;

        let key_codec = Arc::new(IdentifierCodec::new(sink.mode)?);
        let found = self.schemas.lookup(&sink.name)?;

        let base = if sink.validate_records {
            AvroRecordEncoder::new(found.schema.clone())
        } else {
            AvroRecordEncoder::unchecked()
        };

        let (value_codec, schema_id): (Arc<dyn RecordEncoder>, _) = match sink.mode {
            SinkMode::Plain => (Arc::new(base), None),
            SinkMode::SchemaRegistryFramed => {
                let resolver = self.resolver_for(sink, found.schema_id)?;
                let subject = format!("{}-value", sink.topic);
                let framed = FramedEncoder::new(base, resolver.as_ref(), &subject, &found.schema).await?;
                let id = framed.schema_id();
                (Arc::new(framed), Some(id))
            }
        };

        tracing::info!(
            sink = %sink.name,
            topic = %sink.topic,
            mode = %sink.mode,
            schema_id = ?schema_id.map(SchemaId::get),
            "sink bound"
        );

        Ok(SinkBinding {
            name: sink.name.clone(),
            topic: sink.topic.clone(),
            mode: sink.mode,
            schema_id,
            key_codec,
            value_codec,
            client,
        })
    }

    fn resolver_for(
        &self,
        sink: &KafkaSinkConfig,
        configured: Option<SchemaId>,
    ) -> Result<Arc<dyn SchemaIdResolver>, SinkError> {
        if let Some(id) = configured {
            return Ok(Arc::new(StaticSchemaIdResolver::new(id)));
        }
        if let Some(resolver) = &self.resolver {
            return Ok(resolver.clone());
        }
        match &self.kafka.schema_registry_url {
            Some(url) => Ok(Arc::new(RegistrySchemaIdResolver::new(url)?)),
            None => Err(SinkError::MissingSchemaId(sink.name.clone())),
        }
    }
}
