use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use apache_avro::Schema;
use serde::Deserialize;

use processing_pool::BoxFuture;

use crate::config::SchemaConfig;
use crate::error::SinkError;

// ═══════════════════════════════════════════════════════════════
//  SchemaId
// ═══════════════════════════════════════════════════════════════

/// Id версии схемы в registry. На проводе 4 байта big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(u32);

impl SchemaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════
//  SchemaIdResolver
// ═══════════════════════════════════════════════════════════════

/// Клиент registry с точки зрения кодека: схема → id.
///
/// Вызывается только при сборке sink'а, никогда на горячем пути.
pub trait SchemaIdResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        subject: &'a str,
        schema: &'a Schema,
    ) -> BoxFuture<'a, Result<SchemaId, SinkError>>;
}

/// Всегда отвечает заранее назначенным id. Сети не трогает.
#[derive(Debug, Clone, Copy)]
pub struct StaticSchemaIdResolver(SchemaId);

impl StaticSchemaIdResolver {
    pub fn new(id: SchemaId) -> Self {
        Self(id)
    }
}

impl SchemaIdResolver for StaticSchemaIdResolver {
    fn resolve<'a>(
        &'a self,
        _subject: &'a str,
        _schema: &'a Schema,
    ) -> BoxFuture<'a, Result<SchemaId, SinkError>> {
        let id = self.0;
        Box::pin(async move { Ok(id) })
    }
}

const REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

/// Регистрирует схему в registry по HTTP и возвращает выданный id.
///
/// `POST {url}/subjects/{subject}/versions`; registry отвечает тем же id,
/// если схема уже зарегистрирована.
#[derive(Debug, Clone)]
pub struct RegistrySchemaIdResolver {
    base_url: String,
    http: reqwest::Client,
}

impl RegistrySchemaIdResolver {
    pub fn new(base_url: &str) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl SchemaIdResolver for RegistrySchemaIdResolver {
    fn resolve<'a>(
        &'a self,
        subject: &'a str,
        schema: &'a Schema,
    ) -> BoxFuture<'a, Result<SchemaId, SinkError>> {
        Box::pin(async move {
            let url = format!("{}/subjects/{subject}/versions", self.base_url);
            let body = serde_json::to_vec(&serde_json::json!({ "schema": schema.canonical_form() }))
                .map_err(|e| SinkError::Registry(format!("encode request: {e}")))?;

            let response = self
                .http
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, REGISTRY_CONTENT_TYPE)
                .body(body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(SinkError::Registry(format!("register '{subject}': {status}: {detail}")));
            }

            let registered: RegisterResponse = response.json().await?;
            tracing::info!(%subject, id = registered.id, "registered schema");
            Ok(SchemaId::new(registered.id))
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  SchemaLookup
// ═══════════════════════════════════════════════════════════════

/// Writer-схема sink'а и её id, если он назначен заранее.
#[derive(Debug, Clone)]
pub struct SinkSchema {
    pub schema: Schema,
    pub schema_id: Option<SchemaId>,
}

/// Имя sink'а → его схема. Вызывается один раз при сборке sink'а.
pub trait SchemaLookup: Send + Sync {
    fn lookup(&self, sink_name: &str) -> Result<SinkSchema, SinkError>;
}

/// Схемы из `[[schemas]]` конфига.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredSchemas {
    schemas: HashMap<String, SinkSchema>,
}

impl ConfiguredSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sink: impl Into<String>, schema: SinkSchema) {
        self.schemas.insert(sink.into(), schema);
    }

    /// Загрузить .avsc файлы из конфига.
    pub fn load(configs: &[SchemaConfig]) -> Result<Self, SinkError> {
        let mut schemas = Self::new();
        for cfg in configs {
            let text = std::fs::read_to_string(&cfg.schema_path)
                .map_err(|e| SinkError::Config(format!("cannot read schema '{}': {e}", cfg.schema_path)))?;
            let schema = Schema::parse_str(&text)?;
            tracing::info!(
                sink = %cfg.sink,
                path = %cfg.schema_path,
                schema_id = ?cfg.schema_id.map(SchemaId::get),
                "loaded schema"
            );
            schemas.insert(cfg.sink.clone(), SinkSchema { schema, schema_id: cfg.schema_id });
        }
        Ok(schemas)
    }
}

impl SchemaLookup for ConfiguredSchemas {
    fn lookup(&self, sink_name: &str) -> Result<SinkSchema, SinkError> {
        self.schemas
            .get(sink_name)
            .cloned()
            .ok_or_else(|| SinkError::SchemaNotFound(sink_name.to_string()))
    }
}
