use apache_avro::Schema;

use crate::error::SinkError;
use crate::event::EventRecord;
use crate::registry::{SchemaId, SchemaIdResolver};

/// Первый байт registry-обёртки.
pub const MAGIC_BYTE: u8 = 0x00;
/// magic byte + 4 байта schema id (big-endian).
pub const HEADER_LEN: usize = 5;

// ═══════════════════════════════════════════════════════════════
//  RecordEncoder
// ═══════════════════════════════════════════════════════════════

/// Сериализация значения сообщения для topic'а.
pub trait RecordEncoder: Send + Sync {
    fn encode(&self, topic: &str, record: &EventRecord) -> Result<Vec<u8>, SinkError>;
}

// ═══════════════════════════════════════════════════════════════
//  AvroRecordEncoder
// ═══════════════════════════════════════════════════════════════

/// Отдаёт сырые Avro байты записи.
///
/// С writer-схемой каждая запись декодируется перед отправкой и должна
/// быть прочитана целиком; иначе `SinkError::Format`.
#[derive(Debug, Clone)]
pub struct AvroRecordEncoder {
    schema: Option<Schema>,
}

impl AvroRecordEncoder {
    pub fn new(schema: Schema) -> Self {
        Self { schema: Some(schema) }
    }

    /// Без проверки против схемы.
    pub fn unchecked() -> Self {
        Self { schema: None }
    }
}

impl RecordEncoder for AvroRecordEncoder {
    fn encode(&self, _topic: &str, record: &EventRecord) -> Result<Vec<u8>, SinkError> {
        if let Some(schema) = &self.schema {
            let mut reader = record.as_bytes();
            apache_avro::from_avro_datum(schema, &mut reader, None)
                .map_err(|e| SinkError::Format(format!("record does not match writer schema: {e}")))?;
            if !reader.is_empty() {
                return Err(SinkError::Format(format!(
                    "record does not match writer schema: {} trailing bytes",
                    reader.len()
                )));
            }
        }
        Ok(record.as_bytes().to_vec())
    }
}

// ═══════════════════════════════════════════════════════════════
//  FramedEncoder
// ═══════════════════════════════════════════════════════════════

/// Обёртка над любым `RecordEncoder`: `[0x00][schema id BE32][payload]`.
///
/// Schema id резолвится один раз в `new()`; `encode()` к resolver'у
/// больше не обращается.
#[derive(Debug, Clone)]
pub struct FramedEncoder<E> {
    inner: E,
    schema_id: SchemaId,
}

impl<E: RecordEncoder> FramedEncoder<E> {
    pub async fn new(
        inner: E,
        resolver: &dyn SchemaIdResolver,
        subject: &str,
        schema: &Schema,
    ) -> Result<Self, SinkError> {
        let schema_id = resolver.resolve(subject, schema).await?;
        tracing::debug!(%subject, %schema_id, "bound schema id");
        Ok(Self::with_schema_id(inner, schema_id))
    }

    pub fn with_schema_id(inner: E, schema_id: SchemaId) -> Self {
        Self { inner, schema_id }
    }

    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }
}

impl<E: RecordEncoder> RecordEncoder for FramedEncoder<E> {
    fn encode(&self, topic: &str, record: &EventRecord) -> Result<Vec<u8>, SinkError> {
        let payload = self.inner.encode(topic, record)?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        frame(self.schema_id, &payload, &mut out);
        Ok(out)
    }
}

/// Записать registry-обёртку и payload в `out`.
pub fn frame(schema_id: SchemaId, payload: &[u8], out: &mut Vec<u8>) {
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(payload);
}

/// Разобрать обёртку: schema id и payload.
pub fn unframe(data: &[u8]) -> Result<(SchemaId, &[u8]), SinkError> {
    if data.len() < HEADER_LEN {
        return Err(SinkError::Format(format!("framed payload too short: {} bytes", data.len())));
    }
    if data[0] != MAGIC_BYTE {
        return Err(SinkError::Format(format!("unknown magic byte {:#04x}", data[0])));
    }
    let id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((SchemaId::new(id), &data[HEADER_LEN..]))
}
