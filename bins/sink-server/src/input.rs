use apache_avro::Schema;
use apache_avro::types::Value;
use serde::Deserialize;

use kafka_sink::{EventRecord, Identifier};

use crate::error::ServerError;

// ═══════════════════════════════════════════════════════════════
//  Input line
// ═══════════════════════════════════════════════════════════════

/// Одна строка stdin:
/// `{"sink": "sessions", "identifier": "0:lz0b2k8w:abc", "record": {...}}`.
///
/// Без `sink` событие уходит во все sink'и.
#[derive(Debug, Deserialize)]
pub struct InputLine {
    #[serde(default)]
    pub sink: Option<String>,
    pub identifier: IdentifierInput,
    pub record: serde_json::Value,
}

/// Идентификатор строкой (`version:ts36:id`) или по частям.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdentifierInput {
    Text(String),
    Parts { timestamp: i64, id: String },
}

impl InputLine {
    pub fn parse(line: &str) -> Result<Self, ServerError> {
        serde_json::from_str(line).map_err(|e| ServerError::Input(format!("bad line: {e}")))
    }

    pub fn identifier(&self) -> Result<Identifier, ServerError> {
        match &self.identifier {
            IdentifierInput::Text(text) => text.parse::<Identifier>().map_err(|e| ServerError::Input(format!("{e}"))),
            IdentifierInput::Parts { timestamp, id } => Ok(Identifier::new(*timestamp, id.as_str())),
        }
    }

    /// Закодировать `record` writer-схемой sink'а в Avro datum.
    pub fn encode_record(&self, schema: &Schema) -> Result<EventRecord, ServerError> {
        let value = json_to_avro(&self.record, schema)?;
        let bytes = apache_avro::to_avro_datum(schema, value)
            .map_err(|e| ServerError::Input(format!("avro: {e}")))?;
        Ok(EventRecord::new(bytes))
    }
}

// ═══════════════════════════════════════════════════════════════
//  JSON → Avro conversion
// ═══════════════════════════════════════════════════════════════

fn mismatch(val: &serde_json::Value, schema: &Schema) -> ServerError {
    ServerError::Input(format!("cannot convert {val} to {schema:?}"))
}

fn json_to_avro(val: &serde_json::Value, schema: &Schema) -> Result<Value, ServerError> {
    match (val, schema) {
        (serde_json::Value::Null, Schema::Null) => Ok(Value::Null),
        (serde_json::Value::Bool(b), Schema::Boolean) => Ok(Value::Boolean(*b)),
        (serde_json::Value::Number(n), Schema::Int) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int)
            .ok_or_else(|| mismatch(val, schema)),
        (serde_json::Value::Number(n), Schema::Long | Schema::TimestampMillis) => {
            let l = n.as_i64().ok_or_else(|| mismatch(val, schema))?;
            Ok(match schema {
                Schema::TimestampMillis => Value::TimestampMillis(l),
                _ => Value::Long(l),
            })
        }
        (serde_json::Value::Number(n), Schema::Float) => {
            Ok(Value::Float(n.as_f64().ok_or_else(|| mismatch(val, schema))? as f32))
        }
        (serde_json::Value::Number(n), Schema::Double) => {
            Ok(Value::Double(n.as_f64().ok_or_else(|| mismatch(val, schema))?))
        }
        (serde_json::Value::String(s), Schema::String) => Ok(Value::String(s.clone())),
        (serde_json::Value::String(s), Schema::Bytes) => Ok(Value::Bytes(s.as_bytes().to_vec())),
        (serde_json::Value::String(s), Schema::Enum(e)) => e
            .symbols
            .iter()
            .position(|sym| sym == s)
            .map(|idx| Value::Enum(idx as u32, s.clone()))
            .ok_or_else(|| mismatch(val, schema)),
        (serde_json::Value::Array(items), Schema::Array(inner)) => {
            let items: Result<Vec<Value>, ServerError> =
                items.iter().map(|item| json_to_avro(item, &inner.items)).collect();
            Ok(Value::Array(items?))
        }
        (serde_json::Value::Object(map), Schema::Map(inner)) => {
            let mut entries = std::collections::HashMap::with_capacity(map.len());
            for (k, v) in map {
                entries.insert(k.clone(), json_to_avro(v, &inner.types)?);
            }
            Ok(Value::Map(entries))
        }
        (serde_json::Value::Object(map), Schema::Record(record_schema)) => {
            let mut fields = Vec::with_capacity(record_schema.fields.len());
            for field in &record_schema.fields {
                // Нет ключа: default из схемы, иначе null.
                let field_val = map
                    .get(&field.name)
                    .or(field.default.as_ref())
                    .unwrap_or(&serde_json::Value::Null);
                fields.push((field.name.clone(), json_to_avro(field_val, &field.schema)?));
            }
            Ok(Value::Record(fields))
        }
        (val, Schema::Union(union_schema)) => {
            for (idx, variant) in union_schema.variants().iter().enumerate() {
                if let Ok(v) = json_to_avro(val, variant) {
                    return Ok(Value::Union(idx as u32, Box::new(v)));
                }
            }
            Err(mismatch(val, schema))
        }
        _ => Err(mismatch(val, schema)),
    }
}
