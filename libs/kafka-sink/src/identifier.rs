use std::fmt;
use std::str::FromStr;

use apache_avro::Schema;
use apache_avro::types::Value;

use crate::config::SinkMode;
use crate::error::SinkError;

/// Единственная поддерживаемая версия формата идентификатора.
pub const IDENTIFIER_VERSION: char = '0';

const IDENTIFIER_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Identifier",
    "fields": [
        {"name": "version", "type": "string", "doc": "Identifier Version"},
        {"name": "timestamp", "type": "long", "doc": "Timestamp"},
        {"name": "id", "type": "string", "doc": "Message identifier"}
    ]
}"#;

// ═══════════════════════════════════════════════════════════════
//  Identifier
// ═══════════════════════════════════════════════════════════════

/// Идентификатор сессии/события: версия формата, время создания (мс)
/// и непрозрачный id. Используется как ключ сообщения в брокере.
///
/// Текстовая форма: `<version>:<timestamp base36>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    version: char,
    timestamp: i64,
    id: String,
}

impl Identifier {
    pub fn new(timestamp: i64, id: impl Into<String>) -> Self {
        Self::with_version(IDENTIFIER_VERSION, timestamp, id)
    }

    pub fn with_version(version: char, timestamp: i64, id: impl Into<String>) -> Self {
        Self { version, timestamp, id: id.into() }
    }

    pub fn version(&self) -> char {
        self.version
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Разобрать текстовую форму. `None` если формат не распознан.
    pub fn try_parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, ':');
        let version = parts.next()?;
        let timestamp = parts.next()?;
        let id = parts.next()?;

        let mut chars = version.chars();
        let version = chars.next()?;
        if chars.next().is_some() || id.is_empty() {
            return None;
        }
        let timestamp = i64::from_str_radix(timestamp, 36).ok()?;
        Some(Self::with_version(version, timestamp, id))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.version, to_base36(self.timestamp), self.id)
    }
}

impl FromStr for Identifier {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| SinkError::Format(format!("invalid identifier '{s}'")))
    }
}

fn to_base36(value: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let negative = value < 0;
    let mut rest = value.unsigned_abs();
    let mut out = Vec::with_capacity(14);
    while rest > 0 {
        out.push(DIGITS[(rest % 36) as usize]);
        rest /= 36;
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ═══════════════════════════════════════════════════════════════
//  IdentifierCodec
// ═══════════════════════════════════════════════════════════════

/// Сериализация ключа сообщения.
///
/// `Plain`: UTF-8 байты id. `SchemaRegistryFramed`: Avro datum записи
/// `{version, timestamp, id}` без заголовка registry: ключи не читаются
/// registry-aware консьюмерами.
///
/// Каждый вызов аллоцирует свой буфер, поэтому кодек разделяется между
/// воркерами без блокировок.
#[derive(Debug, Clone)]
pub struct IdentifierCodec {
    mode: SinkMode,
    schema: Schema,
}

impl IdentifierCodec {
    pub fn new(mode: SinkMode) -> Result<Self, SinkError> {
        let schema = Schema::parse_str(IDENTIFIER_SCHEMA)?;
        Ok(Self { mode, schema })
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    /// Avro-схема ключа в режиме `SchemaRegistryFramed`.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn encode(&self, identifier: &Identifier) -> Result<Vec<u8>, SinkError> {
        match self.mode {
            SinkMode::Plain => Ok(identifier.id.as_bytes().to_vec()),
            SinkMode::SchemaRegistryFramed => {
                debug_assert_eq!(
                    identifier.version, IDENTIFIER_VERSION,
                    "identifier version does not match the key schema"
                );
                let record = Value::Record(vec![
                    ("version".into(), Value::String(identifier.version.to_string())),
                    ("timestamp".into(), Value::Long(identifier.timestamp)),
                    ("id".into(), Value::String(identifier.id.clone())),
                ]);
                Ok(apache_avro::to_avro_datum(&self.schema, record)?)
            }
        }
    }
}
