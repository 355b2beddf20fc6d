use processing_pool::Routable;

use crate::identifier::Identifier;

/// Уже сериализованная в Avro запись события. Байты не меняются
/// после создания.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    payload: Vec<u8>,
}

impl EventRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Vec<u8>> for EventRecord {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

/// Единица работы flush-воркера: ключ (идентификатор) + запись.
#[derive(Debug, Clone)]
pub struct Event {
    pub key: Identifier,
    pub record: EventRecord,
}

impl Event {
    pub fn new(key: Identifier, record: impl Into<EventRecord>) -> Self {
        Self { key, record: record.into() }
    }
}

/// Роутинг по id: события одного идентификатора обрабатывает один воркер.
impl Routable for Event {
    type Key = str;

    fn routing_key(&self) -> &str {
        self.key.id()
    }
}
