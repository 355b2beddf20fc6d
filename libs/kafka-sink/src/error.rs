use processing_pool::PoolError;

/// Category of a sink error. Lets the flushing pool tell construction
/// failures (fatal, before start) from per-message ones (report and go on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or schema: permanent, fail at startup.
    Config,
    /// Broker or registry I/O: transient for a single message.
    Io,
    /// Record does not match the writer schema: skip the record.
    Format,
    /// Lifecycle misuse (send after close, start twice).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("config: {0}")]
    Config(String),

    #[error("no schema configured for sink '{0}'")]
    SchemaNotFound(String),

    #[error("sink '{0}': schema_registry_framed mode requires a schema_id or kafka.schema_registry_url")]
    MissingSchemaId(String),

    #[error("avro: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("record format: {0}")]
    Format(String),

    #[error("schema registry: {0}")]
    Registry(String),

    #[error("schema registry http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker: {0}")]
    Broker(String),

    #[error("broker client closed")]
    ClientClosed,

    #[error("pool: {0}")]
    Pool(#[from] PoolError),

    #[error("flushing pool [{name}] is {state}")]
    Lifecycle { name: String, state: &'static str },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Config(_)
            | SinkError::SchemaNotFound(_)
            | SinkError::MissingSchemaId(_)
            | SinkError::Avro(_) => ErrorKind::Config,
            SinkError::Format(_) => ErrorKind::Format,
            SinkError::Registry(_)
            | SinkError::Http(_)
            | SinkError::Broker(_)
            | SinkError::Io(_) => ErrorKind::Io,
            SinkError::ClientClosed | SinkError::Pool(_) | SinkError::Lifecycle { .. } => ErrorKind::Logic,
        }
    }
}
