#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("{0}")]
    Sink(#[from] kafka_sink::SinkError),

    #[error("input: {0}")]
    Input(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
