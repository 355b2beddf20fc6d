#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("pool config: {0}")]
    Config(String),

    #[error("pool [{pool}]: worker {worker} queue full")]
    QueueFull { pool: String, worker: usize },

    #[error("pool [{0}] stopped")]
    Stopped(String),
}

/// Элемент, не принятый пулом, вместе с причиной отказа.
///
/// Возвращается вызывающему, чтобы он мог залогировать или
/// переотправить элемент: пул ничего не теряет молча.
#[derive(Debug)]
pub struct Rejected<T> {
    pub item: T,
    pub reason: PoolError,
}
