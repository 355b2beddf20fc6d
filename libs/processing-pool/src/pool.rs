use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PoolError, Rejected};
use crate::router::Router;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ═══════════════════════════════════════════════════════════════
//  Overflow Policy
// ═══════════════════════════════════════════════════════════════

/// Стратегия поведения при переполнении очереди воркера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): если очередь полна, вернуть элемент вызывающему.
    Drop,
    /// .send().await: ждать пока появится место (back-pressure).
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

/// Размер пула и ёмкость очередей.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Число воркеров (у каждого своя очередь).
    pub workers: usize,
    /// Ёмкость bounded очереди одного воркера.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Processor
// ═══════════════════════════════════════════════════════════════

/// Обработчик одного воркера. Каждый воркер владеет своим экземпляром,
/// поэтому `&mut self` не требует синхронизации.
pub trait Processor<T>: Send + 'static {
    fn process(&mut self, item: T) -> BoxFuture<'_, ()>;

    /// Вызывается один раз, после того как очередь воркера выбрана до конца.
    fn finish(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

// ═══════════════════════════════════════════════════════════════
//  ProcessingPool
// ═══════════════════════════════════════════════════════════════

/// Пул из фиксированного числа воркеров, у каждого своя bounded очередь.
///
/// Элемент попадает в очередь, выбранную `Router`'ом, так что порядок
/// элементов с одним ключом сохраняется. `stop()` закрывает очереди,
/// дожидается пока каждый воркер выберет свою очередь до конца, и
/// джойнит все задачи.
pub struct ProcessingPool<T> {
    name: String,
    router: Arc<dyn Router<T>>,
    overflow: OverflowPolicy,
    senders: Vec<mpsc::Sender<T>>,
    handles: Vec<JoinHandle<u64>>,
}

impl<T: Send + 'static> ProcessingPool<T> {
    /// Запустить воркеры. `factory(index)` создаёт processor для воркера `index`.
    ///
    /// Требует tokio runtime.
    pub fn start<P, F>(
        name: impl Into<String>,
        config: &PoolConfig,
        router: Arc<dyn Router<T>>,
        mut factory: F,
    ) -> Result<Self, PoolError>
    where
        P: Processor<T>,
        F: FnMut(usize) -> P,
    {
        config.validate()?;
        let name = name.into();

        let mut senders = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            let processor = factory(index);
            handles.push(tokio::spawn(run_worker(name.clone(), index, rx, processor)));
            senders.push(tx);
        }

        tracing::info!(
            pool = %name,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "pool started"
        );

        Ok(Self {
            name,
            router,
            overflow: config.overflow,
            senders,
            handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    pub fn is_running(&self) -> bool {
        !self.senders.is_empty()
    }

    /// Индекс воркера, в чью очередь попадёт элемент.
    pub fn worker_for(&self, item: &T) -> Option<usize> {
        let workers = self.senders.len();
        if workers == 0 {
            return None;
        }
        Some(self.router.route(item, workers) % workers)
    }

    /// Поставить элемент в очередь воркера.
    ///
    /// `BackPressure` ждёт свободного места, `Drop` сразу возвращает
    /// элемент с `PoolError::QueueFull`.
    pub async fn enqueue(&self, item: T) -> Result<(), Rejected<T>> {
        let Some(worker) = self.worker_for(&item) else {
            return Err(Rejected { item, reason: PoolError::Stopped(self.name.clone()) });
        };
        let tx = &self.senders[worker];

        match self.overflow {
            OverflowPolicy::BackPressure => tx.send(item).await.map_err(|mpsc::error::SendError(item)| {
                Rejected { item, reason: PoolError::Stopped(self.name.clone()) }
            }),
            OverflowPolicy::Drop => match tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(item)) => Err(Rejected {
                    item,
                    reason: PoolError::QueueFull { pool: self.name.clone(), worker },
                }),
                Err(mpsc::error::TrySendError::Closed(item)) => Err(Rejected {
                    item,
                    reason: PoolError::Stopped(self.name.clone()),
                }),
            },
        }
    }

    /// Остановить пул: закрыть очереди → дождаться drain → join.
    ///
    /// Возвращает суммарное число обработанных элементов. Повторный
    /// вызов ничего не делает и возвращает 0.
    pub async fn stop(&mut self) -> u64 {
        if self.handles.is_empty() {
            self.senders.clear();
            return 0;
        }

        // Без sender'ов recv() отдаст остаток очереди, затем None.
        self.senders.clear();

        let mut total = 0;
        for (index, handle) in self.handles.drain(..).enumerate() {
            match handle.await {
                Ok(processed) => total += processed,
                Err(e) => tracing::error!(pool = %self.name, worker = index, error = ?e, "worker task failed"),
            }
        }
        tracing::info!(pool = %self.name, processed = total, "pool stopped");
        total
    }
}

async fn run_worker<T, P>(pool: String, index: usize, mut rx: mpsc::Receiver<T>, mut processor: P) -> u64
where
    T: Send + 'static,
    P: Processor<T>,
{
    let mut processed = 0u64;
    while let Some(item) = rx.recv().await {
        processor.process(item).await;
        processed += 1;
    }
    processor.finish().await;
    tracing::debug!(%pool, worker = index, processed, "worker drained");
    processed
}
