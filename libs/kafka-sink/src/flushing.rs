use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use processing_pool::{BoxFuture, HashRouter, PoolConfig, ProcessingPool, Processor, Rejected, Router};

use tokio::task::{JoinError, JoinSet};

use crate::broker::{Delivery, ProducerRecord};
use crate::config::KafkaSinkConfig;
use crate::error::SinkError;
use crate::event::Event;
use crate::factory::{SinkBinding, SinkFactory};

// ═══════════════════════════════════════════════════════════════
//  Failure reporting
// ═══════════════════════════════════════════════════════════════

/// Событие, которое не удалось закодировать или отправить.
#[derive(Debug)]
pub struct SendFailure {
    pub sink: String,
    pub topic: String,
    pub key: String,
    pub error: SinkError,
}

/// Куда уходят ошибки отправки. Воркер после отчёта продолжает работу.
pub trait FailureReporter: Send + Sync {
    fn report(&self, failure: SendFailure);
}

/// Пишет ошибку в лог и считает их.
#[derive(Debug, Default)]
pub struct TracingFailureReporter {
    failed: AtomicU64,
}

impl TracingFailureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl FailureReporter for TracingFailureReporter {
    fn report(&self, failure: SendFailure) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            sink = %failure.sink,
            topic = %failure.topic,
            key = %failure.key,
            kind = %failure.error.kind(),
            error = %failure.error,
            "event not delivered"
        );
    }
}

// ═══════════════════════════════════════════════════════════════
//  FlushWorker
// ═══════════════════════════════════════════════════════════════

/// Воркер пула: кодирует событие и передаёт его клиенту брокера.
///
/// Приём записей клиентом идёт строго по очереди, так что порядок
/// событий одного идентификатора сохраняется до брокера. Подтверждения
/// доставки ждутся в фоне и не задерживают следующее событие.
struct FlushWorker {
    index: usize,
    binding: SinkBinding,
    reporter: Arc<dyn FailureReporter>,
    inflight: JoinSet<bool>,
    sent: u64,
    failed: u64,
}

impl FlushWorker {
    async fn flush(&self, event: &Event) -> Result<Delivery, SinkError> {
        let key = self.binding.key_codec.encode(&event.key)?;
        let value = self.binding.value_codec.encode(&self.binding.topic, &event.record)?;
        self.binding
            .client
            .send(ProducerRecord { topic: self.binding.topic.clone(), key, value })
            .await
    }

    fn failure(&self, event_key: String, error: SinkError) -> SendFailure {
        SendFailure {
            sink: self.binding.name.clone(),
            topic: self.binding.topic.clone(),
            key: event_key,
            error,
        }
    }

    fn tally(&mut self, done: Result<bool, JoinError>) {
        match done {
            Ok(true) => self.sent += 1,
            Ok(false) => self.failed += 1,
            Err(e) => {
                self.failed += 1;
                tracing::error!(sink = %self.binding.name, worker = self.index, error = %e, "delivery task failed");
            }
        }
    }

    /// Забрать уже завершённые доставки.
    fn reap(&mut self) {
        while let Some(done) = self.inflight.try_join_next() {
            self.tally(done);
        }
    }
}

impl Processor<Event> for FlushWorker {
    fn process(&mut self, event: Event) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.flush(&event).await {
                Ok(delivery) => {
                    let reporter = self.reporter.clone();
                    let (sink, topic) = (self.binding.name.clone(), self.binding.topic.clone());
                    let key = event.key.to_string();
                    self.inflight.spawn(async move {
                        match delivery.await {
                            Ok(()) => true,
                            Err(error) => {
                                reporter.report(SendFailure { sink, topic, key, error });
                                false
                            }
                        }
                    });
                }
                Err(error) => {
                    self.failed += 1;
                    self.reporter.report(self.failure(event.key.to_string(), error));
                }
            }
            self.reap();
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            while let Some(done) = self.inflight.join_next().await {
                self.tally(done);
            }
            tracing::debug!(
                sink = %self.binding.name,
                worker = self.index,
                sent = self.sent,
                failed = self.failed,
                "flush worker done"
            );
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaFlushingPool
// ═══════════════════════════════════════════════════════════════

/// Состояние flush-пула. Переходы только вперёд.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl FlushState {
    fn as_str(self) -> &'static str {
        match self {
            FlushState::Created => "created",
            FlushState::Running => "running",
            FlushState::Stopping => "stopping",
            FlushState::Stopped => "stopped",
        }
    }
}

/// Flush-пул одного sink'а. Владеет `SinkBinding` и через него
/// клиентом брокера.
///
/// `stop()` в два этапа: сначала все воркеры выбирают свои очереди,
/// дожидаются подтверждений доставки и джойнятся, затем клиент
/// закрывается, ровно один раз.
pub struct KafkaFlushingPool {
    name: String,
    pool_config: PoolConfig,
    binding: Option<SinkBinding>,
    pool: Option<ProcessingPool<Event>>,
    reporter: Arc<dyn FailureReporter>,
    router: Arc<dyn Router<Event>>,
    state: FlushState,
}

impl KafkaFlushingPool {
    pub fn new(pool_config: PoolConfig, binding: SinkBinding) -> Self {
        Self {
            name: binding.name.clone(),
            pool_config,
            binding: Some(binding),
            pool: None,
            reporter: Arc::new(TracingFailureReporter::new()),
            router: Arc::new(HashRouter),
            state: FlushState::Created,
        }
    }

    /// Собрать binding через фабрику и обернуть его в пул.
    /// Размер пула берётся из `kafka` конфига фабрики.
    pub async fn create(
        factory: &SinkFactory<'_>,
        sink: &KafkaSinkConfig,
    ) -> Result<Self, SinkError> {
        let pool_config = factory.kafka().pool_config();
        pool_config.validate()?;
        let client = factory.connect().await?;
        let binding = factory.build(sink, client).await?;
        Ok(Self::new(pool_config, binding))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router<Event>>) -> Self {
        self.router = router;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub fn binding(&self) -> Option<&SinkBinding> {
        self.binding.as_ref()
    }

    /// Created → Running: запустить воркеры.
    pub fn start(&mut self) -> Result<(), SinkError> {
        if self.state != FlushState::Created {
            return Err(self.lifecycle_error());
        }
        let Some(binding) = &self.binding else {
            return Err(self.lifecycle_error());
        };

        let pool = ProcessingPool::start(
            format!("kafka-flush-{}", self.name),
            &self.pool_config,
            self.router.clone(),
            |index| FlushWorker {
                index,
                binding: binding.clone(),
                reporter: self.reporter.clone(),
                inflight: JoinSet::new(),
                sent: 0,
                failed: 0,
            },
        )?;

        tracing::info!(sink = %self.name, topic = %binding.topic, workers = pool.workers(), "flushing pool started");
        self.pool = Some(pool);
        self.state = FlushState::Running;
        Ok(())
    }

    /// Индекс воркера, который обработает событие.
    pub fn worker_for(&self, event: &Event) -> Option<usize> {
        self.pool.as_ref()?.worker_for(event)
    }

    /// Поставить событие в очередь.
    ///
    /// Отклонённое событие (пул не запущен, очередь полна при
    /// `overflow = "drop"`) отдаётся reporter'у и возвращается ошибкой.
    pub async fn enqueue(&self, event: Event) -> Result<(), SinkError> {
        let Some(pool) = self.pool.as_ref().filter(|_| self.state == FlushState::Running) else {
            let error = self.lifecycle_error();
            self.reject(&event, self.lifecycle_error());
            return Err(error);
        };

        match pool.enqueue(event).await {
            Ok(()) => Ok(()),
            Err(Rejected { item, reason }) => {
                let error = SinkError::Pool(reason.clone());
                self.reject(&item, SinkError::Pool(reason));
                Err(error)
            }
        }
    }

    /// Running → Stopping → Stopped.
    ///
    /// Возвращает число обработанных событий. Повторный вызов ничего не
    /// делает. Пул, который так и не запустили, только закрывает клиент.
    pub async fn stop(&mut self) -> Result<u64, SinkError> {
        if matches!(self.state, FlushState::Stopping | FlushState::Stopped) {
            return Ok(0);
        }
        self.state = FlushState::Stopping;

        // Phase 1: drain + join.
        let processed = match self.pool.take() {
            Some(mut pool) => pool.stop().await,
            None => 0,
        };

        // Phase 2: ни одного воркера уже нет, закрываем клиент.
        let closed = match self.binding.take() {
            Some(binding) => binding.client.close().await,
            None => Ok(()),
        };

        self.state = FlushState::Stopped;
        match &closed {
            Ok(()) => tracing::info!(sink = %self.name, processed, "flushing pool stopped"),
            Err(e) => tracing::error!(sink = %self.name, processed, error = %e, "broker client close failed"),
        }
        closed.map(|()| processed)
    }

    fn reject(&self, event: &Event, error: SinkError) {
        let topic = self.binding.as_ref().map(|b| b.topic.clone()).unwrap_or_default();
        self.reporter.report(SendFailure {
            sink: self.name.clone(),
            topic,
            key: event.key.to_string(),
            error,
        });
    }

    fn lifecycle_error(&self) -> SinkError {
        SinkError::Lifecycle { name: self.name.clone(), state: self.state.as_str() }
    }
}

impl Drop for KafkaFlushingPool {
    fn drop(&mut self) {
        if self.state == FlushState::Running {
            tracing::warn!(sink = %self.name, "flushing pool dropped without stop(), broker client not closed");
        }
    }
}
