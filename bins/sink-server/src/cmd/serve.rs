use apache_avro::Schema;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::{KafkaSinkConfig, ServeArgs, ServerConfig};
use crate::error::ServerError;
use crate::input::InputLine;
use kafka_sink::{ConfiguredSchemas, Event, KafkaFlushingPool, SchemaLookup, SinkFactory};

/// Запущенный sink: flush-пул и writer-схема для входных записей.
struct SinkTarget {
    name: String,
    schema: Schema,
    pool: KafkaFlushingPool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PumpStats {
    lines: u64,
    enqueued: u64,
    rejected: u64,
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("sink-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    config.validate()?;
    tracing::info!(config = %args.config, sinks = config.sinks.len(), "loaded config");

    let schemas = ConfiguredSchemas::load(&config.schemas)?;
    let factory = SinkFactory::new(&config.kafka, &schemas);

    // --- Start sinks ---
    let mut targets = Vec::with_capacity(config.sinks.len());
    for sink_cfg in &config.sinks {
        match start_sink(&factory, &schemas, sink_cfg).await {
            Ok(target) => targets.push(target),
            Err(e) => {
                // Уже запущенные пулы закрывают свои клиенты.
                let _ = stop_all(&mut targets).await;
                return Err(e);
            }
        }
    }
    tracing::info!("server ready");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down...");
            signal_token.cancel();
        }
    });

    let pumped = pump(tokio::io::stdin(), &targets, &token).await;
    let stopped = stop_all(&mut targets).await;

    let stats = pumped?;
    tracing::info!(lines = stats.lines, enqueued = stats.enqueued, rejected = stats.rejected, "input done");
    stopped?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn start_sink(
    factory: &SinkFactory<'_>,
    schemas: &ConfiguredSchemas,
    sink_cfg: &KafkaSinkConfig,
) -> Result<SinkTarget, ServerError> {
    let schema = schemas.lookup(&sink_cfg.name)?.schema;
    let mut pool = KafkaFlushingPool::create(factory, sink_cfg).await?;
    pool.start()?;
    tracing::info!(sink = %sink_cfg.name, topic = %sink_cfg.topic, mode = %sink_cfg.mode, "spawned kafka sink");
    Ok(SinkTarget { name: sink_cfg.name.clone(), schema, pool })
}

/// Читать JSON строки и раскладывать события по sink'ам до EOF или отмены.
///
/// Плохая строка (не UTF-8, не JSON, не подходит к схеме) логируется и
/// считается в `rejected`. Ошибкой завершает только сбой чтения.
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    targets: &[SinkTarget],
    token: &CancellationToken,
) -> Result<PumpStats, ServerError> {
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut stats = PumpStats::default();

    loop {
        let segment = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            segment = segments.next_segment() => segment?,
        };
        let Some(mut raw) = segment else { break };
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                stats.lines += 1;
                stats.rejected += 1;
                tracing::warn!(line = stats.lines, error = %e, "input is not utf-8");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        if let Err(e) = dispatch(&line, targets, &mut stats).await {
            stats.rejected += 1;
            tracing::warn!(line = stats.lines, error = %e, "input rejected");
        }
    }
    Ok(stats)
}

/// Закодировать строку для всех адресатов, затем поставить в очереди.
/// Каждое принятое пулом событие учитывается в `enqueued`, даже если
/// следующий sink строку отклонил.
async fn dispatch(line: &str, targets: &[SinkTarget], stats: &mut PumpStats) -> Result<(), ServerError> {
    let input = InputLine::parse(line)?;
    let identifier = input.identifier()?;

    if let Some(name) = &input.sink {
        if !targets.iter().any(|t| &t.name == name) {
            return Err(ServerError::Input(format!("unknown sink '{name}'")));
        }
    }

    let mut events = Vec::with_capacity(targets.len());
    for target in targets {
        if input.sink.as_ref().is_some_and(|name| name != &target.name) {
            continue;
        }
        let record = input.encode_record(&target.schema)?;
        events.push((target, Event::new(identifier.clone(), record)));
    }

    let mut first_error = None;
    for (target, event) in events {
        match target.pool.enqueue(event).await {
            Ok(()) => stats.enqueued += 1,
            Err(e) => {
                first_error.get_or_insert(ServerError::from(e));
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Остановить все пулы. Возвращает первую ошибку, но останавливает все.
async fn stop_all(targets: &mut [SinkTarget]) -> Result<(), ServerError> {
    let mut first_error = None;
    for target in targets.iter_mut() {
        match target.pool.stop().await {
            Ok(processed) => tracing::info!(sink = %target.name, processed, "sink stopped"),
            Err(e) => {
                tracing::error!(sink = %target.name, error = %e, "sink stop error");
                first_error.get_or_insert(ServerError::from(e));
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
