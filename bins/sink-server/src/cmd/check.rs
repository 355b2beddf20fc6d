use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use kafka_sink::{ConfiguredSchemas, SchemaLookup, SinkError, SinkMode};

/// Проверить конфиг: схемы читаются, у framed sink'ов есть откуда взять
/// schema id. К брокеру и registry не подключается.
pub fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    check(&config)?;
    tracing::info!(config = %args.config, sinks = config.sinks.len(), "config ok");
    Ok(())
}

fn check(config: &ServerConfig) -> Result<(), ServerError> {
    config.validate()?;
    let schemas = ConfiguredSchemas::load(&config.schemas)?;

    for sink in &config.sinks {
        let found = schemas.lookup(&sink.name)?;
        if sink.mode == SinkMode::SchemaRegistryFramed
            && found.schema_id.is_none()
            && config.kafka.schema_registry_url.is_none()
        {
            return Err(SinkError::MissingSchemaId(sink.name.clone()).into());
        }
        tracing::info!(
            sink = %sink.name,
            topic = %sink.topic,
            mode = %sink.mode,
            schema_id = ?found.schema_id.map(|id| id.get()),
            "sink ok"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_schema(mode: &str, schema_id: Option<u32>, registry: bool) -> (ServerConfig, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("sink-check-{mode}-{schema_id:?}-{registry}-{}.avsc", std::process::id()));
        std::fs::write(&path, r#"{"type":"record","name":"E","fields":[{"name":"n","type":"long"}]}"#).unwrap();

        let mut text = String::from("[kafka]\nbrokers = [\"b:9092\"]\n");
        if registry {
            text.push_str("schema_registry_url = \"http://registry:8081\"\n");
        }
        text.push_str(&format!("\n[[sinks]]\nname = \"s\"\nmode = \"{mode}\"\n"));
        text.push_str(&format!("\n[[schemas]]\nsink = \"s\"\nschema_path = {:?}\n", path.to_string_lossy()));
        if let Some(id) = schema_id {
            text.push_str(&format!("schema_id = {id}\n"));
        }
        (ServerConfig::parse(&text).unwrap(), path)
    }

    #[test]
    fn framed_sink_needs_an_id_source() {
        for (schema_id, registry, ok) in [(None, false, false), (Some(42), false, true), (None, true, true)] {
            let (config, path) = config_with_schema("schema_registry_framed", schema_id, registry);
            let result = check(&config);
            std::fs::remove_file(&path).ok();
            assert_eq!(result.is_ok(), ok, "schema_id={schema_id:?} registry={registry}");
        }
    }

    #[test]
    fn plain_sink_needs_only_a_schema() {
        let (config, path) = config_with_schema("plain", None, false);
        let result = check(&config);
        std::fs::remove_file(&path).ok();
        result.unwrap();
    }
}
