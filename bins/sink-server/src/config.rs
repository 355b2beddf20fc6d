use std::collections::HashSet;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

pub use kafka_sink::{KafkaConfig, KafkaSinkConfig, SchemaConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "sink-server", about = "Отправка событий в Kafka")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Читать события из stdin и отправлять в sink'и
    Serve(ServeArgs),
    /// Проверить конфиг и схемы без подключения к брокеру
    Check(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "SINK_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub sinks: Vec<KafkaSinkConfig>,
    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        self.kafka.validate()?;

        if self.sinks.is_empty() {
            return Err(ServerError::NoComponents("[[sinks]]"));
        }
        let mut names = HashSet::new();
        for sink in &self.sinks {
            sink.validate()?;
            if !names.insert(sink.name.as_str()) {
                return Err(ServerError::Config {
                    context: "sinks",
                    detail: format!("duplicate sink name '{}'", sink.name),
                });
            }
        }
        for schema in &self.schemas {
            if !names.contains(schema.sink.as_str()) {
                return Err(ServerError::Config {
                    context: "schemas",
                    detail: format!("schema for unknown sink '{}'", schema.sink),
                });
            }
        }
        Ok(())
    }
}
