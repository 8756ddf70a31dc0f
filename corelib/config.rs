//! Layered configuration: embedded defaults, overridden by an optional file,
//! overridden by `CORE__`-prefixed environment variables.
//!
//! Grounded on the teacher's `lib/config.rs::ConfigLoader`, which layers the
//! same three sources via the `config` crate.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::timeutil::parse_iso8601_duration;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Production,
    Development,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainConfig {
    pub mode: Mode,
    pub prometheus_address: Option<String>,
    pub prometheus_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub database_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler_tick_interval_s: u64,
    pub trigger_manager_tick_interval_s: u64,
    pub runtime_config_update_interval_s: u64,
    pub state_manager_shard_count: usize,
    pub default_submission_rate_per_sec: f64,
    #[serde(deserialize_with = "deserialize_duration_map")]
    pub stale_state_ttls: HashMap<String, Duration>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub default_stale_state_ttl: Duration,
    pub base_retry_delay_ms: u64,
    pub max_retry_exponent: u32,
    pub max_retry_attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_retry_delay: Duration,
    pub backfill_default_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub address: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub kind: RunnerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    LocalProcess,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub main: MainConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub runner: RunnerConfig,
}

impl SchedulerConfig {
    pub fn ttl_for_state(&self, state: &str) -> Duration {
        self.stale_state_ttls
            .get(state)
            .copied()
            .unwrap_or(self.default_stale_state_ttl)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where D: serde::Deserializer<'de> {
    let raw = String::deserialize(deserializer)?;
    parse_iso8601_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 duration: {raw}")))
}

fn deserialize_duration_map<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Duration>, D::Error>
where D: serde::Deserializer<'de> {
    let raw: HashMap<String, String> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            parse_iso8601_duration(&v)
                .map(|d| (k, d))
                .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 duration: {v}")))
        })
        .collect()
}

pub struct ConfigLoader {
    builder: ConfigBuilder,
}

impl ConfigLoader {
    /// Builds the embedded-defaults + env layer; call [`ConfigLoader::with_file`]
    /// to add an optional overrides file before [`ConfigLoader::load`].
    pub fn from_path(path: &Option<String>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            DEFAULT_CONFIG,
            FileFormat::Toml,
        ));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CORE").separator("__"),
        );

        Ok(Self { builder: builder.build()? })
    }

    pub fn load(self) -> Result<Config, ConfigError> {
        self.builder.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_embedded_defaults() {
        let config = ConfigLoader::from_path(&None).unwrap().load().unwrap();
        assert_eq!(config.main.mode, Mode::Development);
        assert!(config.scheduler.state_manager_shard_count > 0);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("CORE__API__PORT", "9999");
        let config = ConfigLoader::from_path(&None).unwrap().load().unwrap();
        assert_eq!(config.api.port, 9999);
        std::env::remove_var("CORE__API__PORT");
    }

    #[test]
    fn ttl_lookup_falls_back_to_default() {
        let config = ConfigLoader::from_path(&None).unwrap().load().unwrap();
        let fallback = config.scheduler.ttl_for_state("totally-unconfigured-state");
        assert_eq!(fallback, config.scheduler.default_stale_state_ttl);
    }
}
