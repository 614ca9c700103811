//! Environment-driven configuration for the relay and consumer processes.
//!
//! Recognized variables:
//!
//! | Variable                | Used by  | Default                              |
//! |-------------------------|----------|--------------------------------------|
//! | `LOG_LEVEL`             | both     | `INFO`                               |
//! | `LOG_FORMAT`            | both     | `text` (`json` for structured logs)  |
//! | `AWS_REGION`            | both     | required                             |
//! | `PUBLISH_TOPIC_ARN`     | relay    | required                             |
//! | `BUS_ENDPOINT`          | relay    | required (`memory` = in-process)     |
//! | `MAX_CONCURRENCY`       | both     | batch length                         |
//! | `INVOCATION_TIMEOUT_MS` | both     | unbounded                            |
//! | `DEADLINE_MARGIN_MS`    | both     | `500`                                |

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::runner::RunnerConfig;

/// Settings shared by both stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    pub log_level: String,
    pub log_json: bool,
    pub region: String,
    pub runner: RunnerConfig,
    pub invocation_timeout_ms: Option<u64>,
}

/// Relay stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub common: CommonConfig,
    pub topic_arn: String,
    pub bus_endpoint: String,
}

/// Consumer stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub common: CommonConfig,
}

impl CommonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "INFO".into());
        let log_json = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => {
                return Err(ConfigError::InvalidVar {
                    name: "LOG_FORMAT".into(),
                    reason: format!("expected 'text' or 'json', got '{other}'"),
                })
            }
        };
        let region = required(&lookup, "AWS_REGION")?;

        let mut runner = RunnerConfig::default();
        if let Some(n) = parse_u64(&lookup, "MAX_CONCURRENCY")? {
            if n == 0 {
                return Err(ConfigError::InvalidVar {
                    name: "MAX_CONCURRENCY".into(),
                    reason: "must be at least 1".into(),
                });
            }
            runner.max_concurrency = Some(n as usize);
        }
        if let Some(ms) = parse_u64(&lookup, "DEADLINE_MARGIN_MS")? {
            runner.deadline_margin_ms = ms;
        }

        Ok(Self {
            log_level,
            log_json,
            region,
            runner,
            invocation_timeout_ms: parse_u64(&lookup, "INVOCATION_TIMEOUT_MS")?,
        })
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let common = CommonConfig::from_lookup(&lookup)?;
        let topic_arn = required(&lookup, "PUBLISH_TOPIC_ARN")?;
        let bus_endpoint = required(&lookup, "BUS_ENDPOINT")?;
        Ok(Self {
            common,
            topic_arn,
            bus_endpoint,
        })
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            common: CommonConfig::from_lookup(lookup)?,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar { name: name.into() })
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>, ConfigError> {
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidVar {
                name: name.into(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
