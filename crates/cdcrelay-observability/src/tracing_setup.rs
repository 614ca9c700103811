//! Tracing / logging initialisation helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cdcrelay_core::config::CommonConfig;

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
    /// Service name attached to every event.
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_service() -> String {
    "cdcrelay".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
            service: default_service(),
        }
    }
}

impl LogConfig {
    /// Log settings for a service from its environment configuration.
    pub fn for_service(service: impl Into<String>, common: &CommonConfig) -> Self {
        Self {
            level: common.log_level.to_ascii_lowercase(),
            json: common.log_json,
            service: service.into(),
            ..Default::default()
        }
    }

    /// Filter directives, e.g. `"info,cdcrelay_core=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.to_ascii_lowercase();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Initialise tracing with the given log config.
/// Should be called once at process startup; later calls return an error.
///
/// Logs go to stderr; stdout is reserved for invocation results. Colours are
/// only used when stderr is a terminal.
pub fn init_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    init_tracing_to(config, std::io::stderr, std::io::stderr().is_terminal())
}

/// Like [`init_tracing`], writing to `writer` instead of stderr.
pub fn init_tracing_to<W>(config: &LogConfig, writer: W, ansi: bool) -> Result<(), TryInitError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_writer(writer))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_ansi(ansi).with_writer(writer))
            .try_init()?;
    }

    tracing::info!(service = %config.service, level = %config.level, "logging initialised");
    Ok(())
}
