//! # cdcrelay-observability
//!
//! Structured logging for the relay and consumer processes, written to stderr.
//! Text or JSON output (JSON is what log aggregators such as CloudWatch,
//! Loki or ELK expect), with a global level from `LOG_LEVEL` and optional
//! per-crate overrides.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, init_tracing_to, LogConfig};
