//! cdcrelay-relay: the first hop of the pipeline.
//!
//! Reads change-stream batches, publishes one fan-out envelope per record and
//! returns a partial-failure report listing only the records that must be
//! redelivered.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cdcrelay_bus::MemoryBus;
//! use cdcrelay_core::{InvocationContext, RunnerConfig, StreamBatch};
//! use cdcrelay_relay::RelayPublisher;
//!
//! # async fn demo() {
//! let relay = RelayPublisher::new(Arc::new(MemoryBus::new()), "arn:topic", RunnerConfig::default());
//! let report = relay.handle_batch(StreamBatch::default(), &InvocationContext::new("req-1")).await;
//! assert!(report.is_empty());
//! # }
//! ```

pub mod publisher;

pub use publisher::{relay_record, RelayPublisher};
