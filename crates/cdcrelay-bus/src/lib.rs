//! cdcrelay-bus: [`FanoutBus`](cdcrelay_core::FanoutBus) implementations.
//!
//! Backends:
//! - [`memory`]: in-process bus (tests, local runs)
//! - [`http`]: JSON-over-HTTP publish client with retry and a process-wide shared instance

pub mod http;
pub mod memory;

pub use http::{HttpBusConfig, HttpFanoutBus};
pub use memory::{MemoryBus, PublishedMessage};
