//! cdcrelay-consumer: the second hop of the pipeline.
//!
//! Each queue message carries a bus notification whose `Message` field is the
//! original change event. The dispatcher unwraps both layers, validates the
//! new image, and calls a pluggable [`RecordHandler`](cdcrelay_core::RecordHandler).

pub mod dispatcher;
pub mod sink;

pub use dispatcher::{dispatch_message, ConsumerDispatcher};
pub use sink::LoggingSink;
