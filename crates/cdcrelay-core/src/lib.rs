//! cdcrelay-core: shared building blocks for the CDC relay pipeline.
//!
//! # Architecture
//!
//! ```text
//! change stream ──▶ RelayPublisher ──▶ FanoutBus ──▶ queue ──▶ ConsumerDispatcher ──▶ RecordHandler
//!                        │                                          │
//!                        └────────── BatchRunner + BatchTracker ────┘
//!                                   (one pair per invocation)
//! ```
//!
//! This crate holds everything both stages share:
//!
//! - [`envelope`]: the nested envelope codec
//! - [`batch`]: invocation payload shapes
//! - [`tracker`]: per-batch outcomes and the partial-failure report
//! - [`runner`]: bounded concurrent batch execution with deadline handling
//! - [`bus`] / [`handler`]: the collaborator seams
//! - [`config`]: environment configuration

pub mod attribute;
pub mod batch;
pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod record;
pub mod retry;
pub mod runner;
pub mod tracker;

pub use batch::{QueueBatch, QueueMessage, StreamBatch};
pub use bus::{FanoutBus, PublishRequest, PublishResponse};
pub use config::{CommonConfig, ConsumerConfig, RelayConfig};
pub use envelope::{
    decode_change_record, decode_outer, encode_fanout, encode_notification, unwrap_queue_body,
    FanoutEnvelope, MessageAttribute, OPERATION_ATTRIBUTE,
};
pub use error::{ConfigError, DecodeError, Layer, RecordError, TransportError};
pub use handler::RecordHandler;
pub use record::{ChangeRecord, Image, OperationKind, StreamRecord, PRIMARY_KEY};
pub use retry::{RetryConfig, RetryPolicy};
pub use runner::{BatchItem, BatchRunner, InvocationContext, RunnerConfig};
pub use tracker::{BatchItemFailure, BatchTracker, Outcome, PartialFailureReport};
