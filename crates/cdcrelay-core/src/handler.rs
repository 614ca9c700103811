//! Per-record handler trait for the consumer stage.

use async_trait::async_trait;

use crate::error::RecordError;
use crate::record::ChangeRecord;

/// A sink invoked once per decoded change record.
///
/// Returning an error marks only that record as failed; the queue will
/// redeliver it. Handlers must tolerate seeing the same record more than once.
#[async_trait]
pub trait RecordHandler: Send + Sync + 'static {
    async fn process(&self, record: &ChangeRecord) -> Result<(), RecordError>;

    /// Handler name, for logs.
    fn name(&self) -> &str {
        "handler"
    }
}
