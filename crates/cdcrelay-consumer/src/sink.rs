//! Built-in record handlers.

use async_trait::async_trait;

use cdcrelay_core::error::RecordError;
use cdcrelay_core::handler::RecordHandler;
use cdcrelay_core::record::ChangeRecord;

/// Logs each record's operation and image at debug level and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl RecordHandler for LoggingSink {
    async fn process(&self, record: &ChangeRecord) -> Result<(), RecordError> {
        tracing::debug!(operation = %record.operation, event_id = %record.event_id, "change record");
        tracing::debug!(pk = %record.image.pk, image = ?record.image.fields, "image");
        Ok(())
    }

    fn name(&self) -> &str {
        "logging-sink"
    }
}
