//! `RelayPublisher`: turns each change-stream record into a fan-out envelope
//! and publishes it, reporting per-record failures.

use std::sync::Arc;

use cdcrelay_core::batch::StreamBatch;
use cdcrelay_core::bus::FanoutBus;
use cdcrelay_core::config::RelayConfig;
use cdcrelay_core::envelope::encode_fanout;
use cdcrelay_core::error::{DecodeError, RecordError};
use cdcrelay_core::record::StreamRecord;
use cdcrelay_core::runner::{BatchItem, BatchRunner, InvocationContext, RunnerConfig};
use cdcrelay_core::tracker::PartialFailureReport;

pub struct RelayPublisher {
    bus: Arc<dyn FanoutBus>,
    topic: Arc<str>,
    runner: BatchRunner,
}

impl RelayPublisher {
    pub fn new(bus: Arc<dyn FanoutBus>, topic: impl Into<String>, runner: RunnerConfig) -> Self {
        let topic: String = topic.into();
        Self {
            bus,
            topic: topic.into(),
            runner: BatchRunner::new(runner),
        }
    }

    pub fn from_config(bus: Arc<dyn FanoutBus>, config: &RelayConfig) -> Self {
        Self::new(bus, config.topic_arn.clone(), config.common.runner.clone())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish every record of `batch`; only failed records are reported.
    pub async fn handle_batch(&self, batch: StreamBatch, ctx: &InvocationContext) -> PartialFailureReport {
        let items: Vec<BatchItem<Result<StreamRecord, DecodeError>>> = batch
            .records
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let parsed = StreamRecord::from_json(raw.get());
                let identifier = parsed
                    .as_ref()
                    .ok()
                    .and_then(|r| r.identifier().map(str::to_string))
                    .unwrap_or_else(|| index.to_string());
                BatchItem::new(identifier, parsed)
            })
            .collect();

        tracing::debug!(
            request_id = %ctx.request_id,
            records = items.len(),
            topic = %self.topic,
            bus = %self.bus.endpoint(),
            "relaying stream batch"
        );

        let bus = self.bus.clone();
        let topic = self.topic.clone();
        self.runner
            .run(items, ctx, move |parsed| {
                let bus = bus.clone();
                let topic = topic.clone();
                async move {
                    match parsed {
                        Ok(record) => relay_record(bus.as_ref(), &topic, &record).await,
                        Err(e) => Err(RecordError::from(e)),
                    }
                }
            })
            .await
    }
}

/// Build and publish the envelope for one stream record.
///
/// A record that cannot be encoded is never published.
pub async fn relay_record(bus: &dyn FanoutBus, topic: &str, record: &StreamRecord) -> Result<(), RecordError> {
    let envelope = encode_fanout(record)?;
    let message_id = bus.publish(topic, &envelope).await?;
    tracing::debug!(subject = %envelope.subject, message_id = %message_id, "published");
    Ok(())
}
