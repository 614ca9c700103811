//! `ConsumerDispatcher`: unwraps queue messages down to change records and
//! hands each to the configured [`RecordHandler`].

use std::sync::Arc;

use cdcrelay_core::batch::QueueBatch;
use cdcrelay_core::config::ConsumerConfig;
use cdcrelay_core::envelope::{decode_change_record, decode_outer};
use cdcrelay_core::error::RecordError;
use cdcrelay_core::handler::RecordHandler;
use cdcrelay_core::runner::{BatchItem, BatchRunner, InvocationContext, RunnerConfig};
use cdcrelay_core::tracker::PartialFailureReport;

pub struct ConsumerDispatcher {
    handler: Arc<dyn RecordHandler>,
    runner: BatchRunner,
}

impl ConsumerDispatcher {
    pub fn new(handler: Arc<dyn RecordHandler>, runner: RunnerConfig) -> Self {
        Self {
            handler,
            runner: BatchRunner::new(runner),
        }
    }

    pub fn from_config(handler: Arc<dyn RecordHandler>, config: &ConsumerConfig) -> Self {
        Self::new(handler, config.common.runner.clone())
    }

    /// Decode and handle every message of `batch`. Failed messages are
    /// reported by `messageId`; all others are acknowledged.
    pub async fn handle_batch(&self, batch: QueueBatch, ctx: &InvocationContext) -> PartialFailureReport {
        let items: Vec<BatchItem<String>> = batch
            .records
            .into_iter()
            .map(|m| BatchItem::new(m.message_id, m.body))
            .collect();

        tracing::debug!(
            request_id = %ctx.request_id,
            messages = items.len(),
            handler = self.handler.name(),
            "dispatching queue batch"
        );

        let handler = self.handler.clone();
        self.runner
            .run(items, ctx, move |body| {
                let handler = handler.clone();
                async move { dispatch_message(handler.as_ref(), &body).await }
            })
            .await
    }
}

/// Unwrap one queue body and invoke the handler. The handler is not called
/// when either layer fails to decode.
pub async fn dispatch_message(handler: &dyn RecordHandler, body: &str) -> Result<(), RecordError> {
    let envelope = decode_outer(body)?;
    let record = decode_change_record(&envelope.body)?;
    tracing::debug!(subject = %envelope.subject, pk = %record.pk(), "decoded record");
    handler.process(&record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cdcrelay_core::batch::QueueMessage;
    use cdcrelay_core::record::ChangeRecord;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every processed PK; fails for PKs in `fail_on`.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        fail_on: Vec<String>,
    }

    #[async_trait]
    impl RecordHandler for RecordingSink {
        async fn process(&self, record: &ChangeRecord) -> Result<(), RecordError> {
            self.seen.lock().unwrap().push(record.pk().to_string());
            if self.fail_on.iter().any(|pk| pk == record.pk()) {
                return Err(RecordError::handler(format!("index rejected {}", record.pk())));
            }
            Ok(())
        }
    }

    fn body_for(event_id: &str, pk: &str) -> String {
        let inner = json!({
            "eventID": event_id,
            "eventName": "INSERT",
            "dynamodb": {"NewImage": {"PK": {"S": pk}, "name": {"S": "Ann"}}}
        });
        json!({
            "Type": "Notification",
            "MessageId": format!("sns-{event_id}"),
            "Subject": format!("INSERT-{event_id}"),
            "Message": inner.to_string(),
            "MessageAttributes": {"Operation": {"Type": "String", "Value": "INSERT"}}
        })
        .to_string()
    }

    fn batch(n: usize) -> QueueBatch {
        QueueBatch {
            records: (1..=n)
                .map(|i| QueueMessage::new(format!("m{i}"), body_for(&format!("e{i}"), &format!("item#{i}"))))
                .collect(),
        }
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new("test-invocation")
    }

    #[tokio::test]
    async fn every_message_handled() {
        let sink = Arc::new(RecordingSink::default());
        let report = ConsumerDispatcher::new(sink.clone(), RunnerConfig::default())
            .handle_batch(batch(4), &ctx())
            .await;

        assert!(report.is_empty());
        let mut seen = sink.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["item#1", "item#2", "item#3", "item#4"]);
    }

    #[tokio::test]
    async fn handler_failure_only_reports_that_message() {
        let sink = Arc::new(RecordingSink {
            fail_on: vec!["item#3".into()],
            ..Default::default()
        });
        let report = ConsumerDispatcher::new(sink.clone(), RunnerConfig::default())
            .handle_batch(batch(5), &ctx())
            .await;

        assert_eq!(report.failed_ids(), vec!["m3"]);
        assert_eq!(sink.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn malformed_outer_layer_skips_handler() {
        let sink = Arc::new(RecordingSink::default());
        let batch = QueueBatch {
            records: vec![QueueMessage::new("bad", "<<not json>>")],
        };
        let report = ConsumerDispatcher::new(sink.clone(), RunnerConfig::default())
            .handle_batch(batch, &ctx())
            .await;

        assert_eq!(report.failed_ids(), vec!["bad"]);
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_primary_key_is_isolated() {
        let sink = Arc::new(RecordingSink::default());
        let no_pk = json!({
            "eventID": "e9",
            "eventName": "MODIFY",
            "dynamodb": {"NewImage": {"name": {"S": "Ann"}}}
        });
        let mut b = batch(2);
        b.records.insert(
            1,
            QueueMessage::new("no-pk", json!({"Message": no_pk.to_string()}).to_string()),
        );

        let report = ConsumerDispatcher::new(sink.clone(), RunnerConfig::default())
            .handle_batch(b, &ctx())
            .await;

        assert_eq!(report.failed_ids(), vec!["no-pk"]);
        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sequential_mode_matches_concurrent() {
        let sink = Arc::new(RecordingSink {
            fail_on: vec!["item#2".into()],
            ..Default::default()
        });
        let concurrent = ConsumerDispatcher::new(sink.clone(), RunnerConfig::default())
            .handle_batch(batch(3), &ctx())
            .await;
        let sequential = ConsumerDispatcher::new(sink, RunnerConfig::sequential())
            .handle_batch(batch(3), &ctx())
            .await;
        assert_eq!(concurrent, sequential);
    }
}
