//! Per-batch outcome tracking and the partial-failure report.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Outcome of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// One failed item, as the batch source expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
    /// Diagnostic only; not part of the wire response.
    #[serde(skip)]
    pub reason: String,
}

/// Response to a batch invocation listing only the failed items.
///
/// An empty list means every item succeeded. Items not listed are treated
/// as consumed by the batch source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialFailureReport {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl PartialFailureReport {
    pub fn is_empty(&self) -> bool {
        self.batch_item_failures.is_empty()
    }

    /// Identifiers of the failed items, in batch order.
    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.batch_item_failures
            .iter()
            .any(|f| f.item_identifier == identifier)
    }
}

struct Slot {
    identifier: String,
    outcome: Option<Outcome>,
}

/// Collects exactly one outcome per record of a batch.
///
/// Slots are addressed by the record's position so duplicate identifiers
/// inside one batch cannot collide. Safe to share between record tasks.
pub struct BatchTracker {
    slots: Mutex<Vec<Slot>>,
}

impl BatchTracker {
    pub fn new(identifiers: Vec<String>) -> Self {
        let slots = identifiers
            .into_iter()
            .map(|identifier| Slot {
                identifier,
                outcome: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_success(&self, index: usize) {
        self.record(index, Outcome::Success);
    }

    pub fn record_failure(&self, index: usize, reason: impl Into<String>) {
        self.record(index, Outcome::Failure(reason.into()));
    }

    /// Number of slots that already hold an outcome.
    pub fn recorded(&self) -> usize {
        self.lock().iter().filter(|s| s.outcome.is_some()).count()
    }

    /// Build the report. A slot still without an outcome is reported as
    /// failed so the source redelivers it.
    pub fn report(&self) -> PartialFailureReport {
        let slots = self.lock();
        let batch_item_failures = slots
            .iter()
            .filter_map(|slot| match &slot.outcome {
                Some(Outcome::Success) => None,
                Some(Outcome::Failure(reason)) => Some(BatchItemFailure {
                    item_identifier: slot.identifier.clone(),
                    reason: reason.clone(),
                }),
                None => {
                    tracing::warn!(id = %slot.identifier, "no outcome recorded, reporting as failed");
                    Some(BatchItemFailure {
                        item_identifier: slot.identifier.clone(),
                        reason: "outcome not recorded".into(),
                    })
                }
            })
            .collect();
        PartialFailureReport {
            batch_item_failures,
        }
    }

    fn record(&self, index: usize, outcome: Outcome) {
        let clash = {
            let mut slots = self.lock();
            let total = slots.len();
            let slot = slots
                .get_mut(index)
                .unwrap_or_else(|| panic!("record index {index} out of range for batch of {total}"));
            if slot.outcome.is_some() {
                Some(slot.identifier.clone())
            } else {
                slot.outcome = Some(outcome);
                None
            }
        };
        if let Some(identifier) = clash {
            panic!("outcome for record {index} ('{identifier}') recorded twice");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
