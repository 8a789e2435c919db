//! Delivery status reconciliation.
//!
//! Provider events (webhook pushes and poll results) arrive correlated only
//! by the provider's message id. Each event is applied as a compare-and-swap
//! on the message status, and only forward moves along the success path are
//! accepted:
//!
//! | stored      | event       | result      | counters              |
//! |-------------|-------------|-------------|-----------------------|
//! | `sent`      | `delivered` | `delivered` | `delivered`           |
//! | `sent`      | `read`      | `read`      | `delivered`, `read`   |
//! | `delivered` | `read`      | `read`      | `read`                |
//! | `sent`      | `failed`    | `failed`    | `bounced`             |
//!
//! Everything else is a late or duplicate event and is ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_common::{Counter, MessageStatus, incoming, tracing};
use herald_provider::DeliveryReport;
use herald_store::{Store, StoreError};

/// What happened to a delivery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The message moved forward and its counters were updated
    Applied,
    /// Backward, duplicate or irrelevant event
    Ignored,
    /// No message carries this provider message id
    Unknown,
}

const fn counters_for(current: MessageStatus, next: MessageStatus) -> Option<&'static [Counter]> {
    match (current, next) {
        (MessageStatus::Sent, MessageStatus::Delivered) => Some(&[Counter::Delivered]),
        (MessageStatus::Sent, MessageStatus::Read) => Some(&[Counter::Delivered, Counter::Read]),
        (MessageStatus::Delivered, MessageStatus::Read) => Some(&[Counter::Read]),
        (MessageStatus::Sent, MessageStatus::Failed) => Some(&[Counter::Bounced]),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    /// Serialises status swap plus counter updates, so a `read` can never be
    /// counted before the `delivered` it follows
    gate: tokio::sync::Mutex<()>,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn apply_report(
        &self,
        report: &DeliveryReport,
    ) -> Result<ReconcileOutcome, StoreError> {
        self.apply(
            &report.provider_message_id,
            report.status,
            report.timestamp,
            report.error.as_deref(),
        )
        .await
    }

    pub async fn apply(
        &self,
        provider_message_id: &str,
        status: MessageStatus,
        timestamp: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let _gate = self.gate.lock().await;

        let Some(message_id) = self
            .store
            .find_by_provider_message_id(provider_message_id)
            .await?
        else {
            tracing::warn!(
                provider_message_id,
                status = %status,
                "Dropping delivery event for unknown message"
            );
            return Ok(ReconcileOutcome::Unknown);
        };

        loop {
            let mut message = self.store.message(message_id).await?;
            let current = message.status;

            let Some(counters) = counters_for(current, status) else {
                tracing::debug!(
                    message_id = %message_id,
                    current = %current,
                    event = %status,
                    "Ignoring delivery event that does not move the message forward"
                );
                return Ok(ReconcileOutcome::Ignored);
            };

            match status {
                MessageStatus::Delivered => message.delivered_at = Some(timestamp),
                MessageStatus::Read => {
                    message.delivered_at.get_or_insert(timestamp);
                    message.read_at = Some(timestamp);
                }
                MessageStatus::Failed => {
                    message.failed_at = Some(timestamp);
                    message.error = Some(error.unwrap_or("bounced").to_string());
                }
                _ => {}
            }
            message.status = status;

            let campaign_id = message.campaign_id;
            if !self.store.swap_message(current, message).await? {
                tracing::debug!(message_id = %message_id, "Message changed underneath, retrying");
                continue;
            }

            for counter in counters {
                self.store.increment(campaign_id, *counter).await?;
            }

            incoming!(
                level = DEBUG,
                "Message {message_id} moved {current} -> {status} ({provider_message_id})"
            );
            return Ok(ReconcileOutcome::Applied);
        }
    }
}
