//! Bounded in-memory log of provider attempts.

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use herald_common::{CampaignId, MessageId};
use herald_provider::{AttemptOutcome, ProviderAttempt};
use parking_lot::Mutex;

/// One provider call made for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub message_id: MessageId,
    pub campaign_id: CampaignId,
    pub provider: String,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

impl AttemptRecord {
    fn from_attempt(
        campaign_id: CampaignId,
        message_id: MessageId,
        attempt: ProviderAttempt,
    ) -> Self {
        Self {
            message_id,
            campaign_id,
            provider: attempt.provider,
            outcome: attempt.outcome,
            latency: attempt.latency,
            at: attempt.at,
        }
    }
}

/// Ring buffer keeping the most recent `capacity` attempts; older entries
/// are evicted first.
#[derive(Debug)]
pub struct AttemptLog {
    capacity: usize,
    records: Mutex<VecDeque<AttemptRecord>>,
}

impl AttemptLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn record(
        &self,
        campaign_id: CampaignId,
        message_id: MessageId,
        attempts: impl IntoIterator<Item = ProviderAttempt>,
    ) {
        if self.capacity == 0 {
            return;
        }

        let mut records = self.records.lock();
        for attempt in attempts {
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(AttemptRecord::from_attempt(campaign_id, message_id, attempt));
        }
    }

    /// Most recent attempts, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AttemptRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use herald_provider::ErrorKind;

    use super::*;

    fn attempt(provider: &str, outcome: AttemptOutcome) -> ProviderAttempt {
        ProviderAttempt {
            provider: provider.to_string(),
            outcome,
            latency: Duration::from_millis(12),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let log = AttemptLog::new(2);
        let campaign = CampaignId::generate();
        let message = MessageId::generate();

        log.record(
            campaign,
            message,
            [
                attempt("a", AttemptOutcome::Retryable(ErrorKind::Transport)),
                attempt("b", AttemptOutcome::Success),
            ],
        );
        log.record(campaign, message, [attempt("c", AttemptOutcome::Success)]);

        let recent = log.recent(10);
        assert_eq!(log.len(), 2);
        assert_eq!(recent[0].provider, "c");
        assert_eq!(recent[1].provider, "b");
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let log = AttemptLog::new(0);
        log.record(
            CampaignId::generate(),
            MessageId::generate(),
            [attempt("a", AttemptOutcome::Success)],
        );
        assert!(log.is_empty());
    }
}
