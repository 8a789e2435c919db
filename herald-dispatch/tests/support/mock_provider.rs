//! Scripted channel provider for dispatch scenarios.
//!
//! Each call pops the next scripted [`Outcome`]; once the script is empty the
//! fallback outcome is used. Calls are recorded with the (virtual) time they
//! were made so pacing can be verified.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::Utc;
use herald_common::{Channel, MessageStatus};
use herald_provider::{
    ChannelProvider, DeliveryReport, ErrorKind, OutboundContent, ProviderError, Receipt,
    SendOptions,
};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail(ErrorKind),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub recipient: String,
    pub content: OutboundContent,
    pub at: Instant,
}

#[derive(Debug)]
pub struct MockProvider {
    name: &'static str,
    channel: Channel,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    polled: Mutex<AHashMap<String, MessageStatus>>,
    poll_count: AtomicUsize,
    final_status: Mutex<MessageStatus>,
}

impl MockProvider {
    pub fn new(name: &'static str, fallback: Outcome) -> Arc<Self> {
        Self::build(name, fallback, Duration::ZERO, Vec::new())
    }

    pub fn scripted(name: &'static str, script: Vec<Outcome>, fallback: Outcome) -> Arc<Self> {
        Self::build(name, fallback, Duration::ZERO, script)
    }

    /// Every call takes `latency` before answering.
    pub fn slow(name: &'static str, latency: Duration) -> Arc<Self> {
        Self::build(name, Outcome::Succeed, latency, Vec::new())
    }

    fn build(
        name: &'static str,
        fallback: Outcome,
        latency: Duration,
        script: Vec<Outcome>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            channel: Channel::Sms,
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            latency,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            polled: Mutex::new(AHashMap::new()),
            poll_count: AtomicUsize::new(0),
            final_status: Mutex::new(MessageStatus::Read),
        })
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock() = outcome;
    }

    /// Status returned when this provider is polled for `provider_message_id`.
    pub fn report(&self, provider_message_id: &str, status: MessageStatus) {
        self.polled
            .lock()
            .insert(provider_message_id.to_string(), status);
    }

    /// Make this provider behave like one without read receipts, etc.
    pub fn set_final_status(&self, status: MessageStatus) {
        *self.final_status.lock() = status;
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn validate_recipient(&self, address: &str) -> bool {
        !address.trim().is_empty()
    }

    async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        _options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        let sequence = {
            let mut calls = self.calls.lock();
            calls.push(Call {
                recipient: recipient.to_string(),
                content: content.clone(),
                at: Instant::now(),
            });
            calls.len()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock());

        match outcome {
            Outcome::Succeed => Ok(Receipt {
                provider: self.name.to_string(),
                provider_message_id: format!("{}-{sequence}", self.name),
            }),
            Outcome::Fail(kind) => Err(ProviderError::new(
                kind,
                self.name,
                format!("scripted {kind} failure"),
            )),
        }
    }

    fn supports_polling(&self) -> bool {
        true
    }

    fn final_status(&self) -> MessageStatus {
        *self.final_status.lock()
    }

    async fn poll_status(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryReport>, ProviderError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .polled
            .lock()
            .get(provider_message_id)
            .map(|status| DeliveryReport::new(provider_message_id, *status, Utc::now())))
    }
}
