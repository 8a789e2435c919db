//! Shared fixtures for dispatch integration tests.
#![allow(dead_code)] // Not every test file uses every helper
#![allow(clippy::unwrap_used)]

pub mod mock_provider;

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use herald_common::{Campaign, CampaignId, CampaignStatus, Channel, Recipient, TargetSelector};
use herald_dispatch::{
    Clock, DispatchConfig, Dispatcher, PacingConfig, RetryPolicy, StaticResolver, SystemClock,
    UrlMediaStore,
};
use tokio::time::Instant;
use herald_provider::{ChannelProvider, FailoverChain};
use herald_store::{MemoryStore, Store};

pub use mock_provider::{MockProvider, Outcome};

pub const SEGMENT: &str = "customers";

pub fn recipients(count: usize) -> Vec<Recipient> {
    (0..count)
        .map(|n| Recipient::new(format!("+1500555{n:04}")).with_variable("name", format!("R{n}")))
        .collect()
}

/// Retries fast and without jitter so tests can reason about timing.
pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_retry_delay_secs: 1,
            max_retry_delay_secs: 10,
            retry_jitter_factor: 0.0,
            rate_limit_backoff_multiplier: 2,
        },
        ..DispatchConfig::default()
    }
}

/// Local wall clock that moves with tokio's (paused) clock.
#[derive(Debug)]
pub struct VirtualClock {
    base: NaiveDateTime,
    started: Instant,
}

impl VirtualClock {
    pub fn at(hour: u32, minute: u32) -> Arc<Self> {
        Arc::new(Self {
            base: NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
            started: Instant::now(),
        })
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> NaiveDateTime {
        self.base + TimeDelta::from_std(self.started.elapsed()).unwrap()
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub store: Arc<dyn Store>,
}

impl Harness {
    /// A dispatcher whose `customers` segment has `count` recipients.
    pub fn new(count: usize) -> Self {
        Self::with_config(count, dispatch_config())
    }

    pub fn with_config(count: usize, config: DispatchConfig) -> Self {
        Self::build(count, config, Arc::new(SystemClock))
    }

    /// Pacing windows and caps read `clock` instead of the system time.
    pub fn with_clock(count: usize, clock: Arc<dyn Clock>) -> Self {
        Self::build(count, dispatch_config(), clock)
    }

    fn build(count: usize, config: DispatchConfig, clock: Arc<dyn Clock>) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let resolver = StaticResolver::default()
            .with_segment(SEGMENT, recipients(count))
            .with_segment("empty", Vec::new());

        let dispatcher = Dispatcher::with_clock(
            config,
            Arc::clone(&store),
            Arc::new(resolver),
            Arc::new(UrlMediaStore::new("https://cdn.example.com")),
            clock,
        );

        Self { dispatcher, store }
    }

    /// Install an SMS chain made of `providers`, in order.
    pub fn sms(&self, providers: &[Arc<MockProvider>], pacing: PacingConfig) {
        let providers = providers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn ChannelProvider>)
            .collect();
        self.dispatcher
            .install_channel(FailoverChain::new(Channel::Sms, providers).unwrap(), pacing);
    }

    pub async fn campaign(&self, template: &str) -> CampaignId {
        self.create(Campaign::draft(
            "spring sale",
            Channel::Sms,
            template,
            TargetSelector::Segment(SEGMENT.to_string()),
        ))
        .await
    }

    pub async fn create(&self, campaign: Campaign) -> CampaignId {
        self.dispatcher.create_campaign(campaign).await.unwrap().id
    }

    pub async fn status(&self, id: CampaignId) -> CampaignStatus {
        self.store.campaign(id).await.unwrap().status
    }

    /// Poll until the campaign reaches `status`; time is usually paused, so
    /// this advances virtual time only.
    pub async fn wait_for(&self, id: CampaignId, status: CampaignStatus) -> Campaign {
        for _ in 0..20_000 {
            let campaign = self.store.campaign(id).await.unwrap();
            if campaign.status == status {
                return campaign;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        panic!(
            "campaign {id} never reached {status}, still {}",
            self.status(id).await
        );
    }

    /// Let spawned tasks run for `duration` of (virtual) time.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
