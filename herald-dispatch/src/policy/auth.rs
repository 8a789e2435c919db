//! Per-campaign circuit breaker for credential failures.
//!
//! An `auth` failure means every further send of the campaign through the
//! same provider configuration will fail too. The breaker counts consecutive
//! auth failures per campaign; once the threshold is reached it opens and the
//! runner pauses the campaign. It closes again on a successful send or when
//! an operator resumes the campaign.
//!
//! ```text
//! ┌────────┐  N consecutive auth failures  ┌──────┐
//! │ Closed │ ────────────────────────────> │ Open │
//! └────────┘                               └──────┘
//!     ^                                       │
//!     └──────────── resume / success ─────────┘
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use herald_common::{CampaignId, tracing};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBreakerConfig {
    /// Consecutive auth failures that pause a campaign
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for AuthBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug)]
struct BreakerData {
    state: BreakerState,
    consecutive_failures: u32,
}

impl BreakerData {
    const fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug)]
pub struct AuthBreaker {
    config: AuthBreakerConfig,
    breakers: DashMap<CampaignId, Arc<parking_lot::Mutex<BreakerData>>>,
}

impl AuthBreaker {
    #[must_use]
    pub fn new(config: AuthBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn get_breaker(&self, campaign: CampaignId) -> Arc<parking_lot::Mutex<BreakerData>> {
        self.breakers
            .entry(campaign)
            .or_insert_with(|| Arc::new(parking_lot::Mutex::new(BreakerData::new())))
            .clone()
    }

    /// Record an auth failure. Returns `true` when this failure opened the
    /// breaker.
    pub fn record_failure(&self, campaign: CampaignId) -> bool {
        let breaker = self.get_breaker(campaign);
        let mut data = breaker.lock();

        data.consecutive_failures += 1;
        if data.state == BreakerState::Closed
            && data.consecutive_failures >= self.config.failure_threshold.max(1)
        {
            data.state = BreakerState::Open;
            tracing::warn!(
                campaign = %campaign,
                failures = data.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Auth breaker OPENED"
            );
            return true;
        }

        false
    }

    /// A send went through: credentials are fine again.
    pub fn record_success(&self, campaign: CampaignId) {
        if let Some(breaker) = self.breakers.get(&campaign) {
            let mut data = breaker.lock();
            data.consecutive_failures = 0;
            data.state = BreakerState::Closed;
        }
    }

    /// Close the breaker, e.g. when an operator resumes the campaign.
    pub fn reset(&self, campaign: CampaignId) {
        self.breakers.remove(&campaign);
    }

    #[must_use]
    pub fn state(&self, campaign: CampaignId) -> BreakerState {
        self.breakers
            .get(&campaign)
            .map_or(BreakerState::Closed, |breaker| breaker.lock().state)
    }

    #[must_use]
    pub fn consecutive_failures(&self, campaign: CampaignId) -> u32 {
        self.breakers
            .get(&campaign)
            .map_or(0, |breaker| breaker.lock().consecutive_failures)
    }
}
