//! Campaign dispatch engine.
//!
//! This crate provides:
//! - The campaign state machine and its control operations ([`Dispatcher`])
//! - One worker per running campaign, paced per channel ([`PacingController`])
//! - Retry with exponential backoff and a per-campaign auth circuit breaker
//! - Delivery status reconciliation for webhook and polled events
//! - A scheduler for timed campaigns and recovery after a restart

pub mod attempts;
mod config;
mod error;
pub mod media;
pub mod pacing;
pub mod policy;
mod reconciler;
pub mod resolver;
mod runner;
mod service;

pub use attempts::{AttemptLog, AttemptRecord};
pub use config::{ChannelConfig, DispatchConfig};
pub use error::{ControlError, DispatchError};
pub use media::{MediaConfig, MediaError, MediaStore, UrlMediaStore};
pub use pacing::{
    Clock, PacingConfig, PacingController, PacingError, PacingStats, PacingToken, SendWindow,
    SystemClock,
};
pub use policy::{AuthBreaker, AuthBreakerConfig, BreakerState, RetryPolicy};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use resolver::{RecipientResolver, ResolveError, StaticResolver};
pub use runner::{Dispatcher, STOPPED_BY_OPERATOR};
pub use service::CampaignQueryService;
