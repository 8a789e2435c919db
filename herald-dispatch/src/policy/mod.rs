//! Policies consulted by the campaign runner.
//!
//! - [`RetryPolicy`]: how often and how late a retryable failure is tried again
//! - [`AuthBreaker`]: pauses a campaign after consecutive credential failures

pub mod auth;
pub mod retry;

pub use auth::{AuthBreaker, AuthBreakerConfig, BreakerState};
pub use retry::RetryPolicy;
