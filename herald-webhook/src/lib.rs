//! Delivery webhook ingress for the Herald dispatcher
//!
//! Providers push delivery and read confirmations here; each event is handed
//! to the dispatcher's reconciler. The same listener serves liveness and
//! readiness probes.
//!
//! # Endpoints
//!
//! - **`POST /webhooks/{provider}`** - native payload of the named provider
//! - **`POST /events`** - provider-neutral JSON event
//! - **`/health/live`** - Returns 200 while the process can answer
//! - **`/health/ready`** - Returns 200 once the dispatcher is serving with at
//!   least one channel configured

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::WebhookConfig;
pub use error::WebhookError;
pub use server::{DeliveryEvent, IngestSummary, WebhookServer, router};
