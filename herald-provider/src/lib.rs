//! Channel providers for outbound campaign messages.
//!
//! This crate provides:
//! - The [`ChannelProvider`] capability every vendor adapter implements
//! - Error classification shared by all adapters ([`ErrorKind`])
//! - Table-driven endpoint fallback for gateways with several API shapes
//! - The [`FailoverChain`] that tries providers of one channel in order
//! - `{{variable}}` template rendering used for previews and sends

pub mod adapters;
mod chain;
mod config;
mod error;
mod http;
mod provider;
pub mod template;
pub mod validate;
mod variant;

pub use chain::{AttemptOutcome, ChainError, ChainResult, FailoverChain, ProviderAttempt};
pub use config::{ProviderConfig, build_chain};
pub use http::{HttpSettings, UNCONFIRMED_ID_PREFIX, is_unconfirmed};
pub use error::{ConfigError, ErrorKind, ProviderError};
pub use provider::{
    ChannelProvider, DeliveryReport, MediaAttachment, MediaPayload, OutboundContent, Receipt,
    SendOptions,
};
pub use variant::{EndpointVariant, attempt_variants, expand_path};
