//! Recipient resolution: target selector to an ordered, de-duplicated list.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use herald_common::{Recipient, TargetSelector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown segment: {0}")]
    UnknownSegment(String),

    /// A test selector with neither an address nor a segment
    #[error("Test target needs an address or a segment")]
    EmptyTestTarget,

    #[error("Resolver backend error: {0}")]
    Backend(String),
}

/// Source of campaign recipients.
#[async_trait]
pub trait RecipientResolver: Send + Sync + fmt::Debug {
    /// Resolve `target` into recipients in contact order with duplicate
    /// addresses removed (first occurrence wins).
    async fn resolve(&self, target: &TargetSelector) -> Result<Vec<Recipient>, ResolveError>;
}

/// Resolver over segments held in memory, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    segments: AHashMap<String, Vec<Recipient>>,
}

impl StaticResolver {
    #[must_use]
    pub const fn new(segments: AHashMap<String, Vec<Recipient>>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn with_segment(mut self, name: impl Into<String>, recipients: Vec<Recipient>) -> Self {
        self.segments.insert(name.into(), recipients);
        self
    }

    fn segment(&self, name: &str) -> Result<&[Recipient], ResolveError> {
        self.segments
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ResolveError::UnknownSegment(name.to_string()))
    }
}

fn dedup(recipients: &[Recipient]) -> Vec<Recipient> {
    let mut seen = AHashSet::with_capacity(recipients.len());
    recipients
        .iter()
        .filter(|recipient| !recipient.address.trim().is_empty())
        .filter(|recipient| seen.insert(recipient.dedup_key()))
        .cloned()
        .collect()
}

#[async_trait]
impl RecipientResolver for StaticResolver {
    async fn resolve(&self, target: &TargetSelector) -> Result<Vec<Recipient>, ResolveError> {
        match target {
            TargetSelector::Segment(name) => Ok(dedup(self.segment(name)?)),
            TargetSelector::Test {
                address: Some(address),
                ..
            } => Ok(vec![Recipient::new(address.trim())]),
            TargetSelector::Test {
                address: None,
                segment: Some(name),
            } => Ok(dedup(self.segment(name)?).into_iter().take(1).collect()),
            TargetSelector::Test {
                address: None,
                segment: None,
            } => Err(ResolveError::EmptyTestTarget),
        }
    }
}
