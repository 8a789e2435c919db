//! Readiness tracking

use std::sync::atomic::{AtomicBool, Ordering};

use herald_common::Channel;
use herald_dispatch::Dispatcher;
use serde::Serialize;

/// Tracks whether the process can accept delivery events.
///
/// The dispatcher is ready once its serve loop has recovered running
/// campaigns; at least one channel must have a provider chain installed.
#[derive(Debug)]
pub struct HealthChecker {
    dispatcher: Dispatcher,
    dispatcher_ready: AtomicBool,
}

impl HealthChecker {
    pub const fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            dispatcher_ready: AtomicBool::new(false),
        }
    }

    pub fn set_dispatcher_ready(&self, ready: bool) {
        self.dispatcher_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Dispatcher readiness updated");
    }

    /// Liveness only requires that we can answer.
    pub const fn is_alive(&self) -> bool {
        true
    }

    pub fn is_ready(&self) -> bool {
        self.status().ready
    }

    pub fn status(&self) -> HealthStatus {
        let dispatcher_ready = self.dispatcher_ready.load(Ordering::Relaxed);
        let channels = self.dispatcher.channels();

        HealthStatus {
            alive: self.is_alive(),
            ready: dispatcher_ready && !channels.is_empty(),
            dispatcher_ready,
            channels,
        }
    }
}

/// Detailed readiness, returned with a failing probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub dispatcher_ready: bool,
    /// Channels with an installed provider chain
    pub channels: Vec<Channel>,
}
