use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use ahash::AHashMap;
use herald_common::{Channel, LoggingConfig, Recipient, Signal, internal, logging, tracing};
use herald_dispatch::{
    ChannelConfig, DispatchConfig, DispatchError, Dispatcher, MediaConfig, StaticResolver,
};
use herald_store::{MemoryStore, Store};
use herald_webhook::{HealthChecker, WebhookConfig, WebhookServer};
use serde::Deserialize;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast,
};

use crate::seed::CampaignSeed;

/// Everything `herald.config.ron` describes.
#[derive(Debug, Default, Deserialize)]
pub struct Herald {
    /// Ordered providers and pacing, per channel
    #[serde(default)]
    pub channels: BTreeMap<Channel, ChannelConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Recipient segments campaigns can target
    #[serde(default)]
    pub segments: AHashMap<String, Vec<Recipient>>,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub campaigns: Vec<CampaignSeed>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

impl Herald {
    /// Parse a configuration document.
    ///
    /// `Option` fields may be written without `Some(..)`.
    pub fn from_ron(source: &str) -> Result<Self, ron::error::SpannedError> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(source)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    /// Build the dispatcher and install every configured channel.
    pub fn dispatcher(&self) -> Result<Dispatcher, DispatchError> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(
            self.dispatch.clone(),
            store,
            Arc::new(StaticResolver::new(self.segments.clone())),
            self.media.build(),
        );

        for (channel, config) in &self.channels {
            dispatcher.configure_channel(*channel, config)?;
        }

        Ok(dispatcher)
    }

    /// Run the dispatcher and the webhook server until a termination signal.
    ///
    /// With a `source` path, `SIGHUP` re-reads it and swaps in the channel
    /// configuration found there.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel cannot be built, the webhook listener
    /// cannot be bound, or the dispatcher stops unexpectedly.
    pub async fn run(self, source: Option<PathBuf>) -> anyhow::Result<()> {
        logging::init(&self.logging);
        internal!(level = INFO, "Herald starting");

        let dispatcher = self.dispatcher()?;

        for seed in &self.campaigns {
            match seed.submit(&dispatcher).await {
                Ok(campaign) => internal!(
                    level = INFO,
                    "Seeded campaign {} ({}) as {}",
                    campaign.name,
                    campaign.id,
                    campaign.status
                ),
                Err(error) => {
                    tracing::error!(
                        campaign = %seed.name,
                        error = %error,
                        "Seed campaign rejected"
                    );
                }
            }
        }

        let health = Arc::new(HealthChecker::new(dispatcher.clone()));
        let webhook = if self.webhook.enabled {
            let server =
                WebhookServer::new(&self.webhook, dispatcher.clone(), Arc::clone(&health)).await?;
            Some(tokio::spawn(server.serve(SHUTDOWN_BROADCAST.subscribe())))
        } else {
            internal!(level = INFO, "Webhook server disabled, relying on polling");
            None
        };

        let mut serving = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let shutdown = SHUTDOWN_BROADCAST.subscribe();
            async move { dispatcher.serve(shutdown).await }
        });
        health.set_dispatcher_ready(true);

        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;

        let stopped_early = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    internal!(level = INFO, "CTRL+C entered, shutting down");
                    break None;
                }
                _ = terminate.recv() => {
                    internal!(level = INFO, "Terminate signal received, shutting down");
                    break None;
                }
                _ = hangup.recv() => {
                    if let Some(path) = &source {
                        reload(&dispatcher, path).await;
                    }
                }
                result = &mut serving => {
                    break Some(result);
                }
            }
        };

        health.set_dispatcher_ready(false);
        // No receivers left is fine: everything already stopped
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);

        let served = match stopped_early {
            Some(result) => result,
            None => serving.await,
        };

        if let Some(webhook) = webhook {
            webhook.await??;
        }

        internal!(level = INFO, "Herald stopped");
        served?.map_err(Into::into)
    }
}

async fn reload(dispatcher: &Dispatcher, path: &Path) {
    internal!(level = INFO, "Reloading channel configuration from {}", path.display());

    let config = match Herald::load(path) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "Reload failed, keeping current configuration");
            return;
        }
    };

    for (channel, channel_config) in &config.channels {
        if let Err(error) = dispatcher.reconfigure_channel(*channel, channel_config).await {
            tracing::error!(channel = %channel, error = %error, "Channel reconfiguration failed");
        }
    }
}
