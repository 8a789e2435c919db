//! Campaign runner: control operations and worker orchestration.
//!
//! The [`Dispatcher`] owns everything a running campaign needs: the provider
//! chain and pacing controller of every channel, the auth breaker, the
//! attempt log and one worker task per active campaign.

mod serve;
mod worker;

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use chrono::Utc;
use dashmap::DashMap;
use herald_common::{
    Campaign, CampaignId, CampaignStats, CampaignStatus, Channel, Counter, Message, MessageStatus,
    internal, tracing,
};
use herald_provider::{ChannelProvider, DeliveryReport, FailoverChain, build_chain};
use herald_store::{Store, StoreError};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    attempts::AttemptLog,
    config::{ChannelConfig, DispatchConfig},
    error::{ControlError, DispatchError},
    media::MediaStore,
    pacing::{Clock, PacingConfig, PacingController, SystemClock},
    policy::AuthBreaker,
    reconciler::{ReconcileOutcome, Reconciler},
    resolver::RecipientResolver,
};

/// Error recorded on messages cancelled by `stop_campaign`.
pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";

struct WorkerHandle {
    halt: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub(crate) struct Inner {
    pub(crate) config: DispatchConfig,
    pub(crate) store: Arc<dyn Store>,
    resolver: Arc<dyn RecipientResolver>,
    pub(crate) media: Arc<dyn MediaStore>,
    chains: DashMap<Channel, Arc<FailoverChain>>,
    pacing: DashMap<Channel, Arc<PacingController>>,
    pub(crate) breaker: AuthBreaker,
    pub(crate) attempts: AttemptLog,
    pub(crate) reconciler: Reconciler,
    workers: parking_lot::Mutex<AHashMap<CampaignId, WorkerHandle>>,
    clock: Arc<dyn Clock>,
}

impl Inner {
    pub(crate) fn chain(&self, channel: Channel) -> Option<Arc<FailoverChain>> {
        self.chains.get(&channel).map(|chain| Arc::clone(&chain))
    }

    pub(crate) fn pacing(&self, channel: Channel) -> Arc<PacingController> {
        Arc::clone(
            &self.pacing.entry(channel).or_insert_with(|| {
                Arc::new(PacingController::with_clock(
                    channel,
                    PacingConfig::default(),
                    Arc::clone(&self.clock),
                ))
            }),
        )
    }
}

/// Handle to the dispatch engine. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("channels", &self.channels())
            .field("workers", &self.inner.workers.lock().len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn Store>,
        resolver: Arc<dyn RecipientResolver>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self::with_clock(config, store, resolver, media, Arc::new(SystemClock))
    }

    /// Like [`Dispatcher::new`], reading pacing windows and caps from `clock`.
    #[must_use]
    pub fn with_clock(
        config: DispatchConfig,
        store: Arc<dyn Store>,
        resolver: Arc<dyn RecipientResolver>,
        media: Arc<dyn MediaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                breaker: AuthBreaker::new(config.auth_breaker.clone()),
                attempts: AttemptLog::new(config.attempt_log_capacity),
                reconciler: Reconciler::new(Arc::clone(&store)),
                chains: DashMap::new(),
                pacing: DashMap::new(),
                workers: parking_lot::Mutex::new(AHashMap::new()),
                config,
                store,
                resolver,
                media,
                clock,
            }),
        }
    }

    pub(crate) const fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Channels that currently have a provider chain.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<_> = self.inner.chains.iter().map(|entry| *entry.key()).collect();
        channels.sort_by_key(|channel| channel.as_str());
        channels
    }

    pub fn chain(&self, channel: Channel) -> Option<Arc<FailoverChain>> {
        self.inner.chain(channel)
    }

    pub fn pacing(&self, channel: Channel) -> Option<Arc<PacingController>> {
        self.inner.pacing.get(&channel).map(|pacing| Arc::clone(&pacing))
    }

    /// Look a provider up by name across all channels.
    pub fn provider(&self, name: &str) -> Option<Arc<dyn ChannelProvider>> {
        self.inner
            .chains
            .iter()
            .find_map(|chain| chain.provider(name).map(Arc::clone))
    }

    // ----------------------------------------------------------------------
    // Channel configuration
    // ----------------------------------------------------------------------

    /// Build the channel's provider chain and install it with its pacing.
    pub fn configure_channel(
        &self,
        channel: Channel,
        config: &ChannelConfig,
    ) -> Result<(), DispatchError> {
        let chain = build_chain(channel, &config.providers)?;
        self.install_channel(chain, config.pacing.clone());
        Ok(())
    }

    /// Install an already built chain.
    ///
    /// Running workers pick the new chain up on their next message. The
    /// pacing controller is only replaced when its configuration changed.
    pub fn install_channel(&self, chain: FailoverChain, pacing: PacingConfig) {
        let channel = chain.channel();
        let providers: Vec<_> = chain.providers().iter().map(|p| p.name().to_string()).collect();

        self.inner.chains.insert(channel, Arc::new(chain));

        let unchanged = self
            .inner
            .pacing
            .get(&channel)
            .is_some_and(|existing| existing.config() == &pacing);
        if !unchanged {
            self.inner.pacing.insert(
                channel,
                Arc::new(PacingController::with_clock(
                    channel,
                    pacing,
                    Arc::clone(&self.inner.clock),
                )),
            );
        }

        internal!(
            level = INFO,
            "Channel {channel} configured with providers {providers:?}"
        );
    }

    /// Swap in a new configuration for a live channel.
    ///
    /// When the new configuration cannot be built the channel is invalidated
    /// and its unfinished campaigns fail.
    pub async fn reconfigure_channel(
        &self,
        channel: Channel,
        config: &ChannelConfig,
    ) -> Result<(), DispatchError> {
        match build_chain(channel, &config.providers) {
            Ok(chain) => {
                self.install_channel(chain, config.pacing.clone());
                Ok(())
            }
            Err(error) => {
                tracing::error!(
                    channel = %channel,
                    error = %error,
                    "Channel configuration is invalid"
                );
                self.invalidate_channel(channel).await?;
                Err(error.into())
            }
        }
    }

    /// Remove a channel's providers and fail every unfinished campaign on it.
    ///
    /// Returns the number of campaigns that were failed.
    pub async fn invalidate_channel(&self, channel: Channel) -> Result<usize, DispatchError> {
        self.inner.chains.remove(&channel);

        let mut failed = 0;
        for campaign in self.inner.store.list_campaigns(None).await? {
            if campaign.channel != channel || campaign.status.is_terminal() {
                continue;
            }

            let task = self.halt_worker(campaign.id, true);
            match self
                .inner
                .store
                .transition_campaign(
                    campaign.id,
                    &[
                        CampaignStatus::Draft,
                        CampaignStatus::Scheduled,
                        CampaignStatus::Running,
                        CampaignStatus::Paused,
                    ],
                    CampaignStatus::Failed,
                )
                .await
            {
                Ok(_) => {
                    failed += 1;
                    tracing::error!(
                        campaign = %campaign.id,
                        channel = %channel,
                        "Campaign failed: channel configuration is invalid"
                    );
                }
                Err(StoreError::StatusConflict { .. }) => {}
                Err(error) => return Err(error.into()),
            }

            if let Some(task) = task {
                let _ = task.await;
            }
        }

        Ok(failed)
    }

    // ----------------------------------------------------------------------
    // Campaign control
    // ----------------------------------------------------------------------

    /// Store a new campaign as `draft`.
    pub async fn create_campaign(&self, mut campaign: Campaign) -> Result<Campaign, DispatchError> {
        campaign.status = CampaignStatus::Draft;
        campaign.stats = CampaignStats::default();
        self.inner.store.insert_campaign(campaign.clone()).await?;

        internal!(
            level = DEBUG,
            "Created campaign {} ({}) on {}",
            campaign.id,
            campaign.name,
            campaign.channel
        );
        Ok(campaign)
    }

    /// `draft -> scheduled`. Requires a send time in the future; snapshots the
    /// recipients.
    pub async fn schedule_campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        let campaign = self.inner.store.campaign(id).await?;
        if campaign.status != CampaignStatus::Draft {
            return Err(ControlError::InvalidTransition {
                campaign: id,
                operation: "schedule",
                status: campaign.status,
            }
            .into());
        }

        match campaign.scheduled_at {
            None => {
                return Err(ControlError::NotSchedulable {
                    campaign: id,
                    reason: "no send time set",
                }
                .into());
            }
            Some(at) if at <= Utc::now() => {
                return Err(ControlError::NotSchedulable {
                    campaign: id,
                    reason: "send time is in the past",
                }
                .into());
            }
            Some(_) => {}
        }

        self.snapshot(&campaign).await?;
        let campaign = self
            .transition(
                id,
                "schedule",
                &[CampaignStatus::Draft],
                CampaignStatus::Scheduled,
            )
            .await?;

        internal!(
            level = INFO,
            "Campaign {id} scheduled for {:?}",
            campaign.scheduled_at
        );
        Ok(campaign)
    }

    /// `draft | scheduled -> running` and start the campaign's worker.
    pub async fn start_campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        let campaign = self.inner.store.campaign(id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(ControlError::InvalidTransition {
                campaign: id,
                operation: "start",
                status: campaign.status,
            }
            .into());
        }

        if self.inner.chain(campaign.channel).is_none() {
            return Err(DispatchError::ChannelUnavailable(campaign.channel));
        }

        self.snapshot(&campaign).await?;
        let campaign = self
            .transition(
                id,
                "start",
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Running,
            )
            .await?;

        internal!(
            level = INFO,
            "Campaign {id} started with {} recipients",
            campaign.stats.target
        );
        self.spawn_worker(id);
        Ok(campaign)
    }

    /// `running -> paused`. In-flight provider calls finish and are recorded.
    pub async fn pause_campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        let campaign = self
            .transition(id, "pause", &[CampaignStatus::Running], CampaignStatus::Paused)
            .await?;
        self.halt_worker(id, false);

        internal!(level = INFO, "Campaign {id} paused");
        Ok(campaign)
    }

    /// `paused -> running`. Also closes the campaign's auth breaker.
    pub async fn resume_campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        let campaign = self
            .transition(id, "resume", &[CampaignStatus::Paused], CampaignStatus::Running)
            .await?;
        self.inner.breaker.reset(id);
        self.spawn_worker(id);

        internal!(level = INFO, "Campaign {id} resumed");
        Ok(campaign)
    }

    /// End a campaign early.
    ///
    /// The worker is halted and awaited, every message still waiting to be
    /// sent is failed with [`STOPPED_BY_OPERATOR`], and the campaign ends
    /// `completed`.
    pub async fn stop_campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        self.transition(
            id,
            "stop",
            &[
                CampaignStatus::Scheduled,
                CampaignStatus::Running,
                CampaignStatus::Paused,
            ],
            CampaignStatus::Completed,
        )
        .await?;

        if let Some(task) = self.halt_worker(id, true) {
            let _ = task.await;
        }

        let mut cancelled = 0u64;
        for message in self.inner.store.list_messages(id, None).await? {
            let expected = message.status;
            if !matches!(expected, MessageStatus::Pending | MessageStatus::Sending) {
                continue;
            }

            let mut message = message;
            message.status = MessageStatus::Failed;
            message.error = Some(STOPPED_BY_OPERATOR.to_string());
            message.failed_at = Some(Utc::now());
            message.next_attempt_at = None;

            if self.inner.store.swap_message(expected, message).await? {
                self.inner.store.increment(id, Counter::Failed).await?;
                cancelled += 1;
            }
        }

        self.inner.breaker.reset(id);
        internal!(
            level = INFO,
            "Campaign {id} stopped, {cancelled} unsent messages cancelled"
        );
        Ok(self.inner.store.campaign(id).await?)
    }

    // ----------------------------------------------------------------------
    // Delivery status
    // ----------------------------------------------------------------------

    /// Apply an asynchronous status event for a provider message id.
    pub async fn reconcile_delivery_event(
        &self,
        provider_message_id: &str,
        status: MessageStatus,
        timestamp: chrono::DateTime<Utc>,
    ) -> Result<ReconcileOutcome, DispatchError> {
        Ok(self
            .inner
            .reconciler
            .apply(provider_message_id, status, timestamp, None)
            .await?)
    }

    /// Apply a report parsed from a provider webhook or poll.
    pub async fn reconcile_report(
        &self,
        report: &DeliveryReport,
    ) -> Result<ReconcileOutcome, DispatchError> {
        Ok(self.inner.reconciler.apply_report(report).await?)
    }

    // ----------------------------------------------------------------------
    // Internals
    // ----------------------------------------------------------------------

    async fn transition(
        &self,
        id: CampaignId,
        operation: &'static str,
        expected: &[CampaignStatus],
        next: CampaignStatus,
    ) -> Result<Campaign, DispatchError> {
        match self
            .inner
            .store
            .transition_campaign(id, expected, next)
            .await
        {
            Ok(campaign) => Ok(campaign),
            Err(StoreError::StatusConflict { actual, .. }) => Err(ControlError::InvalidTransition {
                campaign: id,
                operation,
                status: actual,
            }
            .into()),
            Err(error) => Err(error.into()),
        }
    }

    /// Create the campaign's message rows unless that already happened.
    async fn snapshot(&self, campaign: &Campaign) -> Result<u64, DispatchError> {
        if self.inner.store.has_messages(campaign.id).await? {
            return Ok(campaign.stats.target);
        }

        let mut recipients = self.inner.resolver.resolve(&campaign.target).await?;
        if campaign.target.is_test() {
            recipients.truncate(1);
        }
        if recipients.is_empty() {
            return Err(ControlError::NoRecipients(campaign.id).into());
        }

        let messages = recipients
            .into_iter()
            .zip(0u32..)
            .map(|(recipient, sequence)| Message::pending(campaign.id, sequence, recipient))
            .collect();

        let target = self
            .inner
            .store
            .snapshot_messages(campaign.id, messages)
            .await?;
        internal!(
            level = DEBUG,
            "Snapshotted {target} recipients for campaign {}",
            campaign.id
        );
        Ok(target)
    }

    /// Start a worker for `id`. A previous worker of the same campaign is
    /// halted and awaited by the new task before it touches any message.
    pub(crate) fn spawn_worker(&self, id: CampaignId) {
        let (halt, halted) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let mut workers = self.inner.workers.lock();
        let previous = workers.remove(&id);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.halt.send(true);
                let _ = previous.task.await;
            }
            worker::run(inner, id, halted).await;
        });

        workers.insert(id, WorkerHandle { halt, task });
    }

    /// Ask the campaign's worker to stop. With `detach` the handle is removed
    /// and returned so the caller can await it.
    fn halt_worker(&self, id: CampaignId, detach: bool) -> Option<JoinHandle<()>> {
        let mut workers = self.inner.workers.lock();
        if detach {
            let handle = workers.remove(&id)?;
            let _ = handle.halt.send(true);
            Some(handle.task)
        } else {
            if let Some(handle) = workers.get(&id) {
                let _ = handle.halt.send(true);
            }
            None
        }
    }

    /// Whether the campaign has a worker that has not finished yet.
    pub fn is_worker_active(&self, id: CampaignId) -> bool {
        self.inner
            .workers
            .lock()
            .get(&id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Drop handles of workers that have exited.
    fn reap_workers(&self) {
        self.inner
            .workers
            .lock()
            .retain(|_, handle| !handle.task.is_finished());
    }

    /// Halt every worker and wait up to `timeout` for in-flight calls.
    async fn halt_all(&self, timeout: Duration) {
        let handles: Vec<_> = self.inner.workers.lock().drain().collect();
        if handles.is_empty() {
            return;
        }

        for (_, handle) in &handles {
            let _ = handle.halt.send(true);
        }

        let count = handles.len();
        let wait = async {
            for (_, handle) in handles {
                let _ = handle.task.await;
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            tracing::warn!(
                workers = count,
                "Shutdown timeout exceeded, unfinished sends will be retried on restart"
            );
        } else {
            internal!("All {count} campaign workers stopped");
        }
    }
}
