//! Background duties of the dispatcher: scheduled starts, recovery after a
//! restart and delivery status polling.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use herald_common::{CampaignStatus, MessageStatus, Signal, internal, tracing};
use herald_provider::is_unconfirmed;
use tokio::sync::broadcast;

use super::Dispatcher;
use crate::{error::DispatchError, reconciler::ReconcileOutcome};

impl Dispatcher {
    /// Start every scheduled campaign whose time has come.
    ///
    /// Returns the number of campaigns started.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> Result<usize, DispatchError> {
        self.reap_workers();

        let mut started = 0;
        for campaign in self
            .store()
            .list_campaigns(Some(CampaignStatus::Scheduled))
            .await?
        {
            if !campaign.is_due(now) {
                continue;
            }

            match self.start_campaign(campaign.id).await {
                Ok(_) => started += 1,
                Err(error) => tracing::error!(
                    campaign = %campaign.id,
                    error = %error,
                    "Scheduled campaign could not be started"
                ),
            }
        }

        Ok(started)
    }

    /// Give every campaign persisted as `running` a worker again.
    pub async fn recover(&self) -> Result<usize, DispatchError> {
        let mut recovered = 0;
        for campaign in self
            .store()
            .list_campaigns(Some(CampaignStatus::Running))
            .await?
        {
            if self.is_worker_active(campaign.id) {
                continue;
            }

            internal!(level = INFO, "Recovering running campaign {}", campaign.id);
            self.spawn_worker(campaign.id);
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Ask polling-capable providers for the status of messages that are not
    /// settled yet, and feed the answers to the reconciler.
    ///
    /// A message is skipped once it reached its provider's final status, when
    /// it was sent longer than `poll_max_age_secs` ago, or when the provider
    /// never told us its id. A failed poll or reconcile is logged and the
    /// pass moves on.
    ///
    /// Returns the number of reports that moved a message forward.
    pub async fn poll_deliveries(&self) -> Result<usize, DispatchError> {
        let max_age = i64::try_from(self.inner().config.poll_max_age_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let mut applied = 0;

        let messages = self
            .store()
            .messages_with_status(&[MessageStatus::Sent, MessageStatus::Delivered])
            .await?;

        for message in messages {
            let (Some(provider), Some(provider_message_id)) =
                (&message.provider, &message.provider_message_id)
            else {
                continue;
            };
            if is_unconfirmed(provider_message_id) {
                continue;
            }
            if message.sent_at.is_some_and(|sent_at| now - sent_at >= max_age) {
                continue;
            }

            let Some(provider) = self.provider(provider) else {
                continue;
            };
            if !provider.supports_polling() || message.status == provider.final_status() {
                continue;
            }

            let report = match provider.poll_status(provider_message_id).await {
                Ok(Some(report)) => report,
                Ok(None) => continue,
                Err(error) => {
                    tracing::debug!(
                        provider = provider.name(),
                        provider_message_id = provider_message_id.as_str(),
                        error = %error,
                        "Status poll failed"
                    );
                    continue;
                }
            };

            match self.reconcile_report(&report).await {
                Ok(ReconcileOutcome::Applied) => applied += 1,
                Ok(_) => {}
                Err(error) => tracing::error!(
                    message_id = %message.id,
                    provider_message_id = provider_message_id.as_str(),
                    error = %error,
                    "Could not record polled delivery status"
                ),
            }
        }

        Ok(applied)
    }

    /// Run the scheduler and poller until shutdown.
    ///
    /// ## Graceful Shutdown
    ///
    /// On [`Signal::Shutdown`] the timers stop, every worker is halted and
    /// in-flight provider calls get `shutdown_timeout_secs` to finish.
    /// Campaigns stay `running` in the store and are recovered on the next
    /// start.
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        internal!("Dispatcher starting");

        let recovered = self.recover().await?;
        if recovered > 0 {
            internal!(level = INFO, "Recovered {recovered} running campaigns");
        }

        let config = &self.inner().config;
        let mut scheduler = tokio::time::interval(Duration::from_secs(
            config.scheduler_interval_secs.max(1),
        ));
        let mut poller =
            tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));

        // Skip the first poll tick; scheduled campaigns are checked right away
        poller.tick().await;

        loop {
            tokio::select! {
                _ = scheduler.tick() => {
                    match self.run_scheduled(Utc::now()).await {
                        Ok(started) if started > 0 => {
                            tracing::info!("Started {started} scheduled campaigns");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Error starting scheduled campaigns: {e}"),
                    }
                }
                _ = poller.tick() => {
                    match self.poll_deliveries().await {
                        Ok(applied) => tracing::debug!("Polled delivery status, {applied} updates"),
                        Err(e) => tracing::error!("Error polling delivery status: {e}"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            internal!("Dispatcher received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Dispatcher shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        self.halt_all(Duration::from_secs(config.shutdown_timeout_secs))
            .await;
        internal!("Dispatcher shutdown complete");

        Ok(())
    }
}
