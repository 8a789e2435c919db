//! Per-campaign worker.
//!
//! A worker owns the queue of one running campaign. It acquires one pacing
//! token at a time, moves the next message `pending -> sending`, hands the
//! provider call to a task and records the outcome when the call returns.
//! Provider calls of the same campaign may overlap up to the channel's
//! concurrency.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Channel, Counter, Message, MessageId, MessageStatus,
    internal, outgoing, tracing,
};
use herald_provider::{
    ChainError, ChainResult, ErrorKind, FailoverChain, OutboundContent, SendOptions,
};
use herald_store::StoreError;
use tokio::{sync::watch, task::JoinSet, time::Instant};

use super::Inner;

/// Messages of one campaign waiting for their turn.
#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<MessageId>,
    delayed: BinaryHeap<Reverse<(Instant, MessageId)>>,
}

impl Queue {
    fn push(&mut self, id: MessageId, not_before: Option<DateTime<Utc>>) {
        let wait = not_before
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or_default();

        if wait.is_zero() {
            self.ready.push_back(id);
        } else {
            self.delay(id, wait);
        }
    }

    fn delay(&mut self, id: MessageId, wait: Duration) {
        self.delayed.push(Reverse((Instant::now() + wait, id)));
    }

    /// Move every delayed message whose time has come to the ready queue.
    fn promote(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, _))) = self.delayed.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, id))) = self.delayed.pop() {
                self.ready.push_back(id);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((at, _))| *at)
    }

    fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }
}

/// What the worker should do after recording an outcome.
enum Flow {
    Continue,
    Requeue(MessageId, Duration),
    /// The auth breaker opened and the campaign was paused
    Pause,
}

/// A provider call running in the background.
struct Sent {
    message: Message,
    result: ChainResult,
}

pub(super) async fn run(inner: Arc<Inner>, id: CampaignId, mut halt: watch::Receiver<bool>) {
    let campaign = match inner.store.campaign(id).await {
        Ok(campaign) => campaign,
        Err(error) => {
            tracing::error!(campaign = %id, error = %error, "Worker could not load campaign");
            return;
        }
    };

    if campaign.status != CampaignStatus::Running {
        internal!("Campaign {id} is {}, worker not started", campaign.status);
        return;
    }

    let mut queue = match load_queue(&inner, id).await {
        Ok(queue) => queue,
        Err(error) => {
            tracing::error!(campaign = %id, error = %error, "Worker could not load messages");
            return;
        }
    };

    internal!(
        level = DEBUG,
        "Worker for campaign {id} started with {} ready, {} delayed",
        queue.ready.len(),
        queue.delayed.len()
    );

    let mut in_flight: JoinSet<Sent> = JoinSet::new();

    loop {
        if *halt.borrow() {
            break;
        }

        queue.promote();

        if queue.is_empty() && in_flight.is_empty() {
            match finish(&inner, id, &mut queue).await {
                Ok(true) => break,
                Ok(false) => continue,
                Err(error) => {
                    tracing::error!(campaign = %id, error = %error, "Could not complete campaign");
                    break;
                }
            }
        }

        let Some(chain) = inner.chain(campaign.channel) else {
            fail_campaign(&inner, id, campaign.channel).await;
            break;
        };
        let pacing = inner.pacing(campaign.channel);
        let next_due = queue.next_due();

        tokio::select! {
            biased;

            changed = halt.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                match joined {
                    Ok(sent) => {
                        if apply_flow(id, settle(&inner, sent).await, &mut queue) {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::error!(campaign = %id, error = %error, "Send task failed");
                    }
                }
            }

            () = sleep_until(next_due), if next_due.is_some() => {}

            token = pacing.acquire(), if !queue.ready.is_empty() => {
                let token = match token {
                    Ok(token) => token,
                    Err(error) => {
                        tracing::warn!(campaign = %id, error = %error, "Pacing unavailable");
                        break;
                    }
                };

                let Some(message_id) = queue.ready.pop_front() else {
                    continue;
                };

                match claim(&inner, &campaign, &chain, message_id).await {
                    Ok(Some((message, Ok(content)))) => {
                        let address = message.recipient.address.clone();
                        let options = SendOptions {
                            reference: Some(message.id.to_string()),
                            presence_delay_ms: None,
                        };

                        outgoing!(
                            level = TRACE,
                            "Sending message {} of campaign {id} (attempt {})",
                            message.id,
                            message.attempts
                        );

                        in_flight.spawn(async move {
                            let result = chain.send(&address, &content, &options).await;
                            pacing.release(token);
                            Sent { message, result }
                        });
                    }
                    Ok(Some((message, Err(reason)))) => {
                        pacing.forfeit(token);
                        if let Err(error) = fail_message(&inner, message, reason).await {
                            tracing::error!(
                                campaign = %id,
                                error = %error,
                                "Could not fail message"
                            );
                        }
                    }
                    Ok(None) => pacing.forfeit(token),
                    Err(error) => {
                        pacing.forfeit(token);
                        tracing::error!(
                            campaign = %id,
                            message = %message_id,
                            error = %error,
                            "Could not claim message"
                        );
                        let wait = Duration::from_secs(inner.config.retry.base_retry_delay_secs);
                        queue.delay(message_id, wait);
                    }
                }
            }
        }
    }

    // Calls already made are never abandoned; record their results
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(sent) => {
                if let Err(error) = settle(&inner, sent).await {
                    tracing::error!(
                        campaign = %id,
                        error = %error,
                        "Could not record send outcome while stopping"
                    );
                }
            }
            Err(error) => {
                tracing::error!(campaign = %id, error = %error, "Send task failed");
            }
        }
    }

    internal!(level = DEBUG, "Worker for campaign {id} stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Returns `true` when the worker must stop.
fn apply_flow(id: CampaignId, flow: Result<Flow, StoreError>, queue: &mut Queue) -> bool {
    match flow {
        Ok(Flow::Continue) => false,
        Ok(Flow::Requeue(message, wait)) => {
            queue.delay(message, wait);
            false
        }
        Ok(Flow::Pause) => true,
        Err(error) => {
            tracing::error!(campaign = %id, error = %error, "Could not record send outcome");
            false
        }
    }
}

/// Load unfinished messages, reverting any left in `sending` by a previous
/// run.
async fn load_queue(inner: &Inner, id: CampaignId) -> Result<Queue, StoreError> {
    let mut queue = Queue::default();

    for message in inner.store.list_messages(id, None).await? {
        match message.status {
            MessageStatus::Pending => queue.push(message.id, message.next_attempt_at),
            MessageStatus::Sending => {
                let message_id = message.id;
                let mut reverted = message;
                reverted.status = MessageStatus::Pending;

                if inner
                    .store
                    .swap_message(MessageStatus::Sending, reverted)
                    .await?
                {
                    tracing::warn!(
                        campaign = %id,
                        message = %message_id,
                        "Message was left sending, returned to pending"
                    );
                    queue.push(message_id, None);
                }
            }
            _ => {}
        }
    }

    Ok(queue)
}

/// Complete the campaign when nothing is left to send.
///
/// Returns `false` when unsent messages were found and re-queued instead.
async fn finish(inner: &Inner, id: CampaignId, queue: &mut Queue) -> Result<bool, StoreError> {
    let reloaded = load_queue(inner, id).await?;
    if !reloaded.is_empty() {
        *queue = reloaded;
        return Ok(false);
    }

    match inner
        .store
        .transition_campaign(id, &[CampaignStatus::Running], CampaignStatus::Completed)
        .await
    {
        Ok(campaign) => {
            let stats = campaign.stats;
            tracing::info!(
                campaign = %id,
                target = stats.target,
                sent = stats.sent,
                failed = stats.failed,
                "Campaign completed"
            );
            Ok(true)
        }
        Err(StoreError::StatusConflict { .. }) => Ok(true),
        Err(error) => Err(error),
    }
}

async fn fail_campaign(inner: &Inner, id: CampaignId, channel: Channel) {
    tracing::error!(
        campaign = %id,
        channel = %channel,
        "No providers configured for channel, failing campaign"
    );

    if let Err(error) = inner
        .store
        .transition_campaign(id, &[CampaignStatus::Running], CampaignStatus::Failed)
        .await
        && !matches!(error, StoreError::StatusConflict { .. })
    {
        tracing::error!(campaign = %id, error = %error, "Could not fail campaign");
    }
}

/// Render the message's content.
async fn render(
    inner: &Inner,
    campaign: &Campaign,
    chain: &FailoverChain,
    message: &Message,
) -> Result<OutboundContent, String> {
    let variables = &message.recipient.variables;
    let body = chain.preview(&campaign.template, variables);

    let subject = match (&campaign.subject, campaign.channel) {
        (Some(subject), _) => Some(chain.preview(subject, variables)),
        (None, Channel::Email) => Some(campaign.name.clone()),
        (None, _) => None,
    };

    let media = match &campaign.media {
        Some(media) => Some(
            inner
                .media
                .resolve(media)
                .await
                .map_err(|e| format!("media unavailable: {e}"))?,
        ),
        None => None,
    };

    Ok(OutboundContent {
        body,
        subject,
        media,
    })
}

/// Move a message `pending -> sending`.
///
/// Returns `None` when the message is no longer pending. The content result
/// is an error when the message cannot be rendered; the message is then
/// already `sending` and must be failed.
async fn claim(
    inner: &Inner,
    campaign: &Campaign,
    chain: &FailoverChain,
    message_id: MessageId,
) -> Result<Option<(Message, Result<OutboundContent, String>)>, StoreError> {
    let message = inner.store.message(message_id).await?;
    if message.status != MessageStatus::Pending {
        return Ok(None);
    }

    let content = render(inner, campaign, chain, &message).await;

    let mut sending = message;
    sending.status = MessageStatus::Sending;
    sending.attempts += 1;
    sending.next_attempt_at = None;
    sending.content = Some(
        content
            .as_ref()
            .map_or_else(|_| campaign.template.clone(), |content| content.body.clone()),
    );

    if !inner
        .store
        .swap_message(MessageStatus::Pending, sending.clone())
        .await?
    {
        return Ok(None);
    }

    Ok(Some((sending, content)))
}

async fn fail_message(
    inner: &Inner,
    mut message: Message,
    reason: String,
) -> Result<(), StoreError> {
    let campaign = message.campaign_id;
    let message_id = message.id;

    message.status = MessageStatus::Failed;
    message.failed_at = Some(Utc::now());
    message.next_attempt_at = None;
    message.error = Some(reason);

    if inner
        .store
        .swap_message(MessageStatus::Sending, message)
        .await?
    {
        inner.store.increment(campaign, Counter::Failed).await?;
        tracing::debug!(campaign = %campaign, message = %message_id, "Message failed");
    }

    Ok(())
}

/// Return a message to `pending`, eligible again after `wait`.
async fn requeue(
    inner: &Inner,
    mut message: Message,
    error: &ChainError,
    wait: Duration,
) -> Result<Flow, StoreError> {
    let message_id = message.id;

    message.status = MessageStatus::Pending;
    message.error = Some(error.to_string());
    message.next_attempt_at =
        Some(Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default());

    if inner
        .store
        .swap_message(MessageStatus::Sending, message)
        .await?
    {
        Ok(Flow::Requeue(message_id, wait))
    } else {
        Ok(Flow::Continue)
    }
}

/// Record the outcome of a provider call on the message and campaign.
async fn settle(inner: &Inner, sent: Sent) -> Result<Flow, StoreError> {
    let Sent {
        mut message,
        result,
    } = sent;
    let campaign = message.campaign_id;

    inner
        .attempts
        .record(campaign, message.id, result.attempts);

    let error = match result.result {
        Ok(receipt) => {
            inner.breaker.record_success(campaign);

            // Count before the row carries a provider id, so a fast
            // delivery event can never see `delivered > sent`
            inner.store.increment(campaign, Counter::Sent).await?;

            message.status = MessageStatus::Sent;
            message.sent_at = Some(Utc::now());
            message.error = None;
            message.provider = Some(receipt.provider.clone());
            message.provider_message_id = Some(receipt.provider_message_id);

            if !inner
                .store
                .swap_message(MessageStatus::Sending, message.clone())
                .await?
            {
                tracing::error!(
                    campaign = %campaign,
                    message = %message.id,
                    "Sent message changed while in flight"
                );
            }

            outgoing!(
                level = DEBUG,
                "Message {} sent via {}",
                message.id,
                receipt.provider
            );
            return Ok(Flow::Continue);
        }
        Err(error) => error,
    };

    match error.kind() {
        ErrorKind::Validation => {
            fail_message(inner, message, error.to_string()).await?;
            Ok(Flow::Continue)
        }

        ErrorKind::Auth => {
            // Credential problems are not the message's fault
            message.attempts = message.attempts.saturating_sub(1);
            let wait = Duration::from_secs(inner.config.retry.base_retry_delay_secs);
            let flow = requeue(inner, message, &error, wait).await?;

            if inner.breaker.record_failure(campaign) {
                match inner
                    .store
                    .transition_campaign(
                        campaign,
                        &[CampaignStatus::Running],
                        CampaignStatus::Paused,
                    )
                    .await
                {
                    Ok(_) => {
                        tracing::error!(
                            campaign = %campaign,
                            provider = error.provider(),
                            failures = inner.breaker.consecutive_failures(campaign),
                            "Provider rejected credentials repeatedly, campaign paused"
                        );
                    }
                    Err(StoreError::StatusConflict { .. }) => {}
                    Err(error) => return Err(error),
                }
                return Ok(Flow::Pause);
            }

            Ok(flow)
        }

        ErrorKind::Transport | ErrorKind::RateLimited => {
            let policy = &inner.config.retry;
            if !policy.should_retry(message.attempts) {
                let reason = format!("exhausted: {error}");
                fail_message(inner, message, reason).await?;
                return Ok(Flow::Continue);
            }

            let wait = policy.next_delay(
                message.attempts,
                error.kind() == ErrorKind::RateLimited,
                error.retry_after(),
            );
            tracing::debug!(
                campaign = %campaign,
                message = %message.id,
                attempts = message.attempts,
                wait_secs = wait.as_secs(),
                "Send failed, will retry"
            );
            requeue(inner, message, &error, wait).await
        }
    }
}
