//! Campaign runner scenarios against scripted providers.
#![allow(clippy::unwrap_used)]

mod support;

use std::time::Duration;

use chrono::Utc;
use herald_common::{
    Campaign, CampaignStatus, Channel, MediaRef, Message, MessageStatus, TargetSelector, Variables,
    recipient::MediaKind,
};
use herald_dispatch::{
    CampaignQueryService, ChannelConfig, ControlError, DispatchConfig, DispatchError,
    PacingConfig, ReconcileOutcome, STOPPED_BY_OPERATOR,
};
use herald_provider::{AttemptOutcome, ErrorKind};
use pretty_assertions::assert_eq;
use support::{Harness, MockProvider, Outcome, SEGMENT, VirtualClock, recipients};

fn paced(delay_ms: u64) -> PacingConfig {
    PacingConfig {
        inter_message_delay_ms: delay_ms,
        ..PacingConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_recipients_sent() {
    let harness = Harness::new(3);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hello {{ name }}").await;
    let started = harness.dispatcher.start_campaign(id).await.unwrap();
    assert_eq!(started.status, CampaignStatus::Running);
    assert_eq!(started.stats.target, 3);

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.target, 3);
    assert_eq!(campaign.stats.sent, 3);
    assert_eq!(campaign.stats.failed, 0);

    let messages = harness.store.list_messages(id, None).await.unwrap();
    assert!(messages.iter().all(|m| m.status == MessageStatus::Sent));
    assert_eq!(messages[0].content.as_deref(), Some("Hello R0"));
    assert_eq!(messages[0].provider.as_deref(), Some("primary"));
    assert!(messages.iter().all(|m| m.provider_message_id.is_some()));

    let sent_to: Vec<_> = provider.calls().into_iter().map(|c| c.recipient).collect();
    assert_eq!(sent_to, vec!["+15005550000", "+15005550001", "+15005550002"]);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_is_terminal() {
    let harness = Harness::new(1);
    let provider = MockProvider::new("primary", Outcome::Fail(ErrorKind::Validation));
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.failed, 1);
    assert_eq!(campaign.stats.sent, 0);
    assert_eq!(provider.call_count(), 1);

    let failed = harness
        .dispatcher
        .list_messages(id, Some(MessageStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].failed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_fails_over() {
    let harness = Harness::new(1);
    let first = MockProvider::new("first", Outcome::Fail(ErrorKind::Transport));
    let second = MockProvider::new("second", Outcome::Succeed);
    harness.sms(&[first.clone(), second.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.sent, 1);

    let message = &harness.store.list_messages(id, None).await.unwrap()[0];
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.provider.as_deref(), Some("second"));
    assert_eq!(message.provider_message_id.as_deref(), Some("second-1"));
    assert_eq!(message.attempts, 1);

    let attempts = harness.dispatcher.recent_attempts(10);
    let outcomes: Vec<_> = attempts
        .iter()
        .map(|a| (a.provider.as_str(), a.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("second", AttemptOutcome::Success),
            ("first", AttemptOutcome::Retryable(ErrorKind::Transport)),
        ]
    );
    assert_eq!((first.call_count(), second.call_count()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_exhausted() {
    let harness = Harness::new(1);
    let provider = MockProvider::new("flaky", Outcome::Fail(ErrorKind::Transport));
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.failed, 1);
    assert_eq!(provider.call_count(), 3);

    let message = &harness.store.list_messages(id, None).await.unwrap()[0];
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.attempts, 3);
    assert!(
        message
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("exhausted:"))
    );

    // Backoff of 1s then 2s between the three attempts
    let calls = provider.calls();
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(1));
    assert!(calls[2].at - calls[1].at >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success() {
    let harness = Harness::new(1);
    let provider = MockProvider::scripted(
        "primary",
        vec![Outcome::Fail(ErrorKind::RateLimited)],
        Outcome::Succeed,
    );
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.sent, 1);
    assert_eq!(campaign.stats.failed, 0);

    // Rate limited: base 1s times the multiplier of 2
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(2));

    let message = &harness.store.list_messages(id, None).await.unwrap()[0];
    assert_eq!(message.attempts, 2);
    assert_eq!(message.error, None);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failures_pause_campaign() {
    let harness = Harness::new(5);
    let provider = MockProvider::new("primary", Outcome::Fail(ErrorKind::Auth));
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Paused).await;
    assert_eq!(provider.call_count(), 3);
    assert_eq!(campaign.stats.failed, 0);

    // Nothing is acquired while paused
    harness.settle(Duration::from_secs(600)).await;
    assert_eq!(provider.call_count(), 3);

    let messages = harness.store.list_messages(id, None).await.unwrap();
    assert!(messages.iter().all(|m| m.status == MessageStatus::Pending));
    assert!(messages.iter().all(|m| m.attempts == 0));

    provider.set_fallback(Outcome::Succeed);
    harness.dispatcher.resume_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.sent, 5);
    assert_eq!(provider.call_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_spaces_sends() {
    let harness = Harness::new(4);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], paced(500));

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    harness.wait_for(id, CampaignStatus::Completed).await;

    let calls = provider.calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(500));
    }
}

#[tokio::test(start_paused = true)]
async fn test_campaigns_on_one_channel_share_pacing() {
    let harness = Harness::with_clock(3, VirtualClock::at(10, 0));
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(
        &[provider.clone()],
        PacingConfig {
            inter_message_delay_ms: 500,
            max_per_hour: Some(4),
            ..PacingConfig::default()
        },
    );

    let spring = harness.campaign("Spring {{name}}").await;
    let summer = harness.campaign("Summer {{name}}").await;
    let started = tokio::time::Instant::now();
    harness.dispatcher.start_campaign(spring).await.unwrap();
    harness.dispatcher.start_campaign(summer).await.unwrap();

    // Both campaigns together only get four sends in the first hour
    harness.settle(Duration::from_secs(30 * 60)).await;
    assert_eq!(provider.call_count(), 4);

    harness.settle(Duration::from_secs(40 * 60)).await;
    harness.wait_for(spring, CampaignStatus::Completed).await;
    harness.wait_for(summer, CampaignStatus::Completed).await;

    let mut calls = provider.calls();
    assert_eq!(calls.len(), 6);
    calls.sort_by_key(|call| call.at);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(500));
    }
    assert!(calls[4].at - started >= Duration::from_secs(59 * 60));

    let bodies: Vec<_> = calls.iter().map(|call| call.content.body.as_str()).collect();
    assert!(bodies.iter().any(|body| body.starts_with("Spring")));
    assert!(bodies.iter().any(|body| body.starts_with("Summer")));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limits_in_flight_calls() {
    let harness = Harness::new(6);
    let provider = MockProvider::slow("primary", Duration::from_secs(1));
    harness.sms(
        &[provider.clone()],
        PacingConfig {
            concurrency: 2,
            ..PacingConfig::default()
        },
    );

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;

    assert_eq!(campaign.stats.sent, 6);
    assert_eq!(provider.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pause_records_call_in_flight() {
    let harness = Harness::new(2);
    let provider = MockProvider::slow("primary", Duration::from_secs(5));
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    harness.settle(Duration::from_secs(1)).await;
    assert_eq!(provider.call_count(), 1);

    harness.dispatcher.pause_campaign(id).await.unwrap();
    harness.settle(Duration::from_secs(10)).await;
    assert!(!harness.dispatcher.is_worker_active(id));

    let campaign = harness.store.campaign(id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Paused);
    assert_eq!(campaign.stats.sent, 1);
    assert_eq!(provider.call_count(), 1);

    let mut statuses: Vec<_> = harness
        .store
        .list_messages(id, None)
        .await
        .unwrap()
        .into_iter()
        .map(|message| message.status)
        .collect();
    statuses.sort_by_key(|status| status.to_string());
    assert_eq!(statuses, vec![MessageStatus::Pending, MessageStatus::Sent]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_unsent_messages() {
    let harness = Harness::new(3);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], paced(600_000));

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    while harness.store.campaign(id).await.unwrap().stats.sent < 1 {
        harness.settle(Duration::from_millis(50)).await;
    }

    let campaign = harness.dispatcher.stop_campaign(id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.stats.sent, 1);
    assert_eq!(campaign.stats.failed, 2);
    assert_eq!(provider.call_count(), 1);

    let cancelled = harness
        .store
        .list_messages(id, Some(MessageStatus::Failed))
        .await
        .unwrap();
    assert!(
        cancelled
            .iter()
            .all(|m| m.error.as_deref() == Some(STOPPED_BY_OPERATOR))
    );
    assert!(!harness.dispatcher.is_worker_active(id));
}

#[tokio::test(start_paused = true)]
async fn test_test_campaign_sends_once() {
    let harness = Harness::new(3);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness
        .create(Campaign::draft(
            "dry run",
            Channel::Sms,
            "Hi {{name}}",
            TargetSelector::Test {
                address: None,
                segment: Some(SEGMENT.to_string()),
            },
        ))
        .await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.target, 1);
    assert_eq!(campaign.stats.sent, 1);
    assert_eq!(provider.calls()[0].recipient, "+15005550000");
    assert_eq!(provider.calls()[0].content.body, "Hi R0");
}

#[tokio::test(start_paused = true)]
async fn test_media_failure_fails_message_without_sending() {
    let harness = Harness::new(1);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness
        .create(
            Campaign::draft(
                "with media",
                Channel::Sms,
                "Hi",
                TargetSelector::Segment(SEGMENT.to_string()),
            )
            .with_media(MediaRef {
                kind: MediaKind::Image,
                reference: "  ".to_string(),
            }),
        )
        .await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.failed, 1);
    assert_eq!(provider.call_count(), 0);

    // No provider call was made, so nothing counts against the caps
    let pacing = harness.dispatcher.pacing_stats(Channel::Sms).unwrap();
    assert_eq!(pacing.sent_this_hour, 0);
    assert_eq!(pacing.sent_today, 0);

    let message = &harness.store.list_messages(id, None).await.unwrap()[0];
    assert!(
        message
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("media unavailable"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_control_rejections() {
    let harness = Harness::new(2);
    harness.sms(
        &[MockProvider::new("primary", Outcome::Succeed)],
        PacingConfig::default(),
    );

    let id = harness.campaign("Hi").await;
    let error = harness.dispatcher.pause_campaign(id).await.unwrap_err();
    assert!(matches!(
        error,
        DispatchError::Control(ControlError::InvalidTransition {
            operation: "pause",
            status: CampaignStatus::Draft,
            ..
        })
    ));

    let error = harness.dispatcher.resume_campaign(id).await.unwrap_err();
    assert!(error.is_rejection());

    // No send time
    let error = harness.dispatcher.schedule_campaign(id).await.unwrap_err();
    assert!(matches!(
        error,
        DispatchError::Control(ControlError::NotSchedulable { .. })
    ));

    let empty = harness
        .create(Campaign::draft(
            "nobody",
            Channel::Sms,
            "Hi",
            TargetSelector::Segment("empty".to_string()),
        ))
        .await;
    let error = harness.dispatcher.start_campaign(empty).await.unwrap_err();
    assert!(matches!(
        error,
        DispatchError::Control(ControlError::NoRecipients(c)) if c == empty
    ));
    assert_eq!(harness.status(empty).await, CampaignStatus::Draft);

    let email = harness
        .create(Campaign::draft(
            "newsletter",
            Channel::Email,
            "Hi",
            TargetSelector::Segment(SEGMENT.to_string()),
        ))
        .await;
    assert!(matches!(
        harness.dispatcher.start_campaign(email).await,
        Err(DispatchError::ChannelUnavailable(Channel::Email))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_campaign_starts_when_due() {
    let harness = Harness::new(2);
    harness.sms(
        &[MockProvider::new("primary", Outcome::Succeed)],
        PacingConfig::default(),
    );

    let at = Utc::now() + chrono::Duration::hours(1);
    let id = harness
        .create(
            Campaign::draft(
                "later",
                Channel::Sms,
                "Hi",
                TargetSelector::Segment(SEGMENT.to_string()),
            )
            .scheduled_for(at),
        )
        .await;

    let scheduled = harness.dispatcher.schedule_campaign(id).await.unwrap();
    assert_eq!(scheduled.status, CampaignStatus::Scheduled);
    assert_eq!(scheduled.stats.target, 2);

    assert_eq!(harness.dispatcher.run_scheduled(Utc::now()).await.unwrap(), 0);
    assert_eq!(harness.status(id).await, CampaignStatus::Scheduled);

    let later = at + chrono::Duration::minutes(1);
    assert_eq!(harness.dispatcher.run_scheduled(later).await.unwrap(), 1);

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_configuration_fails_campaign() {
    let harness = Harness::new(3);
    harness.sms(
        &[MockProvider::new("primary", Outcome::Succeed)],
        paced(600_000),
    );

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let error = harness
        .dispatcher
        .reconfigure_channel(
            Channel::Sms,
            &ChannelConfig {
                providers: Vec::new(),
                pacing: PacingConfig::default(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, DispatchError::Configuration(_)));

    assert_eq!(harness.status(id).await, CampaignStatus::Failed);
    assert!(harness.dispatcher.chain(Channel::Sms).is_none());
    assert!(!harness.dispatcher.is_worker_active(id));
}

#[tokio::test(start_paused = true)]
async fn test_recover_reverts_sending_messages() {
    let harness = Harness::new(3);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    // A campaign left running by a previous process, one message mid-send
    let id = harness.campaign("Hi").await;
    let messages: Vec<_> = recipients(3)
        .into_iter()
        .zip(0u32..)
        .map(|(recipient, sequence)| Message::pending(id, sequence, recipient))
        .collect();
    let mut sending = messages[0].clone();
    harness.store.snapshot_messages(id, messages).await.unwrap();
    harness
        .store
        .transition_campaign(id, &[CampaignStatus::Draft], CampaignStatus::Running)
        .await
        .unwrap();
    sending.status = MessageStatus::Sending;
    sending.attempts = 1;
    assert!(
        harness
            .store
            .swap_message(MessageStatus::Pending, sending)
            .await
            .unwrap()
    );

    assert_eq!(harness.dispatcher.recover().await.unwrap(), 1);

    let campaign = harness.wait_for(id, CampaignStatus::Completed).await;
    assert_eq!(campaign.stats.sent, 3);
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_events_and_polling() {
    let harness = Harness::new(2);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    harness.wait_for(id, CampaignStatus::Completed).await;

    let dispatcher = &harness.dispatcher;
    assert_eq!(
        dispatcher
            .reconcile_delivery_event("primary-1", MessageStatus::Delivered, Utc::now())
            .await
            .unwrap(),
        ReconcileOutcome::Applied
    );
    assert_eq!(
        dispatcher
            .reconcile_delivery_event("primary-1", MessageStatus::Sent, Utc::now())
            .await
            .unwrap(),
        ReconcileOutcome::Ignored
    );
    assert_eq!(
        dispatcher
            .reconcile_delivery_event("unknown-9", MessageStatus::Read, Utc::now())
            .await
            .unwrap(),
        ReconcileOutcome::Unknown
    );

    provider.report("primary-2", MessageStatus::Read);
    assert_eq!(dispatcher.poll_deliveries().await.unwrap(), 1);

    let stats = dispatcher.campaign_stats(id).await.unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.read, 1);
    assert!(stats.is_consistent());
}

#[tokio::test(start_paused = true)]
async fn test_settled_messages_are_not_polled_again() {
    let harness = Harness::new(2);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    provider.set_final_status(MessageStatus::Delivered);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    harness.wait_for(id, CampaignStatus::Completed).await;

    provider.report("primary-1", MessageStatus::Delivered);
    provider.report("primary-2", MessageStatus::Delivered);
    assert_eq!(harness.dispatcher.poll_deliveries().await.unwrap(), 2);
    assert_eq!(provider.poll_count(), 2);

    for _ in 0..10 {
        assert_eq!(harness.dispatcher.poll_deliveries().await.unwrap(), 0);
    }
    assert_eq!(provider.poll_count(), 2);

    let stats = harness.dispatcher.campaign_stats(id).await.unwrap();
    assert_eq!(stats.delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn test_messages_past_poll_age_are_skipped() {
    let harness = Harness::with_config(
        1,
        DispatchConfig {
            poll_max_age_secs: 0,
            ..support::dispatch_config()
        },
    );
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], PacingConfig::default());

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();
    harness.wait_for(id, CampaignStatus::Completed).await;

    provider.report("primary-1", MessageStatus::Delivered);
    assert_eq!(harness.dispatcher.poll_deliveries().await.unwrap(), 0);
    assert_eq!(provider.poll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_campaign_running() {
    let harness = Harness::new(3);
    let provider = MockProvider::new("primary", Outcome::Succeed);
    harness.sms(&[provider.clone()], paced(600_000));

    let id = harness.campaign("Hi").await;
    harness.dispatcher.start_campaign(id).await.unwrap();

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let dispatcher = harness.dispatcher.clone();
    let server = tokio::spawn(async move { dispatcher.serve(rx).await });

    harness.settle(Duration::from_secs(1)).await;
    tx.send(herald_common::Signal::Shutdown).unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(harness.status(id).await, CampaignStatus::Running);
    assert!(!harness.dispatcher.is_worker_active(id));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_preview_and_pacing_stats() {
    let harness = Harness::new(1);
    harness.sms(
        &[MockProvider::new("primary", Outcome::Succeed)],
        paced(250),
    );

    let mut variables = Variables::default();
    variables.insert("name".to_string(), "Ana".to_string());

    assert_eq!(
        harness
            .dispatcher
            .preview_message(Channel::Sms, "Hi {{ name }}{{missing}}!", &variables)
            .unwrap(),
        "Hi Ana!"
    );
    assert!(matches!(
        harness
            .dispatcher
            .preview_message(Channel::WhatsApp, "Hi", &variables),
        Err(DispatchError::ChannelUnavailable(Channel::WhatsApp))
    ));

    let stats = harness.dispatcher.pacing_stats(Channel::Sms).unwrap();
    assert_eq!(stats.concurrency, 1);
    assert_eq!(stats.in_flight, 0);
    assert!(stats.window_open);
}
