//! Webhook HTTP server

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use herald_common::{MessageStatus, Signal, incoming};
use herald_dispatch::{Dispatcher, ReconcileOutcome};
use herald_provider::DeliveryReport;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::{HealthChecker, WebhookConfig, WebhookError};

#[derive(Debug, Clone)]
struct AppState {
    dispatcher: Dispatcher,
    health: Arc<HealthChecker>,
}

/// Provider-neutral delivery event accepted on `POST /events`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryEvent {
    pub provider_message_id: String,
    pub status: MessageStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// How the events of one request were applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub applied: usize,
    pub ignored: usize,
    pub unknown: usize,
}

impl IngestSummary {
    const fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Applied => self.applied += 1,
            ReconcileOutcome::Ignored => self.ignored += 1,
            ReconcileOutcome::Unknown => self.unknown += 1,
        }
    }
}

/// Build the ingress router.
///
/// - `POST /webhooks/{provider}`: payload parsed by the named provider's adapter
/// - `POST /events`: a [`DeliveryEvent`] as JSON
/// - `GET /health/live` and `GET /health/ready`
pub fn router(
    config: &WebhookConfig,
    dispatcher: Dispatcher,
    health: Arc<HealthChecker>,
) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(provider_webhook))
        .route("/events", post(delivery_event))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(AppState { dispatcher, health })
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
}

/// Delivery webhook and probe server
pub struct WebhookServer {
    listener: TcpListener,
    router: Router,
}

impl WebhookServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: &WebhookConfig,
        dispatcher: Dispatcher,
        health: Arc<HealthChecker>,
    ) -> Result<Self, WebhookError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| WebhookError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Webhook server bound successfully"
        );

        Ok(Self {
            listener,
            router: router(config, dispatcher, health),
        })
    }

    /// Run until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), WebhookError> {
        tracing::info!("Webhook server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Webhook server received shutdown signal");
            })
            .await
            .map_err(|e| WebhookError::ServerError(e.to_string()))?;

        tracing::info!("Webhook server stopped");
        Ok(())
    }
}

async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    body: Bytes,
) -> Response {
    let Some(adapter) = state.dispatcher.provider(&provider) else {
        tracing::warn!(provider = %provider, "Webhook for unknown provider");
        return (StatusCode::NOT_FOUND, "Unknown provider").into_response();
    };

    let reports = match adapter.parse_webhook(&body) {
        Ok(reports) => reports,
        Err(error) => {
            tracing::warn!(provider = %provider, error = %error, "Rejected webhook payload");
            return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
        }
    };

    incoming!(
        level = DEBUG,
        "Webhook from {provider} carried {} reports",
        reports.len()
    );

    ingest(&state.dispatcher, &reports).await
}

async fn delivery_event(
    State(state): State<AppState>,
    Json(event): Json<DeliveryEvent>,
) -> Response {
    incoming!(
        level = DEBUG,
        "Delivery event {} for {}",
        event.status,
        event.provider_message_id
    );

    let report = DeliveryReport::new(event.provider_message_id, event.status, event.timestamp)
        .with_error(event.error);
    ingest(&state.dispatcher, &[report]).await
}

async fn ingest(dispatcher: &Dispatcher, reports: &[DeliveryReport]) -> Response {
    let mut summary = IngestSummary::default();

    for report in reports {
        match dispatcher.reconcile_report(report).await {
            Ok(outcome) => summary.record(outcome),
            Err(error) => {
                tracing::error!(
                    provider_message_id = %report.provider_message_id,
                    error = %error,
                    "Failed to reconcile delivery event"
                );
                return (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response();
            }
        }
    }

    (StatusCode::OK, Json(summary)).into_response()
}

async fn liveness_handler(State(state): State<AppState>) -> Response {
    if state.health.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn readiness_handler(State(state): State<AppState>) -> Response {
    let status = state.health.status();
    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            dispatcher_ready = status.dispatcher_ready,
            channels = status.channels.len(),
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}
