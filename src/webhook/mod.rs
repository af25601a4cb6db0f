//! Inbound messaging webhook.
//!
//! Endpoints:
//! - `POST /webhook`: provider callback carrying one or more messages
//! - `GET /health`: liveness check
//!
//! The credential header is checked before the body is parsed. Responses:
//! `401` for a bad credential, `400` for a malformed payload, `500` for
//! anything unexpected, otherwise `200` with one outcome per message.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::router::{EventRouter, InboundEvent, RouteOutcome};

/// Provider payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    /// Provider message id.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub from: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub text: String,
}

impl WebhookEnvelope {
    /// Structural checks that do not need storage.
    pub fn validate(&self) -> Result<(), String> {
        for (index, message) in self.messages.iter().enumerate() {
            if message.id.trim().is_empty() {
                return Err(format!("messages[{index}].id is empty"));
            }
            if message.from.trim().is_empty() {
                return Err(format!("messages[{index}].from is empty"));
            }
        }
        Ok(())
    }
}

impl WebhookMessage {
    pub fn into_event(self, received_at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            message_id: self.id,
            event_type: self.event_type,
            sender: self.from,
            from_self: self.from_me,
            text: self.text,
            received_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookResponse {
    results: Vec<MessageResult>,
}

#[derive(Debug, Serialize)]
struct MessageResult {
    id: String,
    #[serde(flatten)]
    outcome: RouteOutcome,
}

#[derive(Clone)]
struct WebhookState {
    router: Arc<EventRouter>,
    /// `None` when no secret is configured; every request is refused then.
    secret_digest: Option<[u8; 32]>,
    header: Arc<str>,
}

impl WebhookState {
    /// Constant-time check of the credential header.
    ///
    /// Both sides are hashed first so the comparison length is fixed.
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.secret_digest else {
            return false;
        };
        let Some(offered) = headers.get(&*self.header) else {
            return false;
        };
        let offered: [u8; 32] = Sha256::digest(offered.as_bytes()).into();
        offered[..].ct_eq(&expected[..]).into()
    }
}

/// Build the axum router (separated for testing).
pub fn router(events: Arc<EventRouter>, config: &WebhookConfig) -> Router {
    let secret_digest: Option<[u8; 32]> = if config.secret.is_empty() {
        warn!("No webhook secret configured, every webhook call will be refused");
        None
    } else {
        Some(Sha256::digest(config.secret.as_bytes()).into())
    };
    let state = WebhookState {
        router: events,
        secret_digest,
        header: Arc::from(config.header.to_lowercase()),
    };

    Router::new()
        .route("/webhook", post(receive))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(
    app: Router,
    address: &str,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "Webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.authorized(&headers) {
        warn!("Webhook call with missing or invalid credential");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response();
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            return bad_request(format!("invalid payload: {e}"));
        }
    };
    if let Err(reason) = envelope.validate() {
        warn!(reason = %reason, "Invalid webhook payload");
        return bad_request(reason);
    }

    // A failed message releases its id and stops the batch. Messages already
    // handled come back as duplicates when the provider retries.
    let received_at = Utc::now();
    let mut results = Vec::with_capacity(envelope.messages.len());
    for message in envelope.messages {
        let id = message.id.clone();
        match state.router.handle(message.into_event(received_at)).await {
            Ok(outcome) => results.push(MessageResult { id, outcome }),
            Err(e) => {
                error!(message_id = %id, error = %e, "Failed to process inbound message");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response();
            }
        }
    }

    (StatusCode::OK, Json(WebhookResponse { results })).into_response()
}

fn bad_request(reason: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
}
