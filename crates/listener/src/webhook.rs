//! HTTP receiver for GitHub webhook deliveries.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline::{
    DeliveryId, InboundNotification, RejectReason, Rejection, RepositoryId, SourceId, Timestamp,
};
use serde::{Deserialize, Serialize};
use stages::{Accepted, IngestionEndpoint};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";
const PULL_REQUEST_EVENT: &str = "pull_request";

/// Shared state of the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    endpoint: Arc<IngestionEndpoint>,
}

impl WebhookState {
    /// Wraps the endpoint that accepted deliveries are handed to.
    pub fn new(endpoint: Arc<IngestionEndpoint>) -> Self {
        Self { endpoint }
    }
}

/// Builds the receiver routes: `POST /webhook` and `GET /healthz`.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `addr` until `shutdown` resolves, then drains in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Webhook receiver listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The subset of a `pull_request` delivery the receiver reads.
#[derive(Debug, Deserialize)]
struct PullRequestDelivery {
    action: Option<String>,
    pull_request: Option<PullRequestBody>,
    repository: Option<RepositoryBody>,
}

#[derive(Debug, Deserialize)]
struct PullRequestBody {
    number: Option<u64>,
    merged: Option<bool>,
    merged_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    full_name: Option<String>,
}

impl PullRequestDelivery {
    fn into_notification(self, delivery_id: Option<DeliveryId>) -> InboundNotification {
        let pull_request = self.pull_request;
        InboundNotification {
            event_type: PULL_REQUEST_EVENT.to_string(),
            action: self.action,
            merged: pull_request
                .as_ref()
                .and_then(|pr| pr.merged)
                .unwrap_or(false),
            source_id: pull_request
                .as_ref()
                .and_then(|pr| pr.number)
                .map(SourceId::new),
            repository: self
                .repository
                .and_then(|repo| repo.full_name)
                .and_then(RepositoryId::new),
            merged_at: pull_request
                .and_then(|pr| pr.merged_at)
                .and_then(|at| Timestamp::parse_rfc3339(&at)),
            delivery_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_id: Option<u64>,
}

impl WebhookResponse {
    fn queued(accepted: Accepted) -> (StatusCode, Self) {
        (
            StatusCode::OK,
            Self {
                status: "queued",
                reason: None,
                detail: None,
                source_id: Some(accepted.source_id.as_u64()),
            },
        )
    }

    fn rejected(rejection: Rejection) -> (StatusCode, Self) {
        let (code, status) = match rejection.reason {
            RejectReason::IgnoredEventType => (StatusCode::OK, "ignored"),
            RejectReason::InvalidPayload
            | RejectReason::UpstreamLookupFailed
            | RejectReason::InvalidFileChange => (StatusCode::OK, "rejected"),
            RejectReason::QueueUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "error"),
        };
        (
            code,
            Self {
                status,
                reason: Some(rejection.reason.code()),
                detail: Some(rejection.detail),
                source_id: None,
            },
        )
    }

    fn bad_request(detail: impl Into<String>) -> (StatusCode, Self) {
        (
            StatusCode::BAD_REQUEST,
            Self {
                status: "invalid",
                reason: None,
                detail: Some(detail.into()),
                source_id: None,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(event_type) = header_value(&headers, EVENT_HEADER) else {
        let (code, body) = WebhookResponse::bad_request("missing X-GitHub-Event header");
        return (code, Json(body)).into_response();
    };
    let delivery_id = header_value(&headers, DELIVERY_HEADER).and_then(DeliveryId::new);

    let notification = if event_type == PULL_REQUEST_EVENT {
        match serde_json::from_slice::<PullRequestDelivery>(&body) {
            Ok(delivery) => delivery.into_notification(delivery_id),
            Err(err) => {
                warn!(error = %err, "Unparseable pull_request delivery");
                let (code, body) =
                    WebhookResponse::bad_request(format!("invalid pull_request payload: {err}"));
                return (code, Json(body)).into_response();
            }
        }
    } else {
        // Other event types are filtered by the endpoint without reading the body.
        InboundNotification {
            event_type,
            delivery_id,
            ..InboundNotification::default()
        }
    };

    let (code, body) = match state.endpoint.accept(notification).await {
        Ok(accepted) => WebhookResponse::queued(accepted),
        Err(rejection) => WebhookResponse::rejected(rejection),
    };
    (code, Json(body)).into_response()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
