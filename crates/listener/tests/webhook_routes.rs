//! Route-level behaviour of the webhook receiver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use listener::{webhook_router, WebhookState};
use pipeline::{
    ChangeEvent, ChangedFile, ChangedFilesSource, EventQueue, FileStatus, LookupError,
    QueueError, RepositoryId, SourceId,
};
use serde_json::{json, Value};
use stages::{IngestionConfig, IngestionEndpoint, MemoryQueue};
use tower::ServiceExt;

struct StubFiles {
    fail: bool,
}

#[async_trait]
impl ChangedFilesSource for StubFiles {
    async fn changed_files(
        &self,
        repository: &RepositoryId,
        _source_id: SourceId,
    ) -> Result<Vec<ChangedFile>, LookupError> {
        assert_eq!(repository.as_str(), "octo/widgets");
        if self.fail {
            return Err(LookupError::Transport {
                message: "connection refused".into(),
            });
        }
        Ok(vec![
            ChangedFile::new("a.py", "added"),
            ChangedFile::new("a.py", "modified"),
        ])
    }
}

struct DownQueue;

#[async_trait]
impl EventQueue for DownQueue {
    async fn push(&self, _event: &ChangeEvent) -> Result<(), QueueError> {
        Err(QueueError::unavailable("connection refused"))
    }

    async fn pop(&self, _timeout: Duration) -> Result<Option<ChangeEvent>, QueueError> {
        Ok(None)
    }
}

fn router(queue: Arc<dyn EventQueue>, fail_lookup: bool) -> axum::Router {
    let endpoint = IngestionEndpoint::new(
        queue,
        Arc::new(StubFiles { fail: fail_lookup }),
        IngestionConfig {
            push_attempts: 1,
            ..IngestionConfig::default()
        },
    );
    webhook_router(WebhookState::new(Arc::new(endpoint)))
}

fn delivery(event: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn pull_request(action: &str, merged: bool) -> Value {
    let merged_at = if merged {
        json!("2024-05-01T12:00:00Z")
    } else {
        Value::Null
    };
    json!({
        "action": action,
        "number": 42,
        "pull_request": {
            "number": 42,
            "merged": merged,
            "merged_at": merged_at,
        },
        "repository": {"full_name": "octo/widgets"}
    })
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn merged_pull_request_is_queued() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = send(
        router(queue.clone(), false),
        delivery("pull_request", pull_request("closed", true)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "queued", "source_id": 42}));

    let event = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(event.source_id(), SourceId::new(42));
    assert_eq!(event.file_changes().len(), 2);
    assert_eq!(event.file_changes()[1].status, FileStatus::Modified);
}

#[tokio::test]
async fn closed_without_merge_is_ignored() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = send(
        router(queue.clone(), false),
        delivery("pull_request", pull_request("closed", false)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["reason"], "ignored-event-type");
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn non_pull_request_event_is_ignored_without_parsing_body() {
    let queue = Arc::new(MemoryQueue::new());
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-github-event", "push")
        .body(Body::from("not even json"))
        .unwrap();

    let (status, body) = send(router(queue.clone(), false), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn lookup_failure_still_answers_ok() {
    let queue = Arc::new(MemoryQueue::new());
    let (status, body) = send(
        router(queue.clone(), true),
        delivery("pull_request", pull_request("closed", true)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "upstream-lookup-failed");
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn queue_outage_is_service_unavailable() {
    let (status, body) = send(
        router(Arc::new(DownQueue), false),
        delivery("pull_request", pull_request("closed", true)),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "queue-unavailable");
}

#[tokio::test]
async fn missing_event_header_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(router(Arc::new(MemoryQueue::new()), false), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid");
}

#[tokio::test]
async fn malformed_pull_request_body_is_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("x-github-event", "pull_request")
        .body(Body::from("{\"action\": "))
        .unwrap();

    let (status, _) = send(router(Arc::new(MemoryQueue::new()), false), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(Arc::new(MemoryQueue::new()), false), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}
