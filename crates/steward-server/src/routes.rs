//! Webhook transport.
//!
//! `POST /webhook` takes one [`InboundEvent`] and answers with the engine's
//! [`Reply`]. When an outbound chat API is configured, the reply is also
//! delivered through it. `POST /maintenance/sweep` runs one sweep. Both
//! require [`SECRET_HEADER`] when a secret is configured.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use steward_core::{InboundEvent, Reply};
use steward_engine::{Engine, ReplySink, deliver};
use tower_http::trace::TraceLayer;

/// Header carrying the shared webhook secret.
pub const SECRET_HEADER: &str = "x-steward-secret";

/// Shared handler state.
pub struct AppState {
    pub engine: Engine,
    pub replies: Option<Arc<dyn ReplySink>>,
    pub webhook_secret: Option<String>,
}

/// Build the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/maintenance/sweep", post(handle_sweep))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        tracing::warn!(user_id = %event.user_id, "Webhook call with a bad secret");
        return unauthorized();
    }

    let reply = state.engine.handle(&event).await;

    if let Some(sink) = &state.replies {
        if let Err(e) = deliver(sink.as_ref(), &event.chat_id, &reply).await {
            tracing::error!(
                user_id = %event.user_id,
                chat_id = %event.chat_id,
                error = %e,
                "Failed to deliver reply"
            );
        }
    }

    (StatusCode::OK, Json(reply_body(&reply)))
}

/// Whether the request carries the shared secret, when one is configured.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.webhook_secret {
        Some(secret) => {
            headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) == Some(secret.as_str())
        }
        None => true,
    }
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
}

fn reply_body(reply: &Reply) -> serde_json::Value {
    serde_json::to_value(reply).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize reply");
        json!({ "type": "text", "text": "" })
    })
}

async fn handle_sweep(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        tracing::warn!("Sweep call with a bad secret");
        return unauthorized();
    }

    match state.engine.sweep().await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => {
            tracing::error!(error = %e, "Maintenance sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "sweep failed" })),
            )
        }
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "steward",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Map, Value};
    use steward_audit::AuditLogger;
    use steward_core::{StewardConfig, SystemClock};
    use steward_engine::{
        CompletionClient, CompletionError, DomainError, DomainService, EngineDeps, EntityRef,
        Prompt,
    };
    use steward_store::MemoryStore;
    use tower::ServiceExt;

    struct NoCompletion;

    #[async_trait]
    impl CompletionClient for NoCompletion {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
            Err(CompletionError::Request("offline".into()))
        }
    }

    struct NoDomain;

    #[async_trait]
    impl DomainService for NoDomain {
        async fn create_entity(&self, _kind: &str, _payload: &Value) -> Result<EntityRef, DomainError> {
            Err(DomainError::Unavailable("offline".into()))
        }

        async fn invoke(&self, _action: &str, _params: &Map<String, Value>) -> Result<Value, DomainError> {
            Err(DomainError::Unavailable("offline".into()))
        }
    }

    fn app(secret: Option<&str>) -> Router {
        let config = StewardConfig::default();
        let store = Arc::new(MemoryStore::new());
        let clock = SystemClock::shared();
        let audit = Arc::new(AuditLogger::new(config.audit.clone(), store.clone(), clock.clone()).unwrap());
        let engine = Engine::new(
            &config,
            EngineDeps {
                store,
                audit,
                completion: Arc::new(NoCompletion),
                domain: Arc::new(NoDomain),
                clock,
            },
        )
        .unwrap();

        create_router(Arc::new(AppState {
            engine,
            replies: None,
            webhook_secret: secret.map(String::from),
        }))
    }

    fn webhook(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const HELP_EVENT: &str = r#"{
        "userId": "7", "chatId": "7", "messageId": "1",
        "kind": "text", "payload": "/help",
        "timestamp": "2026-03-02T09:00:00Z"
    }"#;

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_returns_reply() {
        let response = app(None).oneshot(webhook(HELP_EVENT, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["type"], "text");
        assert!(reply["text"].as_str().unwrap().contains("/orders"));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_secret() {
        let response = app(Some("s3cret"))
            .oneshot(webhook(HELP_EVENT, Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("s3cret"))
            .oneshot(webhook(HELP_EVENT, Some("s3cret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn sweep(secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/maintenance/sweep");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_endpoint() {
        let response = app(None).oneshot(sweep(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["confirmations"], 0);
    }

    #[tokio::test]
    async fn test_sweep_requires_secret() {
        for presented in [None, Some("wrong")] {
            let response = app(Some("s3cret")).oneshot(sweep(presented)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app(Some("s3cret")).oneshot(sweep(Some("s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
