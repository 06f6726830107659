//! Action dispatch.
//!
//! Every action, whether classified, quick-command or wizard commit, runs
//! through [`Dispatcher::run`]: an "attempted" audit entry, the handler under
//! panic isolation, then a success or failure entry with latency. A failing
//! handler yields [`Dispatch::Failed`] and nothing else; the caller turns that
//! into a generic message.

use futures::FutureExt;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use steward_audit::AuditLogger;
use steward_core::ActionCategory;

use crate::error::HandlerError;
use crate::ports::{DomainError, DomainService, EntityRef};
use crate::registry::{ActionOutput, ActionRegistry};

/// Result of a dispatch as seen by the conversation engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<T = ActionOutput> {
    Completed(T),
    /// The handler failed or panicked. Details are in the audit log.
    Failed,
}

/// What a handler can reach.
pub struct HandlerContext<'a> {
    pub user_id: &'a str,
    pub chat_id: &'a str,
    pub registry: &'a ActionRegistry,
    pub audit: &'a AuditLogger,
    domain: &'a dyn DomainService,
    domain_timeout: Duration,
}

impl HandlerContext<'_> {
    /// Run a domain-backed action under the domain timeout.
    pub async fn invoke(&self, action: &str, params: &Map<String, Value>) -> Result<Value, DomainError> {
        match tokio::time::timeout(self.domain_timeout, self.domain.invoke(action, params)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                ms: self.domain_timeout.as_millis() as u64,
            }),
        }
    }

    /// Create an entity under the domain timeout.
    pub async fn create_entity(&self, kind: &str, payload: &Value) -> Result<EntityRef, DomainError> {
        match tokio::time::timeout(self.domain_timeout, self.domain.create_entity(kind, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                ms: self.domain_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Runs handlers with uniform auditing and failure isolation.
pub struct Dispatcher {
    registry: Arc<ActionRegistry>,
    audit: Arc<AuditLogger>,
    domain: Arc<dyn DomainService>,
    domain_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ActionRegistry>,
        audit: Arc<AuditLogger>,
        domain: Arc<dyn DomainService>,
        domain_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            audit,
            domain,
            domain_timeout,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Handler context for a user.
    pub fn context<'a>(&'a self, user_id: &'a str, chat_id: &'a str) -> HandlerContext<'a> {
        HandlerContext {
            user_id,
            chat_id,
            registry: &self.registry,
            audit: &self.audit,
            domain: self.domain.as_ref(),
            domain_timeout: self.domain_timeout,
        }
    }

    /// Dispatch an action by name. Names missing from the registry go to the
    /// `unknown` handler. The confirmation gate has already run.
    pub async fn dispatch(
        &self,
        user_id: &str,
        chat_id: &str,
        action: &str,
        params: &Map<String, Value>,
        correlation_id: &str,
    ) -> Dispatch {
        let Some(descriptor) = self.registry.resolve(action) else {
            tracing::error!(action = %action, "No handler and no fallback registered");
            return Dispatch::Failed;
        };

        let meta = if descriptor.name == action {
            Value::Null
        } else {
            tracing::warn!(
                user_id = %user_id,
                requested = %action,
                fallback = %descriptor.name,
                "Action not registered; using fallback handler"
            );
            json!({ "requestedAction": action })
        };

        let ctx = self.context(user_id, chat_id);
        self.execute(
            user_id,
            &descriptor.name,
            descriptor.category,
            params,
            meta,
            correlation_id,
            descriptor.handler.handle(&ctx, params),
        )
        .await
    }

    /// Run a unit of work as an audited action.
    pub async fn run<T, F>(
        &self,
        user_id: &str,
        action: &str,
        category: ActionCategory,
        params: &Map<String, Value>,
        correlation_id: &str,
        work: F,
    ) -> Dispatch<T>
    where
        F: Future<Output = Result<T, HandlerError>>,
    {
        self.execute(user_id, action, category, params, Value::Null, correlation_id, work)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute<T, F>(
        &self,
        user_id: &str,
        action: &str,
        category: ActionCategory,
        params: &Map<String, Value>,
        meta: Value,
        correlation_id: &str,
        work: F,
    ) -> Dispatch<T>
    where
        F: Future<Output = Result<T, HandlerError>>,
    {
        let params_value = Value::Object(params.clone());
        self.audit
            .log_action_attempted(user_id, action, category, &params_value, meta, correlation_id)
            .await;

        let start = Instant::now();
        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::info!(
                    user_id = %user_id,
                    action = %action,
                    duration_ms,
                    "Action completed"
                );
                self.audit
                    .log_action_succeeded(user_id, action, category, duration_ms, correlation_id)
                    .await;
                Dispatch::Completed(output)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    action = %action,
                    duration_ms,
                    error = %e,
                    "Action failed"
                );
                self.audit
                    .log_action_failed(
                        user_id,
                        action,
                        category,
                        duration_ms,
                        &e.to_string(),
                        &params_value,
                        correlation_id,
                    )
                    .await;
                Dispatch::Failed
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ActionDescriptor, ActionHandler};
    use async_trait::async_trait;
    use steward_audit::{AuditEntryKind, AuditFilter};
    use steward_core::{AuditConfig, Reply, SystemClock, UNKNOWN_ACTION};
    use steward_store::MemoryStore;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(
            &self,
            ctx: &HandlerContext<'_>,
            _params: &Map<String, Value>,
        ) -> Result<ActionOutput, HandlerError> {
            Ok(ActionOutput::Reply(Reply::text(format!("hi {}", ctx.user_id))))
        }
    }

    struct Panics;

    #[async_trait]
    impl ActionHandler for Panics {
        async fn handle(
            &self,
            _ctx: &HandlerContext<'_>,
            _params: &Map<String, Value>,
        ) -> Result<ActionOutput, HandlerError> {
            panic!("handler bug");
        }
    }

    struct Fails;

    #[async_trait]
    impl ActionHandler for Fails {
        async fn handle(
            &self,
            _ctx: &HandlerContext<'_>,
            _params: &Map<String, Value>,
        ) -> Result<ActionOutput, HandlerError> {
            Err(HandlerError::Domain(DomainError::Unavailable("db down".into())))
        }
    }

    struct NoDomain;

    #[async_trait]
    impl DomainService for NoDomain {
        async fn create_entity(&self, _kind: &str, _payload: &Value) -> Result<EntityRef, DomainError> {
            Err(DomainError::Unavailable("test".into()))
        }

        async fn invoke(&self, _action: &str, _params: &Map<String, Value>) -> Result<Value, DomainError> {
            Err(DomainError::Unavailable("test".into()))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<AuditLogger>) {
        let mut registry = ActionRegistry::new();
        for (name, handler) in [
            ("echo", Arc::new(Echo) as Arc<dyn ActionHandler>),
            ("boom", Arc::new(Panics)),
            ("fails", Arc::new(Fails)),
            (UNKNOWN_ACTION, Arc::new(Echo)),
        ] {
            registry
                .register(ActionDescriptor::new(name, ActionCategory::System, handler))
                .unwrap();
        }

        let audit = Arc::new(
            AuditLogger::new(
                AuditConfig::default(),
                Arc::new(MemoryStore::new()),
                SystemClock::shared(),
            )
            .unwrap(),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            audit.clone(),
            Arc::new(NoDomain),
            Duration::from_secs(1),
        );
        (dispatcher, audit)
    }

    #[tokio::test]
    async fn test_dispatch_audits_attempt_and_success() {
        let (dispatcher, audit) = dispatcher();
        let result = dispatcher.dispatch("7", "7", "echo", &Map::new(), "c1").await;
        assert_eq!(result, Dispatch::Completed(ActionOutput::Reply(Reply::text("hi 7"))));

        let entries = audit.query(AuditFilter::default()).await.unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&AuditEntryKind::ActionAttempted));
        assert!(kinds.contains(&AuditEntryKind::ActionSucceeded));
        assert!(entries.iter().all(|e| e.correlation_id.as_deref() == Some("c1")));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let (dispatcher, audit) = dispatcher();

        assert_eq!(
            dispatcher.dispatch("7", "7", "boom", &Map::new(), "c1").await,
            Dispatch::Failed
        );
        // Unrelated dispatches keep working.
        assert!(matches!(
            dispatcher.dispatch("8", "8", "echo", &Map::new(), "c2").await,
            Dispatch::Completed(_)
        ));

        let failures = audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::ActionFailed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.as_deref().unwrap().contains("handler bug"));
    }

    #[tokio::test]
    async fn test_handler_error_logged_with_params() {
        let (dispatcher, audit) = dispatcher();
        let params = serde_json::json!({"orderId": "3"}).as_object().cloned().unwrap();
        assert_eq!(
            dispatcher.dispatch("7", "7", "fails", &params, "c1").await,
            Dispatch::Failed
        );

        let failures = audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::ActionFailed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures[0].params.as_ref().unwrap()["orderId"], "3");
        assert!(!failures[0].success);
    }

    #[tokio::test]
    async fn test_unregistered_action_goes_to_fallback() {
        let (dispatcher, audit) = dispatcher();
        let result = dispatcher.dispatch("7", "7", "teleport", &Map::new(), "c1").await;
        assert!(matches!(result, Dispatch::Completed(_)));

        let entries = audit.query(AuditFilter::default()).await.unwrap();
        assert!(entries.iter().all(|e| e.action == UNKNOWN_ACTION));

        let attempted = audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::ActionAttempted),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(attempted.len(), 1);
        assert_eq!(attempted[0].meta["requestedAction"], "teleport");
    }

    #[tokio::test]
    async fn test_registered_action_has_no_requested_name() {
        let (dispatcher, audit) = dispatcher();
        dispatcher.dispatch("7", "7", "echo", &Map::new(), "c1").await;

        let attempted = audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::ActionAttempted),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(attempted[0].meta.is_null());
    }
}
