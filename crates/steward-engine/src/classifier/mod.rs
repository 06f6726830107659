//! Intent classification.
//!
//! Free text is turned into an [`Intent`] by asking the completion service
//! for a JSON object, repairing it if needed and validating it against the
//! registry. Each attempt is audited with its latency. Classification never
//! fails: after the last attempt the result is the `unknown` intent.

pub mod prompt;
pub mod repair;

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use steward_audit::AuditLogger;
use steward_core::{ClassifierConfig, Intent, UNKNOWN_ACTION};

use crate::error::ClassificationError;
use crate::ports::{CompletionClient, Prompt};
use crate::registry::ActionRegistry;

pub struct Classifier {
    client: Arc<dyn CompletionClient>,
    registry: Arc<ActionRegistry>,
    audit: Arc<AuditLogger>,
    config: ClassifierConfig,
    system_prompt: String,
}

impl Classifier {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: Arc<ActionRegistry>,
        audit: Arc<AuditLogger>,
        config: ClassifierConfig,
    ) -> Self {
        let system_prompt = prompt::system_prompt(&registry);
        Self {
            client,
            registry,
            audit,
            config,
            system_prompt,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Classify `text` for `user_id`. Retries with linear backoff, then falls
    /// back to `unknown`.
    pub async fn classify(&self, text: &str, user_id: &str, correlation_id: &str) -> Intent {
        let prompt = Prompt {
            system: self.system_prompt.clone(),
            user: text.to_string(),
        };
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.backoff_ms * u64::from(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let start = Instant::now();
            let result = self.attempt(&prompt, text).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(intent) => {
                    tracing::info!(
                        user_id = %user_id,
                        attempt,
                        duration_ms,
                        action = %intent.action,
                        need_confirm = intent.need_confirm,
                        "Classified message"
                    );
                    self.audit
                        .log_classification_attempt(
                            user_id,
                            attempt,
                            duration_ms,
                            Some(&intent.action),
                            None,
                            correlation_id,
                        )
                        .await;
                    return intent;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        attempt,
                        duration_ms,
                        error = %e,
                        "Classification attempt failed"
                    );
                    self.audit
                        .log_classification_attempt(
                            user_id,
                            attempt,
                            duration_ms,
                            None,
                            Some(&e.to_string()),
                            correlation_id,
                        )
                        .await;
                }
            }
        }

        tracing::warn!(user_id = %user_id, attempts, "Classification exhausted; using fallback");
        Intent::unknown(text)
    }

    async fn attempt(&self, prompt: &Prompt, text: &str) -> Result<Intent, ClassificationError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let raw = tokio::time::timeout(timeout, self.client.complete(prompt))
            .await
            .map_err(|_| ClassificationError::Timeout {
                ms: self.config.timeout_ms,
            })??;

        let value = repair::parse_completion(&raw)?;
        let mut intent = self.validate(value, text)?;
        intent.raw_source = Some(raw);
        Ok(intent)
    }

    /// Check shape, registry membership and parameter schema.
    fn validate(&self, value: Value, text: &str) -> Result<Intent, ClassificationError> {
        let Value::Object(mut object) = value else {
            return Err(ClassificationError::Invalid("not an object".to_string()));
        };

        let action = match object.remove("action") {
            Some(Value::String(action)) if !action.trim().is_empty() => action.trim().to_string(),
            Some(_) => {
                return Err(ClassificationError::Invalid(
                    "action must be a non-empty string".to_string(),
                ));
            }
            None => return Err(ClassificationError::Invalid("missing action".to_string())),
        };

        let mut params = match object.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => {
                return Err(ClassificationError::Invalid(
                    "params must be an object".to_string(),
                ));
            }
        };

        let need_confirm = match object.remove("needConfirm") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => b,
            Some(_) => {
                return Err(ClassificationError::Invalid(
                    "needConfirm must be a boolean".to_string(),
                ));
            }
        };

        let Some(descriptor) = self.registry.get(&action) else {
            return Err(ClassificationError::UnknownAction(action));
        };

        if action == UNKNOWN_ACTION {
            params
                .entry("originalText")
                .or_insert_with(|| Value::String(text.to_string()));
        }

        self.registry
            .validate_params(&action, &params)
            .map_err(|reason| ClassificationError::Schema {
                action: action.clone(),
                reason,
            })?;

        // Confirmation rules come from the registry, not from the model.
        let need_confirm = need_confirm || descriptor.destructive;
        Ok(Intent::new(action, params, need_confirm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::standard_registry;
    use crate::ports::CompletionError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use steward_audit::{AuditEntryKind, AuditFilter};
    use steward_core::{AuditConfig, SystemClock};
    use steward_store::MemoryStore;

    /// Returns scripted outputs in order; errors once the script runs out.
    struct Scripted {
        outputs: Mutex<VecDeque<Result<String, CompletionError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outputs: Vec<Result<&str, CompletionError>>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into_iter().map(|o| o.map(String::from)).collect()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
            *self.calls.lock().unwrap() += 1;
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Request("script exhausted".into())))
        }
    }

    fn classifier(client: Arc<Scripted>) -> (Classifier, Arc<AuditLogger>) {
        classifier_with_backoff(client, 0)
    }

    fn classifier_with_backoff(
        client: Arc<Scripted>,
        backoff_ms: u64,
    ) -> (Classifier, Arc<AuditLogger>) {
        let audit = Arc::new(
            AuditLogger::new(
                AuditConfig::default(),
                Arc::new(MemoryStore::new()),
                SystemClock::shared(),
            )
            .unwrap(),
        );
        let config = ClassifierConfig {
            backoff_ms,
            ..Default::default()
        };
        let classifier = Classifier::new(
            client,
            Arc::new(standard_registry().unwrap()),
            audit.clone(),
            config,
        );
        (classifier, audit)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_back_off_linearly_then_fall_back() {
        let client = Arc::new(Scripted::new(vec![
            Err(CompletionError::Request("down".into())),
            Err(CompletionError::Request("down".into())),
            Err(CompletionError::Request("down".into())),
        ]));
        let (classifier, _) = classifier_with_backoff(client.clone(), 1000);

        let started = tokio::time::Instant::now();
        let intent = classifier.classify("show orders", "1", "c").await;
        let waited = started.elapsed();

        // 1s before the second attempt, 2s before the third.
        assert!(waited >= Duration::from_secs(3), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(4), "waited {:?}", waited);
        assert!(intent.is_unknown());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_destructive_action_forces_confirmation() {
        let client = Arc::new(Scripted::new(vec![Ok(
            r#"{"action":"delete_product","params":{"productId":"42"},"needConfirm":false}"#,
        )]));
        let (classifier, _) = classifier(client.clone());

        let intent = classifier.classify("delete product 42", "1", "c").await;
        assert_eq!(intent.action, "delete_product");
        assert_eq!(intent.params["productId"], "42");
        assert!(intent.need_confirm);
        assert!(intent.raw_source.is_some());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_repaired_output_accepted() {
        let client = Arc::new(Scripted::new(vec![Ok(
            "```json\n{action: 'list_orders', params: {limit: 5,},}\n```",
        )]));
        let (classifier, _) = classifier(client);

        let intent = classifier.classify("last five orders", "1", "c").await;
        assert_eq!(intent.action, "list_orders");
        assert_eq!(intent.params["limit"], json!(5));
        assert!(!intent.need_confirm);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let client = Arc::new(Scripted::new(vec![
            Err(CompletionError::Status { status: 503 }),
            Ok("not json at all"),
            Ok(r#"{"action":"help"}"#),
        ]));
        let (classifier, audit) = classifier(client.clone());

        let intent = classifier.classify("what can you do", "1", "c").await;
        assert_eq!(intent.action, "help");
        assert_eq!(client.calls(), 3);

        let attempts = audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::ClassificationAttempt),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts.iter().filter(|e| e.success).count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fall_back_to_unknown() {
        let client = Arc::new(Scripted::new(vec![
            Ok(r#"{"action":"teleport","params":{}}"#),
            Ok(r#"{"action":"update_price","params":{"productId":"1","price":"cheap"}}"#),
            Ok(r#"{"action":42}"#),
        ]));
        let (classifier, _) = classifier(client.clone());

        let intent = classifier.classify("make it cheap", "1", "c").await;
        assert_eq!(intent, Intent::unknown("make it cheap"));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_keeps_original_text() {
        let client = Arc::new(Scripted::new(vec![Ok(r#"{"action":"unknown"}"#)]));
        let (classifier, _) = classifier(client);

        let intent = classifier.classify("hello there", "1", "c").await;
        assert!(intent.is_unknown());
        assert_eq!(intent.params["originalText"], "hello there");
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let client = Arc::new(Scripted::new(vec![]));
        let (classifier, _) = classifier(client);

        for bad in [
            json!([1, 2]),
            json!({"params": {}}),
            json!({"action": "help", "params": []}),
            json!({"action": "help", "needConfirm": "yes"}),
        ] {
            assert!(matches!(
                classifier.validate(bad, "x"),
                Err(ClassificationError::Invalid(_))
            ));
        }
    }
}
