//! Conversation engine.
//!
//! One inbound event in, exactly one [`Reply`] out. Routing order:
//!
//! 1. operator allow-list
//! 2. active wizard (all input goes there, cancel accepted at any step)
//! 3. pending confirmation (yes resolves and dispatches, no declines,
//!    anything else drops it and continues)
//! 4. quick-command table
//! 5. non-text events get help
//! 6. rate limiter, classifier, then confirmation gate or dispatch
//!
//! Every route writes at least one audit entry.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use steward_audit::{AuditEntryKind, AuditLogger};
use steward_core::{
    ActionCategory, Button, EngineConfig, EventKind, InboundEvent, Intent, Reply, SharedClock,
    StewardConfig,
};
use steward_store::SharedStore;
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::confirmation::{
    CONFIRM_NO, CONFIRM_YES, ConfirmationGate, ConfirmationState, ReplyKind,
};
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{EngineError, HandlerError};
use crate::handlers::standard_registry;
use crate::messages;
use crate::ports::{CompletionClient, DomainService};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::registry::{ActionOutput, ActionRegistry};
use crate::wizard::{Versioned, WIZARD_CANCEL, WizardEngine, WizardTurn};

/// External collaborators the engine is wired to.
pub struct EngineDeps {
    pub store: SharedStore,
    pub audit: Arc<AuditLogger>,
    pub completion: Arc<dyn CompletionClient>,
    pub domain: Arc<dyn DomainService>,
    pub clock: SharedClock,
}

/// Counts from one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub confirmations: usize,
    pub rate_windows: usize,
    pub audit_entries: usize,
}

pub struct Engine {
    config: EngineConfig,
    confirmation_ttl_secs: i64,
    audit: Arc<AuditLogger>,
    limiter: RateLimiter,
    gate: ConfirmationGate,
    wizard: WizardEngine,
    classifier: Classifier,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Build the engine with the standard action registry.
    pub fn new(config: &StewardConfig, deps: EngineDeps) -> Result<Self, EngineError> {
        let registry = Arc::new(standard_registry()?);
        Ok(Self::with_registry(config, deps, registry))
    }

    /// Build the engine with a custom registry.
    pub fn with_registry(
        config: &StewardConfig,
        deps: EngineDeps,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        let EngineDeps {
            store,
            audit,
            completion,
            domain,
            clock,
        } = deps;

        Self {
            config: config.engine.clone(),
            confirmation_ttl_secs: config.confirmation.ttl_secs,
            limiter: RateLimiter::new(config.rate_limit.clone(), clock.clone()),
            gate: ConfirmationGate::new(&config.confirmation, store.clone(), clock.clone()),
            wizard: WizardEngine::new(config.wizard.clone(), store, audit.clone(), clock),
            classifier: Classifier::new(
                completion,
                registry.clone(),
                audit.clone(),
                config.classifier.clone(),
            ),
            dispatcher: Dispatcher::new(
                registry,
                audit.clone(),
                domain,
                Duration::from_millis(config.domain.timeout_ms),
            ),
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn registry(&self) -> &ActionRegistry {
        self.dispatcher.registry()
    }

    pub fn wizard(&self) -> &WizardEngine {
        &self.wizard
    }

    /// Handle one inbound event. Never fails: errors become a generic reply.
    pub async fn handle(&self, event: &InboundEvent) -> Reply {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::debug!(
            user_id = %event.user_id,
            message_id = %event.message_id,
            kind = ?event.kind,
            correlation_id = %correlation_id,
            "Inbound event"
        );

        match self.route(event, &correlation_id).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    user_id = %event.user_id,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to handle event"
                );
                let entry = self
                    .audit
                    .entry(
                        AuditEntryKind::ActionFailed,
                        &event.user_id,
                        "handle_event",
                        ActionCategory::System,
                    )
                    .error(e.to_string())
                    .correlation_id(&correlation_id)
                    .build();
                self.audit.append(entry).await;
                Reply::text(messages::GENERIC_FAILURE)
            }
        }
    }

    /// Drop expired confirmations, idle rate windows and old audit entries.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let report = SweepReport {
            confirmations: self.gate.sweep().await?,
            rate_windows: self.limiter.sweep(),
            audit_entries: self.audit.sweep_retention().await?,
        };
        tracing::info!(
            confirmations = report.confirmations,
            rate_windows = report.rate_windows,
            audit_entries = report.audit_entries,
            "Maintenance sweep finished"
        );
        Ok(report)
    }

    async fn route(&self, event: &InboundEvent, correlation_id: &str) -> Result<Reply, EngineError> {
        let user_id = event.user_id.as_str();

        if !self.config.is_admin(user_id) {
            tracing::warn!(user_id = %user_id, "Event from user outside the allow-list");
            self.audit.log_authorization_denied(user_id).await;
            return Ok(Reply::text(messages::NOT_AUTHORIZED));
        }

        match self.wizard.handle(event, correlation_id).await? {
            WizardTurn::Inactive => {}
            WizardTurn::Reply(reply) => return Ok(reply),
            WizardTurn::Cancelled => return Ok(Reply::text(messages::CANCELLED)),
            WizardTurn::Commit(state) => return Ok(self.commit(event, state, correlation_id).await),
        }

        if let Some(reply) = self.confirmation_turn(event, correlation_id).await? {
            return Ok(reply);
        }

        if let Some(text) = event.text_payload() {
            if let Some(descriptor) = self.registry().quick_command(text) {
                tracing::debug!(user_id = %user_id, action = %descriptor.name, "Quick command");
                let intent = Intent::new(descriptor.name.clone(), Map::new(), descriptor.destructive);
                return self.execute(event, intent, correlation_id).await;
            }
        }

        let Some(text) = event.text_payload().filter(|t| !t.is_empty()) else {
            return self.run_action(event, "help", &Map::new(), correlation_id).await;
        };

        if let RateDecision::Denied { reset_in_secs } = self.limiter.allow(user_id) {
            self.audit.log_rate_limited(user_id, reset_in_secs).await;
            return Ok(Reply::text(messages::rate_limited(reset_in_secs)));
        }

        let intent = self.classifier.classify(text, user_id, correlation_id).await;
        self.execute(event, intent, correlation_id).await
    }

    /// Handle the event as an answer to a pending confirmation, if it is one.
    async fn confirmation_turn(
        &self,
        event: &InboundEvent,
        correlation_id: &str,
    ) -> Result<Option<Reply>, EngineError> {
        let input = match event.kind {
            EventKind::Callback => Some(event.payload.trim()),
            _ => event.text_payload(),
        };
        let Some(input) = input else {
            return Ok(None);
        };
        let user_id = event.user_id.as_str();
        let answer = self.gate.classify_reply(input);

        let pending = match self.gate.state(user_id).await? {
            ConfirmationState::Awaiting(pending) => pending,
            ConfirmationState::Idle => {
                // A button from a confirmation that is already gone.
                if event.kind == EventKind::Callback && matches!(input, CONFIRM_YES | CONFIRM_NO) {
                    self.record_confirmation(
                        AuditEntryKind::ConfirmationCancelled,
                        user_id,
                        "confirm",
                        None,
                        Some("expired"),
                        correlation_id,
                    )
                    .await;
                    return Ok(Some(as_edit(event, Reply::text(messages::CONFIRM_EXPIRED))));
                }
                return Ok(None);
            }
        };

        match answer {
            ReplyKind::Affirmative => {
                let Some(confirmation) = self.gate.resolve(user_id).await? else {
                    self.record_confirmation(
                        AuditEntryKind::ConfirmationCancelled,
                        user_id,
                        &pending.action,
                        Some(&pending.id),
                        Some("expired"),
                        correlation_id,
                    )
                    .await;
                    return Ok(Some(as_edit(event, Reply::text(messages::CONFIRM_EXPIRED))));
                };

                self.record_confirmation(
                    AuditEntryKind::ConfirmationResolved,
                    user_id,
                    &confirmation.action,
                    Some(&confirmation.id),
                    None,
                    correlation_id,
                )
                .await;
                let reply = self
                    .run_action(event, &confirmation.action, &confirmation.params, correlation_id)
                    .await?;
                Ok(Some(as_edit(event, reply)))
            }
            ReplyKind::Negative => {
                self.gate.cancel_all(user_id).await?;
                tracing::info!(user_id = %user_id, action = %pending.action, "Confirmation declined");
                self.record_confirmation(
                    AuditEntryKind::ConfirmationCancelled,
                    user_id,
                    &pending.action,
                    Some(&pending.id),
                    None,
                    correlation_id,
                )
                .await;
                Ok(Some(as_edit(event, Reply::text(messages::CONFIRM_DECLINED))))
            }
            ReplyKind::Other => {
                // The operator moved on; the pending action must not linger.
                self.gate.cancel_all(user_id).await?;
                tracing::info!(user_id = %user_id, action = %pending.action, "Confirmation superseded");
                self.record_confirmation(
                    AuditEntryKind::ConfirmationCancelled,
                    user_id,
                    &pending.action,
                    Some(&pending.id),
                    Some("superseded by a new message"),
                    correlation_id,
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Gate or dispatch an intent.
    async fn execute(
        &self,
        event: &InboundEvent,
        intent: Intent,
        correlation_id: &str,
    ) -> Result<Reply, EngineError> {
        let destructive = self
            .registry()
            .get(&intent.action)
            .is_some_and(|d| d.destructive);

        if !(intent.need_confirm || destructive) {
            return self
                .run_action(event, &intent.action, &intent.params, correlation_id)
                .await;
        }

        let confirmation = self
            .gate
            .request(&event.user_id, &intent.action, intent.params.clone())
            .await?;
        let entry = self
            .audit
            .entry(
                AuditEntryKind::ConfirmationRequested,
                &event.user_id,
                &intent.action,
                self.category_of(&intent.action),
            )
            .confirmation_id(&confirmation.id)
            .params(Value::Object(intent.params.clone()))
            .correlation_id(correlation_id)
            .build();
        self.audit.append(entry).await;

        Ok(Reply::with_buttons(
            messages::confirm_prompt(&intent.action, &intent.params, self.confirmation_ttl_secs),
            vec![
                Button::new("Yes", CONFIRM_YES),
                Button::new("No", CONFIRM_NO),
            ],
        ))
    }

    /// Dispatch and turn the handler output into a reply.
    async fn run_action(
        &self,
        event: &InboundEvent,
        action: &str,
        params: &Map<String, Value>,
        correlation_id: &str,
    ) -> Result<Reply, EngineError> {
        let output = match self
            .dispatcher
            .dispatch(&event.user_id, &event.chat_id, action, params, correlation_id)
            .await
        {
            Dispatch::Completed(output) => output,
            Dispatch::Failed => return Ok(Reply::text(messages::GENERIC_FAILURE)),
        };

        match output {
            ActionOutput::Reply(reply) => Ok(reply),
            ActionOutput::StartWizard(kind) => {
                Ok(self.wizard.start(event, kind, correlation_id).await?)
            }
            ActionOutput::CancelAll => {
                let wizard = self.wizard.cancel(&event.user_id, correlation_id).await?;
                let confirmations = self.gate.cancel_all(&event.user_id).await?;
                if confirmations > 0 {
                    self.record_confirmation(
                        AuditEntryKind::ConfirmationCancelled,
                        &event.user_id,
                        "cancel",
                        None,
                        None,
                        correlation_id,
                    )
                    .await;
                }
                Ok(Reply::text(if wizard || confirmations > 0 {
                    messages::CANCELLED
                } else {
                    messages::NOTHING_TO_CANCEL
                }))
            }
        }
    }

    /// Materialise a finished wizard through the domain service.
    async fn commit(&self, event: &InboundEvent, versioned: Versioned, correlation_id: &str) -> Reply {
        let state = versioned.state;
        let kind = state.kind;
        let payload = Value::Object(state.draft.clone());
        let ctx = self.dispatcher.context(&state.user_id, &state.chat_id);

        let result = self
            .dispatcher
            .run(
                &state.user_id,
                kind.action(),
                kind.category(),
                &state.draft,
                correlation_id,
                async {
                    ctx.create_entity(kind.entity_kind(), &payload)
                        .await
                        .map_err(HandlerError::from)
                },
            )
            .await;

        match result {
            Dispatch::Completed(entity) => {
                if let Err(e) = self.wizard.complete(&state, &entity, correlation_id).await {
                    tracing::error!(
                        user_id = %event.user_id,
                        error = %e,
                        "Entity created but wizard state could not be cleared"
                    );
                }
                Reply::text(messages::created(kind, &state.draft, &entity))
            }
            Dispatch::Failed => Reply::with_buttons(
                messages::SAVE_FAILED,
                vec![Button::new("Cancel", WIZARD_CANCEL)],
            ),
        }
    }

    fn category_of(&self, action: &str) -> ActionCategory {
        self.registry()
            .get(action)
            .map_or(ActionCategory::System, |d| d.category)
    }

    async fn record_confirmation(
        &self,
        kind: AuditEntryKind,
        user_id: &str,
        action: &str,
        confirmation_id: Option<&str>,
        error: Option<&str>,
        correlation_id: &str,
    ) {
        let mut builder = self
            .audit
            .entry(kind, user_id, action, self.category_of(action))
            .correlation_id(correlation_id);
        if let Some(id) = confirmation_id {
            builder = builder.confirmation_id(id);
        }
        if let Some(error) = error {
            builder = builder.error(error);
        }
        self.audit.append(builder.build()).await;
    }
}

/// Button presses answer by editing the message that carried the buttons.
fn as_edit(event: &InboundEvent, reply: Reply) -> Reply {
    match reply {
        Reply::Text { text, buttons, .. }
            if event.kind == EventKind::Callback && buttons.is_empty() =>
        {
            Reply::edit(event.message_id.clone(), text)
        }
        other => other,
    }
}
