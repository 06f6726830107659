//! Wizard state machine.
//!
//! Multi-step guided flows with durable per-user state. Every accepted input
//! is a read-modify-write of the stored [`ConversationState`] guarded by its
//! version, so a redelivered or concurrently delivered message cannot apply
//! twice. While a wizard is active all of the user's input lands here.

pub mod flow;
pub mod session;

use serde_json::Value;
use std::sync::Arc;
use steward_audit::{AuditEntryKind, AuditLogger};
use steward_core::{Button, EventKind, InboundEvent, Reply, SharedClock, WizardConfig};
use steward_store::{SharedStore, StoreError};

pub use flow::{Rule, Step, StepId, StepInput, WizardKind};
pub use session::{ConversationState, SessionStore, Versioned};

use crate::error::ValidationError;
use crate::ports::EntityRef;

pub const WIZARD_DONE: &str = "wizard:done";
pub const WIZARD_SKIP: &str = "wizard:skip";
pub const WIZARD_CANCEL: &str = "wizard:cancel";

/// Result of routing one event to the wizard.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardTurn {
    /// No wizard is active for the user.
    Inactive,
    /// Reply with the next prompt or a re-prompt.
    Reply(Reply),
    /// Everything is collected; the caller commits the draft.
    Commit(Versioned),
    /// The operator cancelled; state is gone.
    Cancelled,
}

enum Input<'a> {
    Text(&'a str),
    Photo(&'a str),
    Video(&'a str),
    Done,
    Skip,
    Cancel,
    Other,
}

pub struct WizardEngine {
    sessions: SessionStore,
    config: WizardConfig,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
}

impl WizardEngine {
    pub fn new(
        config: WizardConfig,
        store: SharedStore,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
    ) -> Self {
        Self {
            sessions: SessionStore::new(store, config.cache),
            config,
            audit,
            clock,
        }
    }

    /// Whether the user has an active wizard. May answer from the cache.
    pub async fn is_active(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.load(user_id).await?.is_some())
    }

    /// Current state, read from the store.
    pub async fn state(&self, user_id: &str) -> Result<Option<Versioned>, StoreError> {
        self.sessions.load_fresh(user_id).await
    }

    /// Start a flow, replacing any state the user had.
    pub async fn start(
        &self,
        event: &InboundEvent,
        kind: WizardKind,
        correlation_id: &str,
    ) -> Result<Reply, StoreError> {
        let existing = self.sessions.load_fresh(&event.user_id).await?;
        let now = self.clock.now();
        let state = ConversationState {
            user_id: event.user_id.clone(),
            chat_id: event.chat_id.clone(),
            kind,
            step: kind.first_step(),
            draft: serde_json::Map::new(),
            last_message_id: Some(event.message_id.clone()),
            started_at: now,
            updated_at: now,
        };
        self.sessions
            .save(&state, existing.map(|v| v.version))
            .await?;

        tracing::info!(user_id = %event.user_id, wizard = ?kind, "Wizard started");
        self.record(&state, AuditEntryKind::WizardStarted, None, correlation_id)
            .await;
        Ok(self.prompt(&state, None))
    }

    /// Route one event to the user's active wizard.
    pub async fn handle(
        &self,
        event: &InboundEvent,
        correlation_id: &str,
    ) -> Result<WizardTurn, StoreError> {
        let input = self.input(event);

        for attempt in 0..2 {
            let Some(current) = self.sessions.load_fresh(&event.user_id).await? else {
                return Ok(WizardTurn::Inactive);
            };

            if matches!(input, Input::Cancel) {
                self.cancel(&event.user_id, correlation_id).await?;
                return Ok(WizardTurn::Cancelled);
            }

            if current.state.last_message_id.as_deref() == Some(event.message_id.as_str()) {
                tracing::debug!(
                    user_id = %event.user_id,
                    message_id = %event.message_id,
                    "Duplicate delivery; re-sending prompt"
                );
                self.record(
                    &current.state,
                    AuditEntryKind::WizardRejected,
                    Some("duplicate delivery"),
                    correlation_id,
                )
                .await;
                return Ok(WizardTurn::Reply(self.prompt(&current.state, None)));
            }

            if current.state.step == StepId::Commit {
                return Ok(WizardTurn::Commit(current));
            }

            let Some(step) = current.state.kind.step(current.state.step) else {
                tracing::warn!(
                    user_id = %event.user_id,
                    step = ?current.state.step,
                    "Wizard state points at a step its flow does not have; dropping it"
                );
                self.sessions.delete(&event.user_id).await?;
                return Ok(WizardTurn::Inactive);
            };

            let (mut next, note) = match self.apply(&current.state, step, &input) {
                Ok(applied) => applied,
                Err(e) => {
                    tracing::debug!(
                        user_id = %event.user_id,
                        step = ?step.id,
                        reason = %e,
                        "Wizard input rejected"
                    );
                    self.record(
                        &current.state,
                        AuditEntryKind::WizardRejected,
                        Some(&e.to_string()),
                        correlation_id,
                    )
                    .await;
                    return Ok(WizardTurn::Reply(
                        self.prompt(&current.state, Some(&e.to_string())),
                    ));
                }
            };

            next.last_message_id = Some(event.message_id.clone());
            next.updated_at = self.clock.now();

            match self.sessions.save(&next, Some(current.version)).await {
                Ok(version) => {
                    tracing::debug!(
                        user_id = %event.user_id,
                        from = ?current.state.step,
                        to = ?next.step,
                        "Wizard step accepted"
                    );
                    self.record(&next, AuditEntryKind::WizardStepAccepted, None, correlation_id)
                        .await;
                    if next.step == StepId::Commit {
                        return Ok(WizardTurn::Commit(Versioned {
                            state: next,
                            version,
                        }));
                    }
                    return Ok(WizardTurn::Reply(self.prompt(&next, note.as_deref())));
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        user_id = %event.user_id,
                        attempt,
                        "Wizard state changed concurrently; re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // Lost the race twice: answer with whatever is current now.
        Ok(match self.sessions.load_fresh(&event.user_id).await? {
            Some(latest) => WizardTurn::Reply(self.prompt(&latest.state, None)),
            None => WizardTurn::Inactive,
        })
    }

    /// Drop the user's wizard. Returns whether one was active.
    pub async fn cancel(&self, user_id: &str, correlation_id: &str) -> Result<bool, StoreError> {
        let existing = self.sessions.load_fresh(user_id).await?;
        let removed = self.sessions.delete(user_id).await?;
        if let Some(existing) = existing {
            tracing::info!(user_id = %user_id, wizard = ?existing.state.kind, "Wizard cancelled");
            self.record(
                &existing.state,
                AuditEntryKind::WizardCancelled,
                None,
                correlation_id,
            )
            .await;
        }
        Ok(removed)
    }

    /// Clear state after the domain service accepted the draft.
    pub async fn complete(
        &self,
        state: &ConversationState,
        entity: &EntityRef,
        correlation_id: &str,
    ) -> Result<(), StoreError> {
        self.sessions.delete(&state.user_id).await?;
        tracing::info!(
            user_id = %state.user_id,
            wizard = ?state.kind,
            entity_id = %entity.id,
            "Wizard committed"
        );
        let entry = self
            .audit
            .entry(
                AuditEntryKind::WizardCommitted,
                &state.user_id,
                state.kind.action(),
                state.kind.category(),
            )
            .correlation_id(correlation_id)
            .meta(serde_json::json!({ "entity_kind": entity.kind, "entity_id": entity.id }))
            .build();
        self.audit.append(entry).await;
        Ok(())
    }

    /// Prompt for the state's current step, optionally prefixed with a note.
    pub fn prompt(&self, state: &ConversationState, note: Option<&str>) -> Reply {
        let mut text = String::new();
        if let Some(note) = note {
            text.push_str(note);
            text.push_str("\n\n");
        }

        let cancel = Button::new("Cancel", WIZARD_CANCEL);
        let steps = state.kind.steps();
        let Some(index) = steps.iter().position(|s| s.id == state.step) else {
            text.push_str(
                "Everything is collected but saving did not go through. \
                 Send any message to try again, or /cancel.",
            );
            return Reply::with_buttons(text, vec![cancel]);
        };
        let step = &steps[index];

        text.push_str(&format!(
            "{} · step {}/{}\n{}",
            state.kind.title(),
            index + 1,
            steps.len(),
            step.prompt
        ));

        let buttons = match step.input {
            StepInput::PhotoLoop => {
                let received = state
                    .draft
                    .get(step.id.field())
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                text.push_str(&format!(
                    "\n({} of at most {} received)",
                    received, self.config.max_photos
                ));
                vec![Button::new("Done", WIZARD_DONE), cancel]
            }
            StepInput::OptionalVideo => vec![Button::new("Skip", WIZARD_SKIP), cancel],
            StepInput::Text(_) => vec![cancel],
        };

        Reply::with_buttons(text, buttons)
    }

    /// Apply input to a step. Returns the new state and an optional note.
    fn apply(
        &self,
        state: &ConversationState,
        step: &Step,
        input: &Input<'_>,
    ) -> Result<(ConversationState, Option<String>), ValidationError> {
        let mut next = state.clone();
        let field = step.id.field().to_string();
        let advance = |s: &mut ConversationState| s.step = s.kind.next_step(step.id);

        match step.input {
            StepInput::Text(rule) => {
                let Input::Text(text) = input else {
                    return Err(ValidationError::ExpectedText);
                };
                let value = rule.validate(text)?;
                next.draft.insert(field, value);
                advance(&mut next);
                Ok((next, None))
            }

            StepInput::PhotoLoop => {
                match input {
                    Input::Photo(file_id) => {
                        let count = push_photo(&mut next.draft, &field, file_id);
                        if count < self.config.max_photos {
                            return Ok((next, Some(format!("Photo {} received.", count))));
                        }
                    }
                    Input::Done | Input::Skip => {}
                    Input::Text(text) if self.is_done(text) || self.is_skip(text) => {}
                    _ => return Err(ValidationError::ExpectedPhoto),
                }

                next.draft
                    .entry(field)
                    .or_insert_with(|| Value::Array(Vec::new()));
                advance(&mut next);
                Ok((next, None))
            }

            StepInput::OptionalVideo => {
                let value = match input {
                    Input::Video(file_id) => Value::String((*file_id).to_string()),
                    Input::Skip | Input::Done => Value::Null,
                    Input::Text(text) if self.is_skip(text) || self.is_done(text) => Value::Null,
                    _ => return Err(ValidationError::ExpectedVideo),
                };
                next.draft.insert(field, value);
                advance(&mut next);
                Ok((next, None))
            }
        }
    }

    fn input<'a>(&self, event: &'a InboundEvent) -> Input<'a> {
        match event.kind {
            EventKind::Photo => Input::Photo(event.payload.trim()),
            EventKind::Video => Input::Video(event.payload.trim()),
            EventKind::Callback => match event.payload.trim() {
                WIZARD_DONE => Input::Done,
                WIZARD_SKIP => Input::Skip,
                WIZARD_CANCEL => Input::Cancel,
                _ => Input::Other,
            },
            EventKind::Text | EventKind::Command => {
                let text = event.payload.trim();
                if matches_token(&self.config.cancel_tokens, text) {
                    Input::Cancel
                } else {
                    Input::Text(text)
                }
            }
        }
    }

    fn is_done(&self, text: &str) -> bool {
        matches_token(&self.config.done_tokens, text)
    }

    fn is_skip(&self, text: &str) -> bool {
        matches_token(&self.config.skip_tokens, text)
    }

    async fn record(
        &self,
        state: &ConversationState,
        kind: AuditEntryKind,
        error: Option<&str>,
        correlation_id: &str,
    ) {
        let mut builder = self
            .audit
            .entry(kind, &state.user_id, state.kind.action(), state.kind.category())
            .correlation_id(correlation_id)
            .meta(serde_json::json!({ "step": state.step }));
        if let Some(error) = error {
            builder = builder.error(error);
        }
        self.audit.append(builder.build()).await;
    }
}

/// Append a photo to the loop field, returning how many are collected.
fn push_photo(draft: &mut serde_json::Map<String, Value>, field: &str, file_id: &str) -> usize {
    let entry = draft
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(photos) = entry {
        photos.push(Value::String(file_id.to_string()));
        return photos.len();
    }
    *entry = Value::Array(vec![Value::String(file_id.to_string())]);
    1
}

fn matches_token(tokens: &[String], text: &str) -> bool {
    tokens.iter().any(|t| t.eq_ignore_ascii_case(text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use steward_audit::AuditFilter;
    use steward_core::{AuditConfig, ManualClock};
    use steward_store::MemoryStore;

    struct Harness {
        wizard: WizardEngine,
        audit: Arc<AuditLogger>,
        next_id: std::cell::Cell<u32>,
    }

    impl Harness {
        fn new(store: SharedStore, config: WizardConfig) -> Self {
            let clock: SharedClock = Arc::new(ManualClock::starting_now());
            let audit = Arc::new(
                AuditLogger::new(AuditConfig::default(), store.clone(), clock.clone()).unwrap(),
            );
            Self {
                wizard: WizardEngine::new(config, store, audit.clone(), clock),
                audit,
                next_id: std::cell::Cell::new(0),
            }
        }

        fn msg_id(&self) -> String {
            self.next_id.set(self.next_id.get() + 1);
            format!("m{}", self.next_id.get())
        }

        async fn start(&self, kind: WizardKind) -> Reply {
            let event = InboundEvent::text("1", self.msg_id(), "/newproduct");
            self.wizard.start(&event, kind, "c").await.unwrap()
        }

        async fn send(&self, event: InboundEvent) -> WizardTurn {
            self.wizard.handle(&event, "c").await.unwrap()
        }

        async fn text(&self, text: &str) -> WizardTurn {
            self.send(InboundEvent::text("1", self.msg_id(), text)).await
        }

        async fn photo(&self, file: &str) -> WizardTurn {
            self.send(InboundEvent::photo("1", self.msg_id(), file)).await
        }

        async fn step(&self) -> StepId {
            self.wizard.state("1").await.unwrap().unwrap().state.step
        }
    }

    fn harness() -> Harness {
        Harness::new(Arc::new(MemoryStore::new()), WizardConfig::default())
    }

    async fn fill_until_photos(h: &Harness) {
        h.start(WizardKind::CreateProduct).await;
        for answer in ["Mug", "A sturdy mug", "12.50", "Kitchen", "350 ml"] {
            assert!(matches!(h.text(answer).await, WizardTurn::Reply(_)));
        }
        assert_eq!(h.step().await, StepId::Photos);
    }

    fn committed_draft(turn: WizardTurn) -> serde_json::Map<String, Value> {
        match turn {
            WizardTurn::Commit(v) => {
                assert_eq!(v.state.step, StepId::Commit);
                v.state.draft
            }
            other => panic!("expected commit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_product_flow_without_photos() {
        let h = harness();
        fill_until_photos(&h).await;

        h.send(InboundEvent::callback("1", h.msg_id(), WIZARD_DONE)).await;
        h.send(InboundEvent::callback("1", h.msg_id(), WIZARD_SKIP)).await;
        h.text("25").await;
        let draft = committed_draft(h.text("0.4").await);

        assert_eq!(
            Value::Object(draft),
            json!({
                "name": "Mug",
                "description": "A sturdy mug",
                "price": 12.5,
                "category": "Kitchen",
                "size": "350 ml",
                "photos": [],
                "video": null,
                "stock": 25,
                "weight": 0.4
            })
        );
    }

    #[tokio::test]
    async fn test_draft_fields_independent_of_photo_count() {
        for photos in [0usize, 1, 3] {
            let h = harness();
            fill_until_photos(&h).await;
            for i in 0..photos {
                h.photo(&format!("file-{}", i)).await;
            }
            h.text("done").await;
            h.send(InboundEvent::video("1", h.msg_id(), "vid-1")).await;
            h.text("3").await;
            let draft = committed_draft(h.text("1").await);

            let mut keys: Vec<_> = draft.keys().map(String::as_str).collect();
            keys.sort_unstable();
            let mut expected = WizardKind::CreateProduct.fields();
            expected.sort_unstable();
            assert_eq!(keys, expected);
            assert_eq!(draft["photos"].as_array().unwrap().len(), photos);
            assert_eq!(draft["video"], "vid-1");
        }
    }

    #[tokio::test]
    async fn test_photo_loop_stops_at_upper_bound() {
        let config = WizardConfig {
            max_photos: 2,
            ..Default::default()
        };
        let h = Harness::new(Arc::new(MemoryStore::new()), config);
        fill_until_photos(&h).await;

        match h.photo("a").await {
            WizardTurn::Reply(reply) => {
                assert!(reply.body().contains("Photo 1 received."));
                assert_eq!(reply.buttons()[0].data, WIZARD_DONE);
            }
            other => panic!("unexpected {:?}", other),
        }
        h.photo("b").await;
        assert_eq!(h.step().await, StepId::Video);
    }

    #[tokio::test]
    async fn test_invalid_price_reprompts_without_advancing() {
        let h = harness();
        h.start(WizardKind::CreateProduct).await;
        h.text("Mug").await;
        h.text("A sturdy mug").await;
        let before = h.wizard.state("1").await.unwrap().unwrap();
        assert_eq!(before.state.step, StepId::Price);

        match h.text("abc").await {
            WizardTurn::Reply(reply) => {
                assert!(reply.body().starts_with("Please enter a number."));
                assert!(reply.body().contains("price"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let after = h.wizard.state("1").await.unwrap().unwrap();
        assert_eq!(after.state.step, StepId::Price);
        assert_eq!(after.state.draft, before.state.draft);
        assert_eq!(after.version, before.version);

        let rejected = h
            .audit
            .query(AuditFilter {
                kind: Some(AuditEntryKind::WizardRejected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applies_once() {
        let h = harness();
        h.start(WizardKind::CreateCategory).await;

        let event = InboundEvent::text("1", "dup-1", "Kitchen");
        h.send(event.clone()).await;
        let turn = h.send(event).await;

        let state = h.wizard.state("1").await.unwrap().unwrap();
        assert_eq!(state.state.step, StepId::Description);
        assert_eq!(state.version, 2);
        match turn {
            WizardTurn::Reply(reply) => assert!(reply.body().contains("Describe the category")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_at_any_step() {
        let h = harness();
        h.start(WizardKind::CreateProduct).await;
        h.text("Mug").await;

        assert_eq!(h.text("Cancel").await, WizardTurn::Cancelled);
        assert!(!h.wizard.is_active("1").await.unwrap());
        assert_eq!(h.text("anything").await, WizardTurn::Inactive);

        h.start(WizardKind::CreateProduct).await;
        let turn = h
            .send(InboundEvent::callback("1", h.msg_id(), WIZARD_CANCEL))
            .await;
        assert_eq!(turn, WizardTurn::Cancelled);
    }

    #[tokio::test]
    async fn test_non_photo_in_photo_step_is_rejected() {
        let h = harness();
        fill_until_photos(&h).await;
        match h.text("here is a picture").await {
            WizardTurn::Reply(reply) => {
                assert!(reply.body().starts_with("Please send a photo"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.step().await, StepId::Photos);
    }

    fn cached() -> WizardConfig {
        WizardConfig {
            cache: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_concurrent_writer_is_detected() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let a = Harness::new(store.clone(), cached());
        let b = Harness::new(store, cached());

        a.start(WizardKind::CreateCategory).await;
        // Prime a's cache at version 1.
        assert!(a.wizard.is_active("1").await.unwrap());

        // Another process applies the name step.
        b.send(InboundEvent::text("1", "b-1", "Kitchen")).await;

        // a's cached copy is stale; the turn is computed from the store.
        let turn = a.send(InboundEvent::text("1", "a-1", "Pots and pans")).await;
        let draft = committed_draft(turn);
        assert_eq!(draft["name"], "Kitchen");
        assert_eq!(draft["description"], "Pots and pans");
    }

    #[tokio::test]
    async fn test_stale_cache_does_not_validate_against_old_step() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let a = Harness::new(store.clone(), cached());
        let b = Harness::new(store, cached());

        a.start(WizardKind::CreateProduct).await;
        a.text("Mug").await;
        a.text("A sturdy mug").await;
        // a last saw the price step.
        assert!(a.wizard.is_active("1").await.unwrap());

        // Another process answers the price.
        b.send(InboundEvent::text("1", "b-1", "12.50")).await;

        // "Kitchen" is a valid category, not an invalid price.
        match a.text("Kitchen").await {
            WizardTurn::Reply(reply) => {
                assert!(!reply.body().starts_with("Please enter a number."));
                assert!(reply.body().contains("5/9"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let state = a.wizard.state("1").await.unwrap().unwrap().state;
        assert_eq!(state.step, StepId::Size);
        assert_eq!(state.draft["price"], json!(12.5));
        assert_eq!(state.draft["category"], "Kitchen");
    }

    #[tokio::test]
    async fn test_stale_cache_does_not_commit_a_finished_wizard() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let a = Harness::new(store.clone(), cached());
        let b = Harness::new(store, cached());

        a.start(WizardKind::CreateCategory).await;
        a.text("Kitchen").await;
        assert!(matches!(a.text("Pots").await, WizardTurn::Commit(_)));

        // Another process completes the wizard; a still caches the commit step.
        let committed = b.wizard.state("1").await.unwrap().unwrap().state;
        let entity = EntityRef {
            kind: "category".into(),
            id: "c-1".into(),
            url: None,
        };
        b.wizard.complete(&committed, &entity, "c").await.unwrap();

        assert_eq!(a.text("again").await, WizardTurn::Inactive);
    }

    #[tokio::test]
    async fn test_complete_clears_state() {
        let h = harness();
        h.start(WizardKind::CreateCategory).await;
        h.text("Kitchen").await;
        let state = match h.text("Pots").await {
            WizardTurn::Commit(v) => v.state,
            other => panic!("unexpected {:?}", other),
        };

        // Redelivery before completion asks for commit again.
        assert!(matches!(h.text("retry").await, WizardTurn::Commit(_)));

        let entity = EntityRef {
            kind: "category".into(),
            id: "9".into(),
            url: None,
        };
        h.wizard.complete(&state, &entity, "c").await.unwrap();
        assert!(!h.wizard.is_active("1").await.unwrap());
    }
}
