//! # steward-engine
//!
//! The conversation engine behind the Steward admin bot.
//!
//! Each inbound chat event is routed through a fixed pipeline and produces
//! exactly one reply:
//!
//! ```text
//! InboundEvent
//!       │
//!       ▼
//! ┌──────────────────────┐
//! │ 1. Allow-list        │  ← EngineConfig.admin_users
//! │ 2. Active wizard?    │  ← wizard::WizardEngine (CAS-guarded state)
//! │ 3. Pending confirm?  │  ← confirmation::ConfirmationGate
//! │ 4. Quick command?    │  ← registry::ActionRegistry
//! │ 5. Rate limit        │  ← rate_limit::RateLimiter
//! │ 6. Classify          │  ← classifier::Classifier → completion service
//! │ 7. Confirm or run    │  ← dispatcher::Dispatcher → handlers
//! └──────────┬───────────┘
//!            ▼
//!          Reply
//! ```
//!
//! Every stage writes to the audit log. External systems (completion
//! service, domain service, chat transport) are reached through the traits
//! in [`ports`].

pub mod classifier;
pub mod confirmation;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod ports;
pub mod rate_limit;
pub mod registry;
pub mod wizard;

pub use classifier::Classifier;
pub use confirmation::{Confirmation, ConfirmationGate, ConfirmationState, ReplyKind};
pub use dispatcher::{Dispatch, Dispatcher, HandlerContext};
pub use engine::{Engine, EngineDeps, SweepReport};
pub use error::{ClassificationError, EngineError, HandlerError, ValidationError};
pub use handlers::standard_registry;
pub use ports::{
    CompletionClient, CompletionError, DomainError, DomainService, EntityRef, Prompt, ReplyError,
    ReplySink, deliver,
};
pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::{ActionDescriptor, ActionHandler, ActionOutput, ActionRegistry, Example};
pub use wizard::{ConversationState, WizardEngine, WizardKind, WizardTurn};
