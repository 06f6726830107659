//! Action registry.
//!
//! The closed set of actions the engine can run. Each [`ActionDescriptor`]
//! carries everything other components derive from it: the classifier prompt
//! (description, parameter schema, examples), the quick-command table, the
//! confirmation rule (`destructive`) and the handler. The registry is built
//! once at startup and only read afterwards.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use steward_core::{ActionCategory, Reply, UNKNOWN_ACTION};

use crate::dispatcher::HandlerContext;
use crate::error::{EngineError, HandlerError};
use crate::wizard::WizardKind;

/// What a handler asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    /// Send this reply.
    Reply(Reply),
    /// Start a guided flow for the user.
    StartWizard(WizardKind),
    /// Drop the user's wizard and pending confirmations.
    CancelAll,
}

/// Handler behind an action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError>;
}

/// A few-shot example for the classifier prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub text: String,
    pub params: Value,
}

/// Static description of one action.
#[derive(Clone)]
pub struct ActionDescriptor {
    pub name: String,
    pub category: ActionCategory,
    /// Destructive actions always go through the confirmation gate.
    pub destructive: bool,
    pub description: String,
    /// JSON Schema for the params object.
    pub schema: Value,
    pub examples: Vec<Example>,
    /// Slash commands that run this action directly, e.g. `/orders`.
    pub quick_commands: Vec<String>,
    pub handler: Arc<dyn ActionHandler>,
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("destructive", &self.destructive)
            .finish_non_exhaustive()
    }
}

impl ActionDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: ActionCategory,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            destructive: false,
            description: String::new(),
            schema: serde_json::json!({ "type": "object" }),
            examples: Vec::new(),
            quick_commands: Vec::new(),
            handler,
        }
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn example(mut self, text: impl Into<String>, params: Value) -> Self {
        self.examples.push(Example {
            text: text.into(),
            params,
        });
        self
    }

    pub fn quick_command(mut self, command: impl Into<String>) -> Self {
        self.quick_commands.push(command.into());
        self
    }
}

struct Entry {
    descriptor: ActionDescriptor,
    validator: jsonschema::Validator,
}

/// Registry of available actions, in registration order.
pub struct ActionRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    quick: HashMap<String, usize>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            quick: HashMap::new(),
        }
    }

    /// Register an action, compiling its parameter schema.
    pub fn register(&mut self, descriptor: ActionDescriptor) -> Result<(), EngineError> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(EngineError::InvalidDescriptor {
                name: descriptor.name,
                reason: "registered twice".to_string(),
            });
        }

        let validator = jsonschema::draft202012::options()
            .build(&descriptor.schema)
            .map_err(|e| EngineError::InvalidDescriptor {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        let index = self.entries.len();
        for command in &descriptor.quick_commands {
            let command = command.to_lowercase();
            if self.quick.insert(command.clone(), index).is_some() {
                return Err(EngineError::InvalidDescriptor {
                    name: descriptor.name,
                    reason: format!("quick command {} already taken", command),
                });
            }
        }

        self.by_name.insert(descriptor.name.clone(), index);
        self.entries.push(Entry {
            descriptor,
            validator,
        });
        Ok(())
    }

    /// Get an action by name.
    pub fn get(&self, name: &str) -> Option<&ActionDescriptor> {
        self.by_name
            .get(name)
            .map(|&i| &self.entries[i].descriptor)
    }

    /// Check if an action exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Get an action, falling back to the `unknown` handler.
    pub fn resolve(&self, name: &str) -> Option<&ActionDescriptor> {
        self.get(name).or_else(|| self.get(UNKNOWN_ACTION))
    }

    /// All actions in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the action for a slash command. Arguments and a trailing
    /// `@botname` are ignored.
    pub fn quick_command(&self, text: &str) -> Option<&ActionDescriptor> {
        let first = text.split_whitespace().next()?;
        if !first.starts_with('/') {
            return None;
        }
        let command = first.split('@').next().unwrap_or(first).to_lowercase();
        self.quick
            .get(&command)
            .map(|&i| &self.entries[i].descriptor)
    }

    /// Validate params against the action's schema.
    pub fn validate_params(&self, name: &str, params: &Map<String, Value>) -> Result<(), String> {
        let Some(&index) = self.by_name.get(name) else {
            return Err(format!("unknown action {}", name));
        };

        let instance = Value::Object(params.clone());
        let validator = &self.entries[index].validator;
        if validator.is_valid(&instance) {
            return Ok(());
        }

        let messages: Vec<String> = validator
            .iter_errors(&instance)
            .take(5)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        Err(messages.join("; "))
    }
}
