//! Classified intents and action categories.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the fallback action used when nothing else matches.
pub const UNKNOWN_ACTION: &str = "unknown";

/// Category an action belongs to, used for audit aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Order,
    Product,
    Category,
    Media,
    Crm,
    Stats,
    Review,
    Fulfillment,
    Payment,
    System,
    Automation,
    Marketing,
    Unknown,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 13] = [
        Self::Order,
        Self::Product,
        Self::Category,
        Self::Media,
        Self::Crm,
        Self::Stats,
        Self::Review,
        Self::Fulfillment,
        Self::Payment,
        Self::System,
        Self::Automation,
        Self::Marketing,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Product => "product",
            Self::Category => "category",
            Self::Media => "media",
            Self::Crm => "crm",
            Self::Stats => "stats",
            Self::Review => "review",
            Self::Fulfillment => "fulfillment",
            Self::Payment => "payment",
            Self::System => "system",
            Self::Automation => "automation",
            Self::Marketing => "marketing",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a category name; unrecognised names map to `Unknown`.
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of classifying free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(rename = "needConfirm", default)]
    pub need_confirm: bool,
    /// Raw completion text the intent was parsed from (absent for fallbacks).
    #[serde(rename = "rawSource", default, skip_serializing_if = "Option::is_none")]
    pub raw_source: Option<String>,
}

impl Intent {
    pub fn new(action: impl Into<String>, params: Map<String, Value>, need_confirm: bool) -> Self {
        Self {
            action: action.into(),
            params,
            need_confirm,
            raw_source: None,
        }
    }

    /// The safe fallback: `{action:"unknown", params:{originalText}, needConfirm:false}`.
    pub fn unknown(original_text: &str) -> Self {
        let mut params = Map::new();
        params.insert(
            "originalText".to_string(),
            Value::String(original_text.to_string()),
        );
        Self::new(UNKNOWN_ACTION, params, false)
    }

    pub fn is_unknown(&self) -> bool {
        self.action == UNKNOWN_ACTION
    }

    /// String view of a parameter, accepting numbers as well.
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
