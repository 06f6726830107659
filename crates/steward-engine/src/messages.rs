//! Fixed texts shown on the chat surface.
//!
//! Internal errors never reach the operator; every failure maps to one of
//! these.

use serde_json::{Map, Value};

use crate::ports::EntityRef;
use crate::wizard::WizardKind;

pub const NOT_AUTHORIZED: &str = "Sorry, this bot is for shop staff only.";
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again in a moment.";
pub const SAVE_FAILED: &str =
    "Couldn't save that right now. Send any message to try again, or /cancel.";
pub const CANCELLED: &str = "Cancelled.";
pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel.";
pub const CONFIRM_DECLINED: &str = "OK, I won't do it.";
pub const CONFIRM_EXPIRED: &str = "That confirmation has expired. Please ask again.";

pub fn rate_limited(reset_in_secs: u64) -> String {
    format!(
        "You're sending requests too fast. Please try again in {} s.",
        reset_in_secs
    )
}

/// Confirmation question for a destructive action.
pub fn confirm_prompt(action: &str, params: &Map<String, Value>, ttl_secs: i64) -> String {
    let mut text = format!("Please confirm: {}", action.replace('_', " "));
    if !params.is_empty() {
        let args: Vec<String> = params
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect();
        text.push_str(&format!(" ({})", args.join(", ")));
    }
    text.push_str(&format!(
        "?\nReply yes or no within {} seconds.",
        ttl_secs
    ));
    text
}

/// Success text after a wizard commit.
pub fn created(kind: WizardKind, draft: &Map<String, Value>, entity: &EntityRef) -> String {
    let noun = match kind {
        WizardKind::CreateProduct => "Product",
        WizardKind::CreateCategory => "Category",
    };
    let name = draft.get("name").and_then(Value::as_str).unwrap_or("");
    let mut text = format!("{} \"{}\" created (id {}).", noun, name, entity.id);
    if let Some(url) = &entity.url {
        text.push('\n');
        text.push_str(url);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_confirm_prompt() {
        let params = json!({"productId": "42"}).as_object().cloned().unwrap();
        assert_eq!(
            confirm_prompt("delete_product", &params, 60),
            "Please confirm: delete product (productId=42)?\nReply yes or no within 60 seconds."
        );
    }
}
