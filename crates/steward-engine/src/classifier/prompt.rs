//! Classifier prompt built from the action registry.

use serde_json::{Value, json};

use crate::registry::ActionRegistry;

const PREAMBLE: &str = "\
You route messages from a shop operator to backend actions.
Reply with exactly one JSON object and nothing else:
{\"action\": \"<name>\", \"params\": {...}, \"needConfirm\": <true|false>}
Rules:
- \"action\" must be one of the actions listed below, or \"unknown\".
- \"params\" must follow the action's parameter schema. Identifiers are strings of digits.
- Set \"needConfirm\" to true for anything that deletes, cancels, refunds or broadcasts.
- If nothing fits, use {\"action\": \"unknown\", \"params\": {\"originalText\": \"<message>\"}, \"needConfirm\": false}.";

/// System prompt listing every action, its schema and few-shot examples.
pub fn system_prompt(registry: &ActionRegistry) -> String {
    let mut out = String::from(PREAMBLE);

    out.push_str("\n\nActions:");
    for action in registry.list() {
        out.push_str(&format!("\n- {} [{}]", action.name, action.category));
        if action.destructive {
            out.push_str(" (destructive)");
        }
        if !action.description.is_empty() {
            out.push_str(": ");
            out.push_str(&action.description);
        }
        if let Some(params) = describe_params(&action.schema) {
            out.push_str("\n  params: ");
            out.push_str(&params);
        }
    }

    let examples: Vec<_> = registry
        .list()
        .flat_map(|a| a.examples.iter().map(move |e| (a, e)))
        .collect();
    if !examples.is_empty() {
        out.push_str("\n\nExamples:");
        for (action, example) in examples {
            let answer = json!({
                "action": action.name,
                "params": example.params,
                "needConfirm": action.destructive,
            });
            out.push_str(&format!("\nMessage: {}\nJSON: {}", example.text, answer));
        }
    }

    out
}

/// Compact one-line rendering of an object schema's properties.
fn describe_params(schema: &Value) -> Option<String> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.is_empty() {
        return None;
    }
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let parts: Vec<String> = properties
        .iter()
        .map(|(name, prop)| {
            let mut part = name.clone();
            if !required.contains(&name.as_str()) {
                part.push('?');
            }
            part.push_str(": ");
            part.push_str(&describe_type(prop));
            part
        })
        .collect();
    Some(parts.join(", "))
}

fn describe_type(prop: &Value) -> String {
    if let Some(options) = prop.get("enum").and_then(Value::as_array) {
        let names: Vec<_> = options.iter().filter_map(Value::as_str).collect();
        return names.join("|");
    }
    let ty = match prop.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => "any".to_string(),
    };
    match (prop.get("minimum"), prop.get("maximum")) {
        (Some(min), Some(max)) => format!("{} {}..{}", ty, min, max),
        (Some(min), None) => format!("{} >= {}", ty, min),
        _ => match prop.get("exclusiveMinimum") {
            Some(min) => format!("{} > {}", ty, min),
            None => ty,
        },
    }
}
