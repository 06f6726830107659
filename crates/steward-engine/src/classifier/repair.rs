//! Extraction and best-effort repair of JSON from completion output.
//!
//! Models wrap JSON in code fences, add prose around it, use typographic
//! quotes, leave keys unquoted or add trailing commas. Repair is heuristic and
//! can produce parseable but wrong JSON, which is why the caller validates the
//! result against the action's schema afterwards.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::ClassificationError;

static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("bare key pattern")
});

static SINGLE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^'"\\]*)'"#).expect("single quote pattern"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#",\s*([\}\]])"#).expect("trailing comma pattern"));

/// Remove a surrounding Markdown code fence (```` ```json ```` ... ```` ``` ````).
///
/// Only the markers go; content sharing a line with them is kept.
pub fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let tag = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        body = &rest[tag..];
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// The outermost `{...}` object in `text`.
///
/// Braces inside string literals are ignored. If the braces never balance,
/// everything from the first `{` to the last `}` is returned.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// One repair pass: normalise quotes, quote bare keys, drop trailing commas.
pub fn repair(json: &str) -> String {
    let normalized: String = json
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            _ => c,
        })
        .collect();

    let double_quoted = SINGLE_QUOTED.replace_all(&normalized, "\"$1\"");
    let keys_quoted = BARE_KEY.replace_all(&double_quoted, "$1\"$2\":");
    TRAILING_COMMA.replace_all(&keys_quoted, "$1").into_owned()
}

/// Strip fences, extract the outermost object and parse it, repairing once
/// on failure.
pub fn parse_completion(raw: &str) -> Result<Value, ClassificationError> {
    let object = extract_object(strip_fences(raw)).ok_or(ClassificationError::NoJson)?;

    match serde_json::from_str::<Value>(object) {
        Ok(value) => Ok(value),
        Err(first) => {
            let repaired = repair(object);
            serde_json::from_str::<Value>(&repaired).map_err(|second| {
                tracing::debug!(
                    first_error = %first,
                    repair_error = %second,
                    "Completion output unparseable after repair"
                );
                ClassificationError::Parse(second.to_string())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        let raw = "```json\n{\"action\":\"help\"}\n```";
        assert_eq!(strip_fences(raw), "{\"action\":\"help\"}");
        assert_eq!(strip_fences("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":\"```\"}"), "{\"a\":\"```\"}");
    }

    #[test]
    fn test_parse_single_line_fenced_completion() {
        assert_eq!(
            parse_completion("```json {\"action\":\"help\",\"params\":{}} ```").unwrap(),
            json!({"action": "help", "params": {}})
        );
        assert_eq!(
            parse_completion("```json\n{\"action\":\"help\",\"params\":{}}```").unwrap(),
            json!({"action": "help", "params": {}})
        );
    }

    #[test]
    fn test_extract_outermost_object() {
        let text = r#"Sure! {"action":"get_order","params":{"orderId":"5"}} hope that helps {x}"#;
        assert_eq!(
            extract_object(text),
            Some(r#"{"action":"get_order","params":{"orderId":"5"}}"#)
        );
        assert_eq!(
            extract_object(r#"{"a":"brace } in string"}"#),
            Some(r#"{"a":"brace } in string"}"#)
        );
        assert_eq!(extract_object("no json here"), None);
    }

    #[test]
    fn test_repair_bare_keys_and_quotes() {
        let broken = "{action: \u{201C}delete_product\u{201D}, params: {productId: '42',}, needConfirm: true}";
        let value: Value = serde_json::from_str(&repair(broken)).unwrap();
        assert_eq!(
            value,
            json!({"action": "delete_product", "params": {"productId": "42"}, "needConfirm": true})
        );
    }

    #[test]
    fn test_parse_completion() {
        let raw = "```\n{'action': 'list_orders', 'params': {}}\n```";
        assert_eq!(
            parse_completion(raw).unwrap(),
            json!({"action": "list_orders", "params": {}})
        );

        assert!(matches!(
            parse_completion("I cannot help with that"),
            Err(ClassificationError::NoJson)
        ));
        assert!(matches!(
            parse_completion("{action: [unclosed}"),
            Err(ClassificationError::Parse(_))
        ));
    }
}
