//! Sensitive-data redaction (§7).
//!
//! Any string that could end up in `last_error`, a progress `message`, a
//! webhook payload, or a delivery `error_message` is passed through
//! [`redact_str`] (or, for structured payloads, [`redact_json`]) first.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"(?i)(api[_-]?key|token|secret|password|auth)['"]?\s*[:=]\s*['"]?[\w.\-]+"#)
                .expect("valid regex"),
            "[REDACTED]",
        ),
        (
            Regex::new(r"(?i)authorization:\s*bearer\s+[\w.\-]+").expect("valid regex"),
            "Authorization: Bearer [REDACTED]",
        ),
        (
            Regex::new(r"(?i)cookie:\s*.+").expect("valid regex"),
            "Cookie: [REDACTED]",
        ),
        (
            Regex::new(r"(?i)set-cookie:\s*.+").expect("valid regex"),
            "Set-Cookie: [REDACTED]",
        ),
    ]
});

const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "token",
    "secret",
    "password",
    "authorization",
    "cookie",
    "api-key",
];

/// Strip secrets out of a free-form string before logging or storing it.
pub fn redact_str(input: &str) -> String {
    let mut result = input.to_owned();
    for (pattern, replacement) in PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    result
}

fn key_is_sensitive(key: &str) -> bool {
    let normalized = key.to_lowercase().replace('-', "_");
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| normalized == *sensitive || normalized.contains(sensitive))
}

/// Recursively redact a JSON value: sensitive keys are replaced wholesale,
/// string values are run through [`redact_str`].
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if key_is_sensitive(key) {
                    out.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key.clone(), redact_json(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        Value::String(s) => Value::String(redact_str(s)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_key_value_secret() {
        let input = "failed request with api_key=sk-abc123 attached";
        let redacted = redact_str(input);
        assert!(!redacted.contains("sk-abc123"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_bearer_token() {
        let input = "Authorization: Bearer abcdef.ghijkl";
        let redacted = redact_str(input);
        assert_eq!(redacted, "Authorization: Bearer [REDACTED]");
    }

    #[test]
    fn redacts_cookie_header() {
        let input = "Cookie: session=deadbeef; other=1";
        let redacted = redact_str(input);
        assert_eq!(redacted, "Cookie: [REDACTED]");
    }

    #[test]
    fn leaves_benign_text_untouched() {
        let input = "fetch failed: connection reset by peer";
        assert_eq!(redact_str(input), input);
    }

    #[test]
    fn redacts_dict_values_by_key() {
        let value = serde_json::json!({
            "url": "https://example.com",
            "api_key": "super-secret-value",
            "nested": {"password": "hunter2"},
            "items": ["token=abc123", "fine"],
        });

        let redacted = redact_json(&value);
        let redacted_str = redacted.to_string();
        assert!(!redacted_str.contains("super-secret-value"));
        assert!(!redacted_str.contains("hunter2"));
        assert!(!redacted_str.contains("abc123"));
        assert!(redacted_str.contains("example.com"));
    }
}
