//! Telemetry redaction.
//!
//! When record-inputs telemetry is enabled, stream options are deep-
//! scanned before emit: any object key containing a sensitive substring
//! has its value replaced, and oversized strings are truncated.

use serde_json::Value;

/// Case-insensitive substrings that mark a key as sensitive.
const SENSITIVE_KEY_PARTS: [&str; 9] = [
    "api_key",
    "apikey",
    "secret",
    "token",
    "authorization",
    "cookie",
    "password",
    "privatekey",
    "secretkey",
];

/// Strings longer than this are truncated with an ellipsis marker.
const MAX_STRING_LEN: usize = 2048;

const REDACTED: &str = "[REDACTED]";

/// True when a key should have its value replaced.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// Redact a JSON value in place.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *v = Value::String(REDACTED.into());
                } else {
                    redact_value(v);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_LEN {
                let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
                *s = format!("{truncated}…");
            }
        }
        _ => {}
    }
}

/// Redacted copy of a JSON value.
pub fn redacted(value: &Value) -> Value {
    let mut copy = value.clone();
    redact_value(&mut copy);
    copy
}
