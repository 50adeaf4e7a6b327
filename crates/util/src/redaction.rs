//! Secret redaction for logged requests and responses.
//!
//! Audit records carry full headers and bodies, which for signed APIs include
//! API keys and signatures. Everything written to a persistent sink goes
//! through these helpers first.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Header and JSON keys whose values are always masked.
const SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api_key",
    "apikey",
    "api-key",
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "secret",
    "password",
    "passphrase",
    "signature",
];

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)((?:^|\b)Basic\s+)([A-Za-z0-9+/]+=*)",
        r"(?i)((?:^|[&?\s])[A-Za-z0-9_\-]*(?:key|token|secret|password|passphrase|signature)=)([^&\s]+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern compiles"))
    .collect()
});

/// Whether values stored under `key` must never be logged verbatim.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|candidate| key.eq_ignore_ascii_case(candidate))
}

/// Mask values that look like secrets inside free text.
///
/// # Example
/// ```rust
/// use tether_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("Authorization: Bearer abc"), "Authorization: [REDACTED]");
/// assert_eq!(redact_sensitive("amount=3&apiKey=k1&signature=ff"), "amount=3&apiKey=[REDACTED]&signature=[REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                format!("{prefix}{REDACTED}")
            })
            .into_owned();
    }
    redacted
}

/// Copy of `headers` with sensitive values masked.
pub fn redact_headers(headers: &IndexMap<String, String>) -> IndexMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_key(name) {
                REDACTED.to_string()
            } else {
                redact_sensitive(value)
            };
            (name.clone(), value)
        })
        .collect()
}

/// Recursively mask sensitive keys and secret-looking strings in JSON.
pub fn redact_json_value(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_sensitive(&text)),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_json_value(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_json_value).collect()),
        other => other,
    }
}
