//! Strict response body parsing with readable failure context.

use serde_json::Value;
use thiserror::Error;

const PREVIEW_LIMIT: usize = 200;

/// Parse a response body that must be JSON.
///
/// # Arguments
/// * `text` - The raw response body
/// * `status` - HTTP status of the response, when known
///
/// # Errors
/// A [`JsonParseError`] holding the serde error, the status, and a one-line
/// preview of the body.
pub fn parse_response_json_strict(text: &str, status: Option<u16>) -> Result<Value, JsonParseError> {
    serde_json::from_str(text).map_err(|source| JsonParseError {
        status,
        source,
        preview: response_preview(text, PREVIEW_LIMIT),
    })
}

/// One-line rendering of `text` for logs and error messages.
///
/// Whitespace runs become a single space and the result is cut to at most
/// `limit` characters, with `...` marking the cut.
pub fn response_preview(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "<empty>".to_string();
    }
    match collapsed.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}

#[derive(Debug, Error)]
#[error("response is not valid JSON ({}): {source}; body: {preview}", describe_status(.status))]
pub struct JsonParseError {
    status: Option<u16>,
    #[source]
    source: serde_json::Error,
    preview: String,
}

impl JsonParseError {
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn body_preview(&self) -> &str {
        &self.preview
    }
}

fn describe_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "unknown status".to_string(), |code| format!("status {code}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_reports_status_and_preview() {
        let error = parse_response_json_strict("<html>\n\toops\n</html>", Some(502)).unwrap_err();
        assert!(error.to_string().contains("status 502"));
        assert_eq!(error.status(), Some(502));
        assert_eq!(error.body_preview(), "<html> oops </html>");
    }

    #[test]
    fn strict_parse_accepts_valid_json() {
        let value = parse_response_json_strict(r#"{"ok":true}"#, None).unwrap();
        assert_eq!(value["ok"], Value::Bool(true));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let preview = response_preview(&"x".repeat(500), 10);
        assert_eq!(preview, "xxxxxxxxxx...");
        assert_eq!(response_preview("   ", 10), "<empty>");
        assert_eq!(response_preview("short", 10), "short");
    }
}
