//! Helpers shared by the Tether crates: URL assembly, wire encodings, strict
//! response parsing, secret redaction, and the blocking bridge.

pub mod async_runtime;
pub mod http;
pub mod redaction;

pub use async_runtime::block_on_future;
pub use http::*;
pub use redaction::{is_sensitive_key, redact_headers, redact_json_value, redact_sensitive};
