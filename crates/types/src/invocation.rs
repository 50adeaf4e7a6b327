//! Built requests and raw responses.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{HttpVerb, MethodId};

/// A fully built HTTP request, ready for dispatch.
///
/// `url` is the complete target including the query string. `path` and
/// `query` are kept separately so signers can reproduce the exact bytes that
/// went on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub method_id: MethodId,
    pub verb: HttpVerb,
    pub url: String,
    /// Encoded path, starting with `/`.
    pub path: String,
    /// Query pairs in insertion order, unencoded.
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Serialized request body; empty when the request carries none.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Explicit and injected argument values as JSON.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Invocation {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}

/// Raw HTTP response as read from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvocationResult {
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

impl InvocationResult {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: IndexMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn lookup<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
