//! Shared type definitions for Tether.
//!
//! The types here describe a remote HTTP API as data: which verb and path a
//! method maps to, where each argument lands on the wire, and which values are
//! injected out-of-band by providers. They are consumed by the engine crate and
//! carry no I/O.

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

mod contract;
mod descriptor;
mod invocation;

pub use contract::{InjectableBinding, MethodContract, MethodId, ParamBinding, ParamKind, ValueType, WireKind, WireMark};
pub use descriptor::{ApiDescriptor, DescriptorError, MethodDescriptor, ParamSpec, parse_api_descriptor};
pub use invocation::{Invocation, InvocationResult};

/// Well-known content types understood by the default negotiation table.
pub mod content_type {
    /// JSON request and response bodies.
    pub const APPLICATION_JSON: &str = "application/json";
    /// `key=value&key=value` form bodies.
    pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
    /// Raw text bodies.
    pub const TEXT_PLAIN: &str = "text/plain";

    /// Normalize a content type for table lookups.
    ///
    /// Parameters such as `; charset=utf-8` are dropped and the remaining
    /// media type is lowercased.
    ///
    /// ```rust
    /// use tether_types::content_type::normalize;
    ///
    /// assert_eq!(normalize("Application/JSON; charset=UTF-8"), "application/json");
    /// ```
    pub fn normalize(raw: &str) -> String {
        raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
    }
}

/// HTTP verbs a contract method can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpVerb {
    /// Canonical upper-case name as sent on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Returns `true` for verbs that conventionally carry a request body.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = ParseHttpVerbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            _ => Err(ParseHttpVerbError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHttpVerbError(String);

impl fmt::Display for ParseHttpVerbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported HTTP verb '{}'", self.0)
    }
}

impl Error for ParseHttpVerbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_parses_case_insensitively() {
        assert_eq!("get".parse::<HttpVerb>().unwrap(), HttpVerb::Get);
        assert_eq!(" Patch ".parse::<HttpVerb>().unwrap(), HttpVerb::Patch);
        assert!("FETCH".parse::<HttpVerb>().is_err());
    }

    #[test]
    fn verb_body_convention() {
        assert!(HttpVerb::Post.has_body());
        assert!(!HttpVerb::Get.has_body());
        assert_eq!(HttpVerb::Delete.to_string(), "DELETE");
    }

    #[test]
    fn verb_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&HttpVerb::Put).unwrap(), "\"PUT\"");
    }
}
