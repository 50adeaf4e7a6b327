//! Method contracts and the bindings that place arguments on the wire.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::HttpVerb;

/// Stable identifier for a contract method.
///
/// Identifiers are assigned when an API is described, never derived from
/// runtime identity, so adapters can forward calls with a constant key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(String);

impl MethodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MethodId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MethodId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Request location a value can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireKind {
    /// `{name}` placeholder in the path template.
    Path,
    /// URL query pair.
    Query,
    /// Request header.
    Header,
    /// Form field, serialized by the form writer.
    Form,
    /// The whole request body.
    Body,
}

impl WireKind {
    /// Named locations must agree with the binding name they satisfy.
    pub fn is_named(self) -> bool {
        !matches!(self, Self::Body)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Form => "form",
            Self::Body => "body",
        }
    }
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a parameter binding on a resolved contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Path,
    Query,
    Header,
    Form,
    Body,
    /// Supplied by a registered provider rather than the caller.
    Injected,
}

impl ParamKind {
    /// Wire location for explicit kinds; `None` for injected bindings, whose
    /// placement comes from the provider's marks.
    pub fn wire_kind(self) -> Option<WireKind> {
        match self {
            Self::Path => Some(WireKind::Path),
            Self::Query => Some(WireKind::Query),
            Self::Header => Some(WireKind::Header),
            Self::Form => Some(WireKind::Form),
            Self::Body => Some(WireKind::Body),
            Self::Injected => None,
        }
    }
}

impl From<WireKind> for ParamKind {
    fn from(kind: WireKind) -> Self {
        match kind {
            WireKind::Path => Self::Path,
            WireKind::Query => Self::Query,
            WireKind::Header => Self::Header,
            WireKind::Form => Self::Form,
            WireKind::Body => Self::Body,
        }
    }
}

/// Maps the argument at `source_index` to a request location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamBinding {
    pub kind: ParamKind,
    pub name: String,
    pub source_index: usize,
}

impl ParamBinding {
    pub fn new(kind: ParamKind, name: impl Into<String>, source_index: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            source_index,
        }
    }
}

/// A location marker declared by a provider for the value it supplies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireMark {
    pub kind: WireKind,
    /// Header, query, path, or form key. Ignored for body marks.
    #[serde(default)]
    pub name: String,
}

impl WireMark {
    pub fn new(kind: WireKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(WireKind::Header, name)
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(WireKind::Query, name)
    }

    pub fn path(name: impl Into<String>) -> Self {
        Self::new(WireKind::Path, name)
    }

    pub fn form(name: impl Into<String>) -> Self {
        Self::new(WireKind::Form, name)
    }

    pub fn body() -> Self {
        Self::new(WireKind::Body, "")
    }
}

impl fmt::Display for WireMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_named() {
            write!(f, "{}({})", self.kind, self.name)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Declared type of an injected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Accepts any supplied type.
    #[default]
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// A digest computed over the built request.
    Digest,
    /// A synchronized value factory that doubles as a lock key.
    Synchronized,
}

impl ValueType {
    /// Whether a value of `supplied` type can satisfy a binding expecting `self`.
    ///
    /// ```rust
    /// use tether_types::ValueType;
    ///
    /// assert!(ValueType::Any.accepts(ValueType::Digest));
    /// assert!(ValueType::Number.accepts(ValueType::Integer));
    /// assert!(!ValueType::Integer.accepts(ValueType::Number));
    /// ```
    pub fn accepts(self, supplied: ValueType) -> bool {
        match (self, supplied) {
            (Self::Any, _) => true,
            (Self::Number, Self::Integer) => true,
            (expected, supplied) => expected == supplied,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Digest => "digest",
            Self::Synchronized => "synchronized",
        };
        f.write_str(label)
    }
}

/// Out-of-band parameter a provider must supply for a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectableBinding {
    pub name: String,
    #[serde(default, rename = "type")]
    pub expected_type: ValueType,
    /// Wire locations the provider must mark its value with, and only these.
    #[serde(default)]
    pub marks: BTreeSet<WireKind>,
}

impl InjectableBinding {
    pub fn new(name: impl Into<String>, expected_type: ValueType, marks: impl IntoIterator<Item = WireKind>) -> Self {
        Self {
            name: name.into(),
            expected_type,
            marks: marks.into_iter().collect(),
        }
    }
}

/// Immutable description of how one method turns arguments into a request.
///
/// Explicit bindings index into the caller's arguments. Injected bindings are
/// appended after them, one per effective injectable, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodContract {
    pub id: MethodId,
    pub verb: HttpVerb,
    pub base_url: String,
    pub interface_path: String,
    pub method_path: String,
    pub params: Vec<ParamBinding>,
    /// Request body content type; `None` when the method sends no body.
    pub consumes: Option<String>,
    /// Response content type used when the response does not declare one.
    pub produces: String,
    pub injectables: Vec<InjectableBinding>,
}

impl MethodContract {
    /// Number of caller-supplied argument positions.
    pub fn explicit_arity(&self) -> usize {
        self.params.iter().filter(|param| param.kind != ParamKind::Injected).count()
    }

    pub fn explicit_params(&self) -> impl Iterator<Item = &ParamBinding> {
        self.params.iter().filter(|param| param.kind != ParamKind::Injected)
    }

    pub fn injected_params(&self) -> impl Iterator<Item = &ParamBinding> {
        self.params.iter().filter(|param| param.kind == ParamKind::Injected)
    }

    /// Names of injected bindings in argument order.
    pub fn injectable_names(&self) -> Vec<String> {
        self.injectables.iter().map(|binding| binding.name.clone()).collect()
    }

    /// Interface prefix and method path joined with exactly one `/` between them.
    pub fn path_template(&self) -> String {
        let segments = [self.interface_path.as_str(), self.method_path.as_str()];
        let mut template = String::new();
        for segment in segments {
            let trimmed = segment.trim_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            template.push('/');
            template.push_str(trimmed);
        }
        if template.is_empty() {
            template.push('/');
        }
        template
    }
}
