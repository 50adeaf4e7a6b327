//! Error taxonomy for client construction and invocation.

use std::fmt;

use indexmap::IndexMap;
use tether_api::TransportConfigError;
use tether_types::{DescriptorError, Invocation, MethodId, ValueType, WireKind};
use thiserror::Error;
use tether_util::response_preview;

use crate::audit::AuditError;

/// Configuration mistakes detected while constructing a client.
///
/// None of these can occur once a client exists.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("supplied provider '{name}' does not correspond to any injectable declared in {api}")]
    UnknownProvider { name: String, api: String },

    #[error("{api} declares injectable '{name}' more than once for method '{method}'")]
    DuplicateBinding { api: String, method: MethodId, name: String },

    #[error("the providers supplied for {api} do not include one for '{name}' (needed by '{method}')")]
    MissingProvider { api: String, method: MethodId, name: String },

    #[error("provider for '{name}' supplies {supplied} but {expected} is required")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        supplied: ValueType,
    },

    #[error("provider for '{name}' is missing the required wire mark (expected={expected}, found=[{found}])")]
    MissingWireMark { name: String, expected: WireKind, found: String },

    #[error("provider for '{name}' has extra wire marks (expected=[{expected}], found=[{found}])")]
    UnexpectedWireMarks { name: String, expected: String, found: String },

    #[error("provider for '{name}' marks its {kind} value with the wrong name (expected={name}, found={found})")]
    WireMarkNameMismatch { name: String, kind: WireKind, found: String },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    BaseUrl(#[from] TransportConfigError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Whether a codec was needed to write a request or read a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecDirection {
    Request,
    Response,
}

impl fmt::Display for CodecDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request writer"),
            Self::Response => f.write_str("response reader"),
        }
    }
}

/// Invocation and response details attached to an error by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub invocation: Option<Box<Invocation>>,
    pub response_headers: Option<IndexMap<String, String>>,
}

/// A non-2xx response that was not ignored by configuration.
#[derive(Debug, Error)]
#[error("HTTP status {status}: {}", response_preview(.body, 200))]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
    pub context: ErrorContext,
}

impl HttpStatusError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            context: ErrorContext::default(),
        }
    }
}

/// A response body that could not be mapped to the declared result type.
#[derive(Debug, Error)]
#[error("cannot decode response as {target}: {source:#}")]
pub struct DecodeError {
    pub target: String,
    pub body: String,
    #[source]
    pub source: anyhow::Error,
    pub context: ErrorContext,
}

impl DecodeError {
    pub fn new(target: impl Into<String>, body: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            target: target.into(),
            body: body.into(),
            source,
            context: ErrorContext::default(),
        }
    }
}

/// Errors returned by [`RestClient`](crate::RestClient) calls.
#[derive(Debug, Error)]
pub enum RestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown method '{0}'")]
    UnknownMethod(MethodId),

    #[error("no {direction} registered for content type '{content_type}'")]
    UnsupportedContentType {
        content_type: String,
        direction: CodecDirection,
    },

    #[error("invalid argument for '{method}': {reason}")]
    InvalidArgument { method: MethodId, reason: String },

    #[error("transport failure: {0:#}")]
    Transport(#[source] anyhow::Error),

    #[error(transparent)]
    HttpStatus(Box<HttpStatusError>),

    #[error(transparent)]
    Decode(Box<DecodeError>),

    #[error("parameter digest for '{name}' failed: {source:#}")]
    Digest {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("result interceptor failed: {0:#}")]
    Interceptor(#[source] anyhow::Error),

    #[error("request signer failed: {0:#}")]
    Signer(#[source] anyhow::Error),

    #[error("call to '{method}' failed: {source}")]
    Wrapped {
        method: MethodId,
        invocation: Option<Box<Invocation>>,
        #[source]
        source: Box<RestError>,
    },
}

impl RestError {
    /// HTTP status of the failing response, if the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus(error) => Some(error.status),
            Self::Wrapped { source, .. } => source.status(),
            _ => None,
        }
    }

    /// The built request, when the engine attached it.
    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            Self::Wrapped { invocation, .. } => invocation.as_deref(),
            other => other.context().and_then(|context| context.invocation.as_deref()),
        }
    }

    pub fn response_headers(&self) -> Option<&IndexMap<String, String>> {
        match self {
            Self::Wrapped { source, .. } => source.response_headers(),
            other => other.context().and_then(|context| context.response_headers.as_ref()),
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, Self::Wrapped { .. })
    }

    /// Strip a context envelope, returning the underlying error.
    pub fn into_inner(self) -> RestError {
        match self {
            Self::Wrapped { source, .. } => *source,
            other => other,
        }
    }

    fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::HttpStatus(error) => Some(&error.context),
            Self::Decode(error) => Some(&error.context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::HttpStatus(error) => Some(&mut error.context),
            Self::Decode(error) => Some(&mut error.context),
            _ => None,
        }
    }

    /// Apply the propagation policy to a failed call.
    ///
    /// Errors that carry an [`ErrorContext`] are enriched in place and
    /// returned as-is. Anything else is wrapped in [`RestError::Wrapped`]
    /// when `wrap` is set and returned bare otherwise.
    pub(crate) fn classify(
        mut self,
        method: &MethodId,
        invocation: Option<&Invocation>,
        response_headers: Option<&IndexMap<String, String>>,
        wrap: bool,
    ) -> RestError {
        if let Some(context) = self.context_mut() {
            if context.invocation.is_none() {
                context.invocation = invocation.cloned().map(Box::new);
            }
            if context.response_headers.is_none() {
                context.response_headers = response_headers.cloned();
            }
            return self;
        }
        if wrap && !self.is_wrapped() {
            return RestError::Wrapped {
                method: method.clone(),
                invocation: invocation.cloned().map(Box::new),
                source: Box::new(self),
            };
        }
        self
    }
}

impl From<HttpStatusError> for RestError {
    fn from(error: HttpStatusError) -> Self {
        Self::HttpStatus(Box::new(error))
    }
}

impl From<DecodeError> for RestError {
    fn from(error: DecodeError) -> Self {
        Self::Decode(Box::new(error))
    }
}
