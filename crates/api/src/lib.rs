//! HTTP transport for Tether.
//!
//! The engine never talks to sockets itself. It hands a fully built
//! [`TransportRequest`] to a [`Transport`], gets back an opaque handle, and
//! later turns that handle into an [`InvocationResult`]. Splitting `send`
//! from `receive` lets the engine release a call's lock as soon as the
//! request is on the wire while the response is read on a bounded pool.
//!
//! [`ReqwestTransport`] is the production implementation, configured through
//! [`TransportConfig`].
//!
//! # Example
//!
//! ```ignore
//! use tether_api::{ReqwestTransport, Transport, TransportConfig, TransportRequest};
//! use tether_types::HttpVerb;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let transport = ReqwestTransport::new(&TransportConfig::from_env()?)?;
//! let handle = transport.send(&TransportRequest::new(HttpVerb::Get, "https://api.example.com/time")).await?;
//! let result = transport.receive(handle).await?;
//! println!("status: {}", result.status);
//! # Ok(())
//! # }
//! ```

mod config;
mod reqwest_transport;

use async_trait::async_trait;
use indexmap::IndexMap;
use tether_types::{HttpVerb, Invocation, InvocationResult};

pub use config::{TransportConfig, TransportConfigError, validate_base_url};
pub use reqwest_transport::ReqwestTransport;

/// Wire-level request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub verb: HttpVerb,
    pub url: String,
    pub headers: IndexMap<String, String>,
    /// Empty when no body is sent.
    pub body: String,
}

impl TransportRequest {
    pub fn new(verb: HttpVerb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            headers: IndexMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

impl From<&Invocation> for TransportRequest {
    fn from(invocation: &Invocation) -> Self {
        let mut headers = invocation.headers.clone();
        if let Some(content_type) = &invocation.content_type
            && invocation.has_body()
            && invocation.header("content-type").is_none()
        {
            headers.insert("Content-Type".to_string(), content_type.clone());
        }
        Self {
            verb: invocation.verb,
            url: invocation.url.clone(),
            headers,
            body: invocation.body.clone(),
        }
    }
}

/// Physical HTTP I/O, split into dispatch and response reading.
///
/// `send` is called exactly once per invocation. The returned handle is moved
/// to another task and passed to `receive`, which must eventually complete
/// with either the response or an I/O error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// In-flight response produced by [`Transport::send`].
    type Handle: Send + 'static;

    /// Put the request on the wire.
    async fn send(&self, request: &TransportRequest) -> anyhow::Result<Self::Handle>;

    /// Read status, headers and body for a dispatched request.
    async fn receive(&self, handle: Self::Handle) -> anyhow::Result<InvocationResult>;
}
