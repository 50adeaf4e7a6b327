use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Certificate, Client, Method, Proxy, Response};
use tether_types::{HttpVerb, InvocationResult};
use tracing::debug;

use crate::{Transport, TransportConfig, TransportRequest};

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Timeouts, proxy, TLS roots and default headers are fixed when the client
/// is built. Retries and pooling policy are left to reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Build a transport from `config`.
    ///
    /// # Errors
    /// Fails on invalid default headers, proxy settings, unreadable or
    /// malformed certificates, or when reqwest cannot build the client.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(header_map(&config.default_headers)?)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(timeout) = config.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = config.read_timeout() {
            builder = builder.read_timeout(timeout);
        }
        if let Some(proxy_url) = config.proxy_url()? {
            let proxy = Proxy::all(&proxy_url).with_context(|| format!("configure proxy {proxy_url}"))?;
            builder = builder.proxy(proxy);
        }
        for pem in config.load_root_certificates()? {
            let certificate = Certificate::from_pem(&pem).context("parse root certificate")?;
            builder = builder.add_root_certificate(certificate);
        }

        let http = builder.build().context("build http client")?;
        Ok(Self { http })
    }

    /// Wrap an already configured client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    type Handle = Response;

    async fn send(&self, request: &TransportRequest) -> Result<Response> {
        debug!(method = %request.verb, url = %request.url, "http request started");
        let mut builder = self
            .http
            .request(to_method(request.verb), &request.url)
            .headers(header_map(&request.headers)?);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        builder
            .send()
            .await
            .with_context(|| format!("send {} {}", request.verb, request.url))
    }

    async fn receive(&self, response: Response) -> Result<InvocationResult> {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.to_string(), value.to_string())))
            .collect::<IndexMap<_, _>>();
        let body = response
            .text()
            .await
            .with_context(|| format!("read response body from {url}"))?;
        debug!(status, url = %url, bytes = body.len(), "http response received");
        Ok(InvocationResult { status, body, headers })
    }
}

fn to_method(verb: HttpVerb) -> Method {
    match verb {
        HttpVerb::Get => Method::GET,
        HttpVerb::Post => Method::POST,
        HttpVerb::Put => Method::PUT,
        HttpVerb::Patch => Method::PATCH,
        HttpVerb::Delete => Method::DELETE,
        HttpVerb::Head => Method::HEAD,
        HttpVerb::Options => Method::OPTIONS,
    }
}

fn header_map(headers: &IndexMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("invalid header name '{name}'"))?;
        let header_value = HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{name}'"))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
