//! The invocation engine.
//!
//! A [`RestClient`] owns everything one API needs at runtime: the contract
//! cache, the validated injection providers, the content-type table, the
//! coordinator and (optionally) an audit logger. Each call runs in stages:
//!
//! 1. resolve the method contract and concatenate explicit and injected args
//! 2. build the [`Invocation`] and hand it to the transport, both while
//!    holding the call's [`LockKey`] if it has one
//! 3. read, check and audit the response on the bounded receive pool
//! 4. map the body to the caller's type and classify failures

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_api::{ReqwestTransport, Transport, TransportConfig, TransportRequest, validate_base_url};
use tether_types::{ApiDescriptor, Invocation, InvocationResult, MethodContract, MethodId};
use tether_util::block_on_future;
use tracing::{debug, warn};

use crate::args::{ArgValue, LockKey};
use crate::audit::{AuditLogger, AuditRecord, AuditSink, RequestSnapshot, ResponseSnapshot};
use crate::builder::RequestBuilder;
use crate::config::ClientConfig;
use crate::contract_cache::{ContractSource, DescriptorSource, MethodContractCache};
use crate::coordinator::Coordinator;
use crate::error::{CodecDirection, DecodeError, HttpStatusError, RestError, ValidationError};
use crate::injection::{InjectionRegistry, ProviderRegistry};
use crate::negotiation::ContentNegotiation;

enum AuditTarget {
    Disabled,
    Sink(Arc<dyn AuditSink>),
    Shared(Arc<AuditLogger>),
}

/// Assembles and validates a [`RestClient`].
///
/// # Example
///
/// ```ignore
/// let client = RestClientBuilder::new(api, "https://api.example.com")
///     .providers(ProviderRegistry::new().with("Signature", signer))
///     .audit_sink(TracingAuditSink)
///     .build(ReqwestTransport::new(&TransportConfig::from_env()?)?)?;
/// let account: Account = client.invoke(&MethodId::new("account"), vec![]).await?;
/// ```
pub struct RestClientBuilder {
    api: ApiDescriptor,
    base_url: String,
    providers: ProviderRegistry,
    config: ClientConfig,
    negotiation: ContentNegotiation,
    audit: AuditTarget,
    contract_source: Option<Arc<dyn ContractSource>>,
}

impl RestClientBuilder {
    pub fn new(api: ApiDescriptor, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into(),
            providers: ProviderRegistry::new(),
            config: ClientConfig::default(),
            negotiation: ContentNegotiation::default(),
            audit: AuditTarget::Disabled,
            contract_source: None,
        }
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn negotiation(mut self, negotiation: ContentNegotiation) -> Self {
        self.negotiation = negotiation;
        self
    }

    /// Audit every call to `sink` through a logger owned by this client.
    pub fn audit_sink(mut self, sink: impl AuditSink) -> Self {
        self.audit = AuditTarget::Sink(Arc::new(sink));
        self
    }

    /// Audit every call through an existing logger, possibly shared with
    /// other clients.
    pub fn audit_logger(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit = AuditTarget::Shared(logger);
        self
    }

    /// Replace the descriptor-backed contract derivation.
    pub fn contract_source(mut self, source: Arc<dyn ContractSource>) -> Self {
        self.contract_source = Some(source);
        self
    }

    /// Validate the configuration and create the client.
    ///
    /// # Errors
    /// - the API description is inconsistent
    /// - the base URL is not an absolute http(s) URL
    /// - the providers do not match the declared injectables
    /// - an audit sink was given but no Tokio runtime is running
    pub fn build<T: Transport>(self, transport: T) -> Result<RestClient<T>, ValidationError> {
        self.api.validate()?;
        validate_base_url(&self.base_url)?;
        let base_url = self.base_url.trim_end_matches('/').to_string();
        let injections = InjectionRegistry::new(self.providers, &self.api)?;

        let audit = match self.audit {
            AuditTarget::Disabled => None,
            AuditTarget::Sink(sink) => Some(Arc::new(AuditLogger::spawn(sink, self.config.audit.clone())?)),
            AuditTarget::Shared(logger) => Some(logger),
        };
        let source = self
            .contract_source
            .unwrap_or_else(|| Arc::new(DescriptorSource::new(self.api.clone(), base_url.clone())));

        debug!(
            api = %self.api.name,
            base_url = %base_url,
            methods = self.api.methods.len(),
            receive_pool_size = self.config.receive_pool_size,
            audit = audit.is_some(),
            "rest client created"
        );

        Ok(RestClient {
            inner: Arc::new(ClientInner {
                api_name: self.api.name,
                base_url,
                contracts: MethodContractCache::new(source),
                injections,
                negotiation: self.negotiation,
                coordinator: Coordinator::new(self.config.receive_pool_size),
                config: self.config,
                audit,
                transport,
            }),
        })
    }

    /// [`build`](Self::build) with a [`ReqwestTransport`] configured by
    /// `transport_config`.
    pub fn build_reqwest(self, transport_config: &TransportConfig) -> anyhow::Result<RestClient<ReqwestTransport>> {
        let transport = ReqwestTransport::new(transport_config)?;
        Ok(self.build(transport)?)
    }
}

/// Runtime for one described API.
///
/// Cloning is cheap; clones share the cache, pool and audit logger.
pub struct RestClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for RestClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for RestClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("api", &self.inner.api_name)
            .field("base_url", &self.inner.base_url)
            .field("contracts", &self.inner.contracts)
            .field("coordinator", &self.inner.coordinator)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T: Transport> RestClient<T> {
    /// Invoke `method` with the caller's explicit arguments and map the
    /// response body to `R`.
    ///
    /// Missing trailing arguments are treated as absent. Arguments beyond the
    /// method's arity are not placed on the wire but still count when looking
    /// for the call's [`LockKey`].
    ///
    /// # Errors
    /// See [`RestError`]. With `wrap_unexpected_errors` set, errors that do
    /// not carry invocation context arrive as [`RestError::Wrapped`].
    pub async fn invoke<R: DeserializeOwned>(&self, method: &MethodId, args: Vec<ArgValue>) -> Result<R, RestError> {
        let inner = &self.inner;
        let wrap = inner.config.wrap_unexpected_errors;
        let started = Instant::now();

        let contract = inner
            .contracts
            .resolve(method)
            .map_err(|error| error.classify(method, None, None, wrap))?;
        let args = inner.assemble_args(&contract, args);
        let lock_key = args.iter().find_map(ArgValue::lock_key).cloned();
        let lock_id = lock_key.as_ref().map(LockKey::id);

        let (invocation, request_time, handle) = {
            let _guard = inner.coordinator.enter_dispatch(lock_key.as_ref()).await;
            let invocation = match inner.build(&contract, &args) {
                Ok(invocation) => invocation,
                Err(error) => {
                    debug!(method = %method, error = %error, "build failed; nothing dispatched or audited");
                    return Err(error.classify(method, None, None, wrap));
                }
            };
            let request_time = Utc::now();
            let request = TransportRequest::from(&invocation);
            debug!(method = %method, verb = %invocation.verb, url = %invocation.url, lock_key = ?lock_id, "dispatching request");
            match inner.transport.send(&request).await {
                Ok(handle) => (invocation, request_time, handle),
                Err(source) => {
                    let error = RestError::Transport(source);
                    warn!(
                        method = %method,
                        url = %invocation.url,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %error,
                        "dispatch failed"
                    );
                    if let Some(request) = inner.request_snapshot(&invocation, request_time) {
                        inner.record_audit(request, 0, error.to_string(), Utc::now());
                    }
                    return Err(error.classify(method, Some(&invocation), None, wrap));
                }
            }
        };

        // The receive task audits its own outcome so the record survives a
        // caller that stops awaiting this future.
        let receiver = Arc::clone(&self.inner);
        let produces = contract.produces.clone();
        let request = inner.request_snapshot(&invocation, request_time);
        let received = inner
            .coordinator
            .spawn_receive(async move {
                let outcome = receiver.receive(handle, &produces).await;
                if let Some(request) = request {
                    receiver.audit_outcome(request, &outcome);
                }
                outcome
            })
            .await
            .unwrap_or_else(|join_error| {
                let error = RestError::Transport(anyhow!("receive task failed: {join_error}"));
                if let Some(request) = inner.request_snapshot(&invocation, request_time) {
                    inner.record_audit(request, 0, error.to_string(), Utc::now());
                }
                Err(ReceiveFailure {
                    error,
                    response: None,
                    time: Utc::now(),
                })
            });

        match received {
            Ok(Received { response, value, .. }) => {
                debug!(
                    method = %method,
                    url = %invocation.url,
                    status = response.status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "call completed"
                );
                inner
                    .map_result::<R>(value, &response)
                    .map_err(|error| error.classify(method, Some(&invocation), Some(&response.headers), wrap))
            }
            Err(ReceiveFailure { error, response, .. }) => {
                let status = response.as_ref().map_or(0, |response| response.status);
                warn!(
                    method = %method,
                    url = %invocation.url,
                    status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                    "call failed"
                );
                let headers = response.as_ref().map(|response| &response.headers);
                Err(error.classify(method, Some(&invocation), headers, wrap))
            }
        }
    }

    /// Blocking form of [`invoke`](Self::invoke) for synchronous callers.
    ///
    /// Inside a multi-threaded runtime the call runs in place; outside any
    /// runtime a temporary one is created. A current-thread runtime cannot
    /// block and yields [`RestError::Transport`].
    pub fn invoke_blocking<R>(&self, method: &MethodId, args: Vec<ArgValue>) -> Result<R, RestError>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        let method = method.clone();
        block_on_future(async move { client.invoke::<R>(&method, args).await }).map_err(RestError::Transport)?
    }

    /// The cached contract for `method`.
    pub fn contract(&self, method: &MethodId) -> Result<Arc<MethodContract>, RestError> {
        self.inner.contracts.resolve(method)
    }

    pub fn contract_cache(&self) -> &MethodContractCache {
        &self.inner.contracts
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn audit_logger(&self) -> Option<&Arc<AuditLogger>> {
        self.inner.audit.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Flush and stop the audit logger, if any. Calls made afterwards are
    /// not audited.
    pub async fn shutdown(&self) {
        if let Some(logger) = &self.inner.audit {
            logger.shutdown().await;
        }
    }
}

struct ClientInner<T: Transport> {
    api_name: String,
    base_url: String,
    contracts: MethodContractCache,
    injections: InjectionRegistry,
    negotiation: ContentNegotiation,
    coordinator: Coordinator,
    config: ClientConfig,
    audit: Option<Arc<AuditLogger>>,
    transport: T,
}

struct Received {
    response: InvocationResult,
    value: Value,
    time: DateTime<Utc>,
}

struct ReceiveFailure {
    error: RestError,
    response: Option<InvocationResult>,
    time: DateTime<Utc>,
}

impl<T: Transport> ClientInner<T> {
    /// Explicit args padded to the method's arity, then injected values,
    /// then any surplus caller args.
    fn assemble_args(&self, contract: &MethodContract, mut args: Vec<ArgValue>) -> Vec<ArgValue> {
        let arity = contract.explicit_arity();
        let surplus = if args.len() > arity { args.split_off(arity) } else { Vec::new() };
        args.resize_with(arity, || ArgValue::Absent);
        args.extend(self.injections.injected_args(contract));
        args.extend(surplus);
        args
    }

    fn build(&self, contract: &MethodContract, args: &[ArgValue]) -> Result<Invocation, RestError> {
        RequestBuilder {
            contract,
            injections: &self.injections,
            negotiation: &self.negotiation,
            defaults: &self.config.default_params,
            signer: self.config.request_signer.as_deref(),
        }
        .build(args)
    }

    async fn receive(&self, handle: T::Handle, produces: &str) -> Result<Received, ReceiveFailure> {
        let response = match self.transport.receive(handle).await {
            Ok(response) => response,
            Err(source) => {
                return Err(ReceiveFailure {
                    error: RestError::Transport(source),
                    response: None,
                    time: Utc::now(),
                });
            }
        };
        let time = Utc::now();

        if !response.is_success() && !self.config.ignore_http_error_codes {
            let error = HttpStatusError::new(response.status, response.body.clone());
            return Err(ReceiveFailure {
                error: error.into(),
                response: Some(response),
                time,
            });
        }

        let content_type = response.content_type().unwrap_or(produces).to_string();
        let Some(reader) = self.negotiation.reader(&content_type) else {
            return Err(ReceiveFailure {
                error: RestError::UnsupportedContentType {
                    content_type,
                    direction: CodecDirection::Response,
                },
                response: Some(response),
                time,
            });
        };

        match reader.read(&response.body, response.status) {
            Ok(value) => Ok(Received { response, value, time }),
            Err(source) => Err(ReceiveFailure {
                error: DecodeError::new(content_type, response.body.clone(), source).into(),
                response: Some(response),
                time,
            }),
        }
    }

    fn map_result<R: DeserializeOwned>(&self, value: Value, response: &InvocationResult) -> Result<R, RestError> {
        let value = match &self.config.result_interceptor {
            Some(interceptor) => interceptor(value).map_err(RestError::Interceptor)?,
            None => value,
        };
        serde_json::from_value::<R>(value)
            .map_err(|source| DecodeError::new(type_name::<R>(), response.body.clone(), source.into()).into())
    }

    /// Request half of an audit record, or `None` when auditing is off.
    fn request_snapshot(&self, invocation: &Invocation, request_time: DateTime<Utc>) -> Option<RequestSnapshot> {
        self.audit.as_ref()?;
        Some(RequestSnapshot {
            url: invocation.url.clone(),
            method: invocation.verb.to_string(),
            headers: invocation.headers.clone(),
            body: invocation.body.clone(),
            time: request_time,
        })
    }

    /// Audit a finished receive. Failures without a response are recorded
    /// with status 0 and the error text as body.
    fn audit_outcome(&self, request: RequestSnapshot, outcome: &Result<Received, ReceiveFailure>) {
        let (status, body, time) = match outcome {
            Ok(received) => (received.response.status, received.response.body.clone(), received.time),
            Err(ReceiveFailure {
                response: Some(response),
                time,
                ..
            }) => (response.status, response.body.clone(), *time),
            Err(ReceiveFailure { error, time, .. }) => (0, error.to_string(), *time),
        };
        self.record_audit(request, status, body, time);
    }

    fn record_audit(&self, request: RequestSnapshot, status: u16, body: String, response_time: DateTime<Utc>) {
        let Some(logger) = &self.audit else {
            return;
        };
        logger.submit(AuditRecord::new(
            request,
            ResponseSnapshot {
                status,
                body,
                time: response_time,
            },
        ));
    }
}
