//! # Tether Engine
//!
//! Turns calls on a described REST API into HTTP requests and decoded
//! results. An API is described once as an [`ApiDescriptor`]; a
//! [`RestClient`] then validates the caller's injection providers against it
//! and serves `invoke` calls.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tether_engine::{ArgValue, FnProvider, ProviderRegistry, RestClientBuilder};
//! use tether_api::TransportConfig;
//! use tether_types::{ApiDescriptor, InjectableBinding, MethodDescriptor, MethodId, ValueType, WireKind};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let api = ApiDescriptor::new("Exchange")
//!     .with_injectable(InjectableBinding::new("Signature", ValueType::String, [WireKind::Header]))
//!     .with_method(MethodDescriptor::get("ticker", "/ticker/{pair}").with_param(WireKind::Path, "pair"));
//!
//! let providers = ProviderRegistry::new().with("Signature", FnProvider::header("Signature", || "sig".into()));
//! let client = RestClientBuilder::new(api, "https://api.example.com")
//!     .providers(providers)
//!     .build_reqwest(&TransportConfig::from_env()?)?;
//!
//! let ticker: serde_json::Value = client.invoke(&MethodId::new("ticker"), vec![ArgValue::from("btc_usd")]).await?;
//! println!("{ticker}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`contract_cache`**: memoized per-method contracts
//! - **`injection`**: provider trait, registry and construction-time validation
//! - **`builder`**: argument placement, digests and signing
//! - **`negotiation`**: request writers and response readers by content type
//! - **`coordinator`**: per-key dispatch locking and the bounded receive pool
//! - **`client`**: the staged invocation pipeline
//! - **`audit`**: time-ordered request/response audit records

pub mod args;
pub mod audit;
pub mod builder;
pub mod client;
pub mod config;
pub mod contract_cache;
pub mod coordinator;
pub mod error;
pub mod injection;
pub mod negotiation;

pub use args::{ArgValue, IncreasingNonceFactory, LockKey, ParamsDigest, SynchronizedValueFactory};
pub use audit::{
    AUDIT_TARGET, AuditError, AuditLogger, AuditRecord, AuditSettings, AuditSink, JsonlFileAuditSink, MemoryAuditSink,
    RequestSnapshot, ResponseSnapshot, TracingAuditSink, default_audit_log_path,
};
pub use builder::{RequestDraft, RequestSigner};
pub use client::{RestClient, RestClientBuilder};
pub use config::{ClientConfig, ConfigError, DefaultParams, ResultInterceptor};
pub use contract_cache::{ContractSource, DescriptorSource, MethodContractCache};
pub use coordinator::{Coordinator, DEFAULT_RECEIVE_POOL_SIZE};
pub use error::{CodecDirection, DecodeError, ErrorContext, HttpStatusError, RestError, ValidationError};
pub use injection::{FnProvider, InjectionRegistry, Provider, ProviderRegistry};
pub use negotiation::{
    ContentNegotiation, FormRequestWriter, JsonRequestWriter, JsonResponseReader, RequestPayload, RequestWriter,
    ResponseReader, TextRequestWriter, TextResponseReader,
};

pub use tether_types::{ApiDescriptor, Invocation, InvocationResult, MethodContract, MethodId};
