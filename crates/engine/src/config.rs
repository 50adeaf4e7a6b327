//! Client behaviour settings.

use std::env;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_types::WireKind;
use thiserror::Error;

use crate::audit::AuditSettings;
use crate::builder::RequestSigner;
use crate::coordinator::DEFAULT_RECEIVE_POOL_SIZE;

pub const IGNORE_HTTP_ERROR_CODES_ENV: &str = "TETHER_IGNORE_HTTP_ERROR_CODES";
pub const WRAP_UNEXPECTED_ERRORS_ENV: &str = "TETHER_WRAP_UNEXPECTED_ERRORS";
pub const RECEIVE_POOL_SIZE_ENV: &str = "TETHER_RECEIVE_POOL_SIZE";

/// Values used when an argument is absent, keyed by wire location and name.
pub type DefaultParams = IndexMap<WireKind, IndexMap<String, Value>>;

/// Post-processes a successfully read response before it is mapped to the
/// caller's result type.
pub type ResultInterceptor = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read and return non-2xx responses instead of failing with a status error.
    pub ignore_http_error_codes: bool,
    /// Wrap errors that carry no invocation context in [`RestError::Wrapped`](crate::RestError::Wrapped).
    pub wrap_unexpected_errors: bool,
    pub receive_pool_size: usize,
    pub default_params: DefaultParams,
    pub audit: AuditSettings,
    #[serde(skip)]
    pub result_interceptor: Option<ResultInterceptor>,
    #[serde(skip)]
    pub request_signer: Option<Arc<dyn RequestSigner>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ignore_http_error_codes: false,
            wrap_unexpected_errors: true,
            receive_pool_size: DEFAULT_RECEIVE_POOL_SIZE,
            default_params: DefaultParams::new(),
            audit: AuditSettings::default(),
            result_interceptor: None,
            request_signer: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `TETHER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|name| env::var(name).ok())
    }

    /// Parse settings from YAML or JSON.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlay values produced by `lookup` (an environment-like source).
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(IGNORE_HTTP_ERROR_CODES_ENV) {
            self.ignore_http_error_codes = parse_bool(IGNORE_HTTP_ERROR_CODES_ENV, &raw)?;
        }
        if let Some(raw) = lookup(WRAP_UNEXPECTED_ERRORS_ENV) {
            self.wrap_unexpected_errors = parse_bool(WRAP_UNEXPECTED_ERRORS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(RECEIVE_POOL_SIZE_ENV) {
            self.receive_pool_size = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| ConfigError::InvalidEnvValue {
                    name: RECEIVE_POOL_SIZE_ENV.to_string(),
                    value: raw.clone(),
                })?;
        }
        Ok(self)
    }

    pub fn ignore_http_error_codes(mut self, ignore: bool) -> Self {
        self.ignore_http_error_codes = ignore;
        self
    }

    pub fn wrap_unexpected_errors(mut self, wrap: bool) -> Self {
        self.wrap_unexpected_errors = wrap;
        self
    }

    pub fn receive_pool_size(mut self, size: usize) -> Self {
        self.receive_pool_size = size;
        self
    }

    pub fn with_default_param(mut self, location: WireKind, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_params.entry(location).or_default().insert(name.into(), value.into());
        self
    }

    pub fn with_audit(mut self, audit: AuditSettings) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_result_interceptor(
        mut self,
        interceptor: impl Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.result_interceptor = Some(Arc::new(interceptor));
        self
    }

    pub fn with_request_signer(mut self, signer: impl RequestSigner + 'static) -> Self {
        self.request_signer = Some(Arc::new(signer));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("ignore_http_error_codes", &self.ignore_http_error_codes)
            .field("wrap_unexpected_errors", &self.wrap_unexpected_errors)
            .field("receive_pool_size", &self.receive_pool_size)
            .field("default_params", &self.default_params)
            .field("audit", &self.audit)
            .field("result_interceptor", &self.result_interceptor.is_some())
            .field("request_signer", &self.request_signer.is_some())
            .finish()
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvValue {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnvValue { name: String, value: String },

    #[error("failed to parse client configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}
