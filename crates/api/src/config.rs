//! Transport configuration.
//!
//! Values come from code, from serde (YAML/JSON config files owned by the
//! embedding application), or from `TETHER_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const CONNECT_TIMEOUT_ENV: &str = "TETHER_CONNECT_TIMEOUT_SECS";
pub const READ_TIMEOUT_ENV: &str = "TETHER_READ_TIMEOUT_SECS";
pub const PROXY_HOST_ENV: &str = "TETHER_PROXY_HOST";
pub const PROXY_PORT_ENV: &str = "TETHER_PROXY_PORT";

const DEFAULT_PROXY_PORT: u16 = 80;

/// Options for the physical HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    /// PEM files added to the trusted root store.
    pub root_certificates: Vec<PathBuf>,
    /// Disable certificate and hostname verification. Test servers only.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
    /// Headers sent with every request unless the request overrides them.
    pub default_headers: IndexMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            read_timeout_ms: None,
            proxy_host: None,
            proxy_port: None,
            root_certificates: Vec::new(),
            accept_invalid_certs: false,
            user_agent: format!("tether/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
            default_headers: IndexMap::new(),
        }
    }
}

impl TransportConfig {
    /// Defaults overlaid with `TETHER_*` environment variables.
    pub fn from_env() -> Result<Self, TransportConfigError> {
        Self::default().overlay(|name| env::var(name).ok())
    }

    /// Overlay values produced by `lookup` (an environment-like source).
    ///
    /// # Errors
    /// Returns [`TransportConfigError::InvalidEnvValue`] when a numeric
    /// variable does not parse. Timeout variables are whole seconds.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransportConfigError> {
        if let Some(secs) = parse_var::<u64>(&lookup, CONNECT_TIMEOUT_ENV)? {
            self.connect_timeout_ms = Some(secs.saturating_mul(1000));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, READ_TIMEOUT_ENV)? {
            self.read_timeout_ms = Some(secs.saturating_mul(1000));
        }
        if let Some(host) = lookup(PROXY_HOST_ENV).filter(|host| !host.trim().is_empty()) {
            self.proxy_host = Some(host.trim().to_string());
        }
        if let Some(port) = parse_var(&lookup, PROXY_PORT_ENV)? {
            self.proxy_port = Some(port);
        }
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(duration_millis(timeout));
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(duration_millis(timeout));
        self
    }

    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port);
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Proxy URL assembled from host and port, if a host is configured.
    ///
    /// # Errors
    /// A port without a host is rejected as an incomplete proxy setting.
    pub fn proxy_url(&self) -> Result<Option<String>, TransportConfigError> {
        match (&self.proxy_host, self.proxy_port) {
            (Some(host), port) => {
                let port = port.unwrap_or(DEFAULT_PROXY_PORT);
                let url = if host.contains("://") {
                    format!("{host}:{port}")
                } else {
                    format!("http://{host}:{port}")
                };
                Ok(Some(url))
            }
            (None, Some(_)) => Err(TransportConfigError::IncompleteProxy),
            (None, None) => Ok(None),
        }
    }

    /// Read the configured root certificate files.
    pub fn load_root_certificates(&self) -> Result<Vec<Vec<u8>>, TransportConfigError> {
        self.root_certificates
            .iter()
            .map(|path| {
                fs::read(path).map_err(|source| TransportConfigError::UnreadableCertificate {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// Whole milliseconds, rounding sub-millisecond remainders up so a non-zero
/// timeout never becomes zero.
fn duration_millis(timeout: Duration) -> u64 {
    let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, TransportConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| TransportConfigError::InvalidEnvValue {
            name: name.to_string(),
            value: raw,
        })
}

/// Validate that a base URL can be used by a client.
///
/// Rules:
/// - the URL parses
/// - the scheme is `http` or `https`
/// - a host is present
pub fn validate_base_url(base: &str) -> Result<Url, TransportConfigError> {
    let invalid = |reason: String| TransportConfigError::InvalidBaseUrl {
        url: base.to_string(),
        reason,
    };
    let parsed = Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(parsed)
}

/// Errors raised while assembling transport settings.
#[derive(Debug, Error)]
pub enum TransportConfigError {
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnvValue { name: String, value: String },

    #[error("proxy port configured without a proxy host")]
    IncompleteProxy,

    #[error("cannot read root certificate {}: {source}", path.display())]
    UnreadableCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}
