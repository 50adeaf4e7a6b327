//! Time-ordered audit of request/response pairs.
//!
//! Every completed or failed call produces one [`AuditRecord`]. Records are
//! handed to an [`AuditLogger`], which buffers them briefly and emits them to
//! an [`AuditSink`] in order of response completion.

mod logger;
mod sinks;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logger::AuditLogger;
pub use sinks::{AUDIT_TARGET, JsonlFileAuditSink, MemoryAuditSink, TracingAuditSink, default_audit_log_path};

/// The request half of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub url: String,
    pub method: String,
    pub headers: IndexMap<String, String>,
    pub body: String,
    pub time: DateTime<Utc>,
}

/// The response half of an audit record.
///
/// Calls that failed before a response arrived carry status `0` and the
/// error message as body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub body: String,
    pub time: DateTime<Utc>,
}

/// One request/response pair, serialized as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
}

impl AuditRecord {
    pub fn new(request: RequestSnapshot, response: ResponseSnapshot) -> Self {
        Self { request, response }
    }

    /// Completion time of the response; the ordering key.
    pub fn arrival(&self) -> DateTime<Utc> {
        self.response.time
    }

    pub fn to_json_line(&self) -> Result<String, AuditError> {
        serde_json::to_string(self).map_err(AuditError::Serialization)
    }
}

/// Buffering parameters for the audit logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// How often the background task looks for records to emit.
    pub flush_interval_ms: u64,
    /// Minimum age of a record before it is emitted.
    pub buffer_window_ms: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            flush_interval_ms: 250,
            buffer_window_ms: 1000,
        }
    }
}

impl AuditSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn buffer_window(&self) -> Duration {
        Duration::from_millis(self.buffer_window_ms)
    }
}

/// Destination for emitted audit records.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("the audit logger needs a running Tokio runtime")]
    NoRuntime,

    #[error("audit sink rejected the record: {0}")]
    Sink(String),
}
