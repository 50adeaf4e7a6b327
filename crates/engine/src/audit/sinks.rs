//! Built-in audit sinks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dirs_next::config_dir;
use serde_json::Value;
use tether_util::{redact_headers, redact_json_value, redact_sensitive};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{AuditError, AuditRecord, AuditSink};

/// Tracing target used by [`TracingAuditSink`].
pub const AUDIT_TARGET: &str = "tether::audit";

/// `<config dir>/tether/audit.jsonl`, or relative to the working directory
/// when the platform has no config dir.
pub fn default_audit_log_path() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("audit.jsonl")
}

/// Copy of `record` with credentials masked in the URL, headers and bodies.
pub(crate) fn redact_record(record: &AuditRecord) -> AuditRecord {
    let mut redacted = record.clone();
    redacted.request.url = redact_sensitive(&record.request.url);
    redacted.request.headers = redact_headers(&record.request.headers);
    redacted.request.body = redact_body(&record.request.body);
    redacted.response.body = redact_body(&record.response.body);
    redacted
}

fn redact_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => {
            serde_json::to_string(&redact_json_value(value)).unwrap_or_else(|_| redact_sensitive(body))
        }
        _ => redact_sensitive(body),
    }
}

/// Writes each record as one JSON line on the `tether::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = redact_record(record).to_json_line()?;
        info!(target: AUDIT_TARGET, "{line}");
        Ok(())
    }
}

/// Appends redacted records to a JSONL file readable only by its owner.
#[derive(Debug)]
pub struct JsonlFileAuditSink {
    log_path: PathBuf,
    max_size: Option<u64>,
}

impl JsonlFileAuditSink {
    /// A sink writing to `log_path`, creating its parent directory.
    pub fn new(log_path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { log_path, max_size: None })
    }

    /// A sink writing to [`default_audit_log_path`].
    pub fn at_default_path() -> Result<Self, AuditError> {
        Self::new(default_audit_log_path())
    }

    /// Rotate the file once it grows past `bytes`.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The last `count` records in the current file, oldest first.
    /// Lines that fail to parse are skipped.
    pub async fn read_recent(&self, count: usize) -> Result<Vec<AuditRecord>, AuditError> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.log_path).await?;
        let mut records: Vec<AuditRecord> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();
        records.reverse();
        Ok(records)
    }

    async fn rotate_if_needed(&self) -> Result<(), AuditError> {
        let Some(max_size) = self.max_size else {
            return Ok(());
        };
        let Ok(metadata) = tokio::fs::metadata(&self.log_path).await else {
            return Ok(());
        };
        if metadata.len() <= max_size {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let rotated = self.log_path.with_extension(format!("{timestamp}.jsonl"));
        tokio::fs::rename(&self.log_path, &rotated).await?;
        debug!(from = %self.log_path.display(), to = %rotated.display(), "rotated audit log");
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlFileAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.rotate_if_needed().await?;
        let mut line = redact_record(record).to_json_line()?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.log_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps emitted records in memory, unredacted. Clones share storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records emitted so far, in emission order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit memory lock").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("audit memory lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().expect("audit memory lock").push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{RequestSnapshot, ResponseSnapshot};
    use indexmap::IndexMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn signed_record() -> AuditRecord {
        let mut headers = IndexMap::new();
        headers.insert("Signature".to_string(), "sig-123".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        AuditRecord::new(
            RequestSnapshot {
                url: "http://h/api/orders?apiKey=k-1&pair=btc".into(),
                method: "POST".into(),
                headers,
                body: "amount=1&secret=hunter2".into(),
                time: Utc::now(),
            },
            ResponseSnapshot {
                status: 200,
                body: r#"{"id":7,"token":"t-9"}"#.into(),
                time: Utc::now(),
            },
        )
    }

    #[test]
    fn redaction_masks_credentials_everywhere() {
        let redacted = redact_record(&signed_record());
        assert!(!redacted.request.url.contains("k-1"));
        assert!(redacted.request.url.contains("pair=btc"));
        assert_eq!(redacted.request.headers["Accept"], "application/json");
        assert_ne!(redacted.request.headers["Signature"], "sig-123");
        assert!(!redacted.request.body.contains("hunter2"));
        assert!(redacted.request.body.contains("amount=1"));
        assert!(!redacted.response.body.contains("t-9"));
        assert!(redacted.response.body.contains("\"id\":7"));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_redacted_lines() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlFileAuditSink::new(dir.path().join("nested/audit.jsonl")).unwrap();

        sink.emit(&signed_record()).await.unwrap();
        sink.emit(&signed_record()).await.unwrap();

        let content = std::fs::read_to_string(sink.log_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("sig-123"));

        let recent = sink.read_recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].response.status, 200);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(sink.log_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn jsonl_sink_rotates_large_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut seed = std::fs::File::create(&path).unwrap();
        seed.write_all(&[b'x'; 64]).unwrap();

        let sink = JsonlFileAuditSink::new(&path).unwrap().with_max_size(32);
        sink.emit(&signed_record()).await.unwrap();

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2);
        assert_eq!(sink.read_recent(10).await.unwrap().len(), 1);
    }

    #[test]
    fn default_path_lives_under_a_tether_directory() {
        let path = default_audit_log_path();
        assert!(path.ends_with("tether/audit.jsonl"));
    }

    #[tokio::test]
    async fn read_recent_without_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlFileAuditSink::new(dir.path().join("missing.jsonl")).unwrap();
        assert!(sink.read_recent(5).await.unwrap().is_empty());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tracing_sink_logs_one_line_on_the_audit_target() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        TracingAuditSink.emit(&signed_record()).await.unwrap();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains(AUDIT_TARGET));
        assert!(output.contains("\"status\":200"));
        assert!(!output.contains("sig-123"));
    }
}
