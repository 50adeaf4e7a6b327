use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{AuditError, AuditRecord, AuditSettings, AuditSink};

struct Pending {
    arrival: DateTime<Utc>,
    sequence: u64,
    record: AuditRecord,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.arrival, self.sequence).cmp(&(other.arrival, other.sequence))
    }
}

struct Shared {
    sink: Arc<dyn AuditSink>,
    settings: AuditSettings,
    pending: Mutex<BinaryHeap<Reverse<Pending>>>,
    emit_gate: tokio::sync::Mutex<Option<DateTime<Utc>>>,
    sequence: AtomicU64,
    emitted: AtomicU64,
    ordering_violations: AtomicU64,
    sink_failures: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    /// Emit every buffered record that arrived at or before `cutoff`
    /// (everything when `cutoff` is `None`), oldest first.
    async fn drain(&self, cutoff: Option<DateTime<Utc>>) {
        let mut high_water = self.emit_gate.lock().await;
        let ready = {
            let mut pending = self.pending.lock().expect("audit buffer lock");
            let mut ready = Vec::new();
            while let Some(Reverse(oldest)) = pending.peek() {
                if cutoff.is_some_and(|cutoff| oldest.arrival > cutoff) {
                    break;
                }
                if let Some(Reverse(entry)) = pending.pop() {
                    ready.push(entry);
                }
            }
            ready
        };
        if !ready.is_empty() {
            trace!(count = ready.len(), "flushing audit records");
        }

        for entry in ready {
            if let Some(last) = *high_water
                && entry.arrival < last
            {
                self.ordering_violations.fetch_add(1, Ordering::Relaxed);
                warn!(
                    arrival = %entry.arrival,
                    last_emitted = %last,
                    url = %entry.record.request.url,
                    "audit record emitted out of order"
                );
            }
            *high_water = Some(high_water.map_or(entry.arrival, |last| last.max(entry.arrival)));

            match self.sink.emit(&entry.record).await {
                Ok(()) => {
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    self.sink_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %error, url = %entry.record.request.url, "audit sink failed");
                }
            }
        }
    }
}

/// Buffers audit records and emits them to a sink in arrival order.
///
/// A background task wakes every `flush_interval` and emits the records
/// older than `buffer_window`. A record that shows up after a newer one was
/// already emitted is still emitted, and counted in
/// [`ordering_violations`](Self::ordering_violations).
pub struct AuditLogger {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Start the logger's background task on the current Tokio runtime.
    ///
    /// # Errors
    /// [`AuditError::NoRuntime`] when called outside a runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, settings: AuditSettings) -> Result<Self, AuditError> {
        let runtime = Handle::try_current().map_err(|_| AuditError::NoRuntime)?;
        let shared = Arc::new(Shared {
            sink,
            settings,
            pending: Mutex::new(BinaryHeap::new()),
            emit_gate: tokio::sync::Mutex::new(None),
            sequence: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            ordering_violations: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run(Arc::clone(&shared), cancel.clone()));
        debug!(
            flush_interval_ms = shared.settings.flush_interval_ms,
            buffer_window_ms = shared.settings.buffer_window_ms,
            "audit logger started"
        );

        Ok(Self {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Queue a record for emission. Never blocks on the sink.
    ///
    /// Once the logger has been shut down nothing drains the buffer, so the
    /// record is discarded and counted in [`dropped`](Self::dropped).
    pub fn submit(&self, record: AuditRecord) {
        if self.cancel.is_cancelled() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(url = %record.request.url, "audit logger stopped; record dropped");
            return;
        }
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let arrival = record.arrival();
        self.shared
            .pending
            .lock()
            .expect("audit buffer lock")
            .push(Reverse(Pending {
                arrival,
                sequence,
                record,
            }));
    }

    /// Emit everything buffered now, regardless of age.
    pub async fn flush(&self) {
        self.shared.drain(None).await;
    }

    /// Stop the background task after emitting every buffered record.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("audit task lock").take();
        if let Some(task) = task
            && let Err(error) = task.await
        {
            warn!(error = %error, "audit task ended abnormally");
        }
        self.shared.drain(None).await;
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.lock().expect("audit buffer lock").len()
    }

    pub fn emitted(&self) -> u64 {
        self.shared.emitted.load(Ordering::Relaxed)
    }

    pub fn ordering_violations(&self) -> u64 {
        self.shared.ordering_violations.load(Ordering::Relaxed)
    }

    pub fn sink_failures(&self) -> u64 {
        self.shared.sink_failures.load(Ordering::Relaxed)
    }

    /// Records discarded because they were submitted after shutdown.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> &AuditSettings {
        &self.shared.settings
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("settings", &self.shared.settings)
            .field("pending", &self.pending())
            .field("emitted", &self.emitted())
            .field("ordering_violations", &self.ordering_violations())
            .field("sink_failures", &self.sink_failures())
            .field("dropped", &self.dropped())
            .finish()
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let window = TimeDelta::from_std(shared.settings.buffer_window()).unwrap_or(TimeDelta::MAX);
    let mut ticker = tokio::time::interval(shared.settings.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let cutoff = Utc::now().checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
                shared.drain(Some(cutoff)).await;
            }
        }
    }
    shared.drain(None).await;
    debug!("audit logger stopped");
}
