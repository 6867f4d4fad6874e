// Engine readiness state and the session status facade
//
// EngineReadiness is shared by every request against one engine. Its fields
// are plain atomics so a cancelled request can never leave it half-updated;
// only the initialization critical section is guarded by a mutex.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct EngineReadiness {
    initialized: AtomicBool,
    transcoder_available: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Unix millis of the last failure, 0 when none
    last_failure_ms: AtomicI64,
    init_lock: Mutex<()>,
}

impl EngineReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn transcoder_available(&self) -> bool {
        self.transcoder_available.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_failure(&self) -> Option<OffsetDateTime> {
        match self.last_failure_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok(),
        }
    }

    /// Time left in the cooldown window, if a failure is still recent
    pub fn cooldown_remaining(&self, cooldown: Duration) -> Option<Duration> {
        let last = self.last_failure_ms.load(Ordering::SeqCst);
        if last == 0 {
            return None;
        }
        let elapsed = u64::try_from(now_millis() - last).unwrap_or(0);
        let window = cooldown.as_millis() as u64;
        (elapsed < window).then(|| Duration::from_millis(window - elapsed))
    }

    pub(crate) async fn lock_init(&self) -> MutexGuard<'_, ()> {
        self.init_lock.lock().await
    }

    pub(crate) fn mark_ready(&self, transcoder_available: bool) {
        self.transcoder_available.store(transcoder_available, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.last_failure_ms.store(0, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        info!(transcoder_available, "Engine initialized");
    }

    /// Record an engine crash event; returns the new consecutive count.
    pub(crate) fn record_failure(&self, max_failures: u32) -> u32 {
        self.last_failure_ms.store(now_millis().max(1), Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= max_failures {
            error!(failures, "Too many engine failures, entering recovery mode");
        } else {
            warn!(failures, "Engine failure recorded");
        }
        failures
    }

    /// Zero the failure counter and clear the cooldown
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.last_failure_ms.store(0, Ordering::SeqCst);
        info!("Engine failure counter reset");
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Serializable view of the readiness state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub initialized: bool,
    pub failures: u32,
    pub last_failure: Option<String>,
}

/// Read/reset facade over the shared readiness state
#[derive(Debug, Clone)]
pub struct SessionStatus {
    readiness: Arc<EngineReadiness>,
}

impl SessionStatus {
    pub fn new(readiness: Arc<EngineReadiness>) -> Self {
        Self { readiness }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_initialized()
    }

    pub fn failure_count(&self) -> u32 {
        self.readiness.failure_count()
    }

    pub fn last_failure(&self) -> Option<OffsetDateTime> {
        self.readiness.last_failure()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            initialized: self.is_ready(),
            failures: self.failure_count(),
            last_failure: self.last_failure().and_then(|t| t.format(&Rfc3339).ok()),
        }
    }

    /// "Initialized: <bool>, Failures: <n>[, Last failure: <rfc3339>]"
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut summary = format!(
            "Initialized: {}, Failures: {}",
            snapshot.initialized, snapshot.failures
        );
        if let Some(at) = snapshot.last_failure {
            summary.push_str(&format!(", Last failure: {}", at));
        }
        summary
    }

    pub fn reset(&self) {
        self.readiness.reset();
    }
}
