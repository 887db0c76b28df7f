//! Context Aggregator (C1, spec §4.1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::monitors::{FileEventSource, IdleMonitor, WindowMonitor};
use crate::types::{IdleLevel, Snapshot};

/// Assembly latency above this threshold is logged but not fatal (spec §4.1).
const LATENCY_WARN_MS: u64 = 100;

/// Recent-change window used for `Snapshot::recent_file_changes` (spec §4.1:
/// "the count in the last N entries of that ring, not all events since start").
const RECENT_FILE_CHANGE_WINDOW: usize = 5;

pub struct ContextAggregator {
    window: Arc<dyn WindowMonitor>,
    idle: Arc<dyn IdleMonitor>,
    files: Arc<dyn FileEventSource>,
    snapshot_count: AtomicU64,
    error_count: AtomicU64,
}

/// Point-in-time counters, exposed for the ambient health/metrics surface
/// (spec §3 supplement: mirrors the original `ContextHub.get_stats()`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStats {
    pub snapshots_collected: u64,
    pub errors: u64,
}

impl ContextAggregator {
    pub fn new(
        window: Arc<dyn WindowMonitor>,
        idle: Arc<dyn IdleMonitor>,
        files: Arc<dyn FileEventSource>,
    ) -> Self {
        Self {
            window,
            idle,
            files,
            snapshot_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Pull current values from each monitor adapter in fixed order
    /// (window -> idle -> file-events), build a Snapshot, and time the
    /// assembly. Any adapter error is caught locally: the failing field is
    /// set to absent/zero and the error counter is incremented, but
    /// assembly still returns a valid Snapshot (spec §4.1).
    pub fn snapshot(&self) -> Snapshot {
        let start = Instant::now();

        let window_info = self.window.active_window().unwrap_or_else(|e| {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "window monitor failed, using absent value");
            Default::default()
        });

        let idle_seconds = self.idle.idle_seconds().unwrap_or_else(|e| {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "idle monitor failed, using zero");
            0
        });

        let recent_file_changes = self
            .files
            .file_events(RECENT_FILE_CHANGE_WINDOW)
            .map(|events| events.len() as u32)
            .unwrap_or_else(|e| {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "file watcher failed, using zero");
                0
            });

        let snapshot_count = self.snapshot_count.fetch_add(1, Ordering::Relaxed);
        let latency_ms = start.elapsed().as_millis() as u64;

        if latency_ms > LATENCY_WARN_MS {
            tracing::warn!(latency_ms, "context snapshot assembly exceeded latency budget");
        }

        Snapshot {
            timestamp: Utc::now(),
            active_app: window_info.app_name,
            window_title: window_info.window_title,
            idle_seconds,
            idle_level: IdleLevel::from_seconds(idle_seconds),
            recent_file_changes,
            error_count: self.error_count.load(Ordering::Relaxed),
            latency_ms,
            snapshot_count,
        }
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            snapshots_collected: self.snapshot_count.load(Ordering::Relaxed),
            errors: self.error_count.load(Ordering::Relaxed),
        }
    }
}
