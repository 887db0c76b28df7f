//! Monitor adapters (C0, spec §6 "Monitor interfaces").
//!
//! Spec §1 treats these as external collaborators: platform-specific
//! foreground-window lookup, the idle-time system call, and the filesystem
//! event source are explicitly out of scope. This module supplies the
//! capability-interface boundary (spec §9: "not a class hierarchy") plus
//! portable, announce-driven implementations that let the pipeline run
//! standalone — a real deployment wires a platform shell that calls
//! `announce_*` whenever it observes the real system event.

mod file_watcher;
mod idle;
mod window;

pub use file_watcher::{FileEvent, FileEventKind, RingFileWatcher};
pub use idle::SystemIdleMonitor;
pub use window::{ActiveWindowInfo, AnnouncedWindowMonitor};

use thiserror::Error;

/// A monitor-adapter failure (spec §7: "Monitor-adapter failure (transient)").
/// The adapters shipped in this crate are announce-driven and infallible, but
/// the trait returns `Result` so a real platform hook (foreground-window
/// lookup, idle system call, filesystem watch) can report failure without
/// changing the call boundary.
#[derive(Debug, Error)]
#[error("monitor adapter failure: {0}")]
pub struct MonitorError(pub String);

/// `active_window() -> {app_name?, window_title?, pid?, exe_path?, changed}` (spec §6).
pub trait WindowMonitor: Send + Sync {
    fn active_window(&self) -> Result<ActiveWindowInfo, MonitorError>;
}

/// `idle_seconds() -> integer >= 0` (spec §6).
pub trait IdleMonitor: Send + Sync {
    fn idle_seconds(&self) -> Result<u64, MonitorError>;
}

/// `file_events(limit) -> ordered list of {kind, path, dest_path?, timestamp}` (spec §6).
pub trait FileEventSource: Send + Sync {
    fn file_events(&self, limit: usize) -> Result<Vec<FileEvent>, MonitorError>;
    /// Count of events observed since the watcher started (not bounded by the ring).
    fn total_events(&self) -> u64;
}
