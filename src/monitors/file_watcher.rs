use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

/// A single filesystem change observed by the watcher (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: String,
    pub dest_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A [`super::FileEventSource`] backed by a bounded ring buffer (spec §4.1:
/// "an internal bounded ring, default 50 events"). Overflow discards the
/// oldest entry (spec §5). The real filesystem watch itself is out of scope
/// (spec §1); `announce` is called by whatever event source is wired in.
pub struct RingFileWatcher {
    capacity: usize,
    ring: RwLock<VecDeque<FileEvent>>,
    total: AtomicU64,
}

impl RingFileWatcher {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: RwLock::new(VecDeque::with_capacity(capacity)),
            total: AtomicU64::new(0),
        }
    }

    /// Record a filesystem change event.
    pub fn announce(&self, event: FileEvent) {
        let mut ring = self
            .ring
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
        self.total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for RingFileWatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl super::FileEventSource for RingFileWatcher {
    fn file_events(&self, limit: usize) -> Result<Vec<FileEvent>, super::MonitorError> {
        let ring = self
            .ring
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(ring.iter().rev().take(limit).cloned().collect())
    }

    fn total_events(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::FileEventSource;

    fn event(path: &str) -> FileEvent {
        FileEvent {
            kind: FileEventKind::Modified,
            path: path.to_string(),
            dest_path: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ring_discards_oldest_on_overflow() {
        let watcher = RingFileWatcher::new(2);
        watcher.announce(event("a.rs"));
        watcher.announce(event("b.rs"));
        watcher.announce(event("c.rs"));
        let recent = watcher.file_events(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "c.rs");
        assert_eq!(recent[1].path, "b.rs");
        assert_eq!(watcher.total_events(), 3);
    }

    #[test]
    fn limit_caps_returned_events() {
        let watcher = RingFileWatcher::default();
        for i in 0..10 {
            watcher.announce(event(&format!("file{i}.rs")));
        }
        assert_eq!(watcher.file_events(5).unwrap().len(), 5);
    }
}
