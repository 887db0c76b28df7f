use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A [`super::IdleMonitor`] that reports elapsed seconds since the last
/// recorded input event. The platform input hook itself is out of scope
/// (spec §1); this adapter owns only the bookkeeping.
pub struct SystemIdleMonitor {
    started_at: Instant,
    last_input_offset_ms: AtomicU64,
}

impl Default for SystemIdleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemIdleMonitor {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_input_offset_ms: AtomicU64::new(0),
        }
    }

    /// Record an input event observed "now".
    pub fn record_input(&self) {
        let offset = self.started_at.elapsed().as_millis() as u64;
        self.last_input_offset_ms.store(offset, Ordering::Relaxed);
    }
}

impl super::IdleMonitor for SystemIdleMonitor {
    fn idle_seconds(&self) -> Result<u64, super::MonitorError> {
        let now_ms = self.started_at.elapsed().as_millis() as u64;
        let last_ms = self.last_input_offset_ms.load(Ordering::Relaxed);
        Ok(now_ms.saturating_sub(last_ms) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::IdleMonitor;

    #[test]
    fn idle_seconds_is_zero_immediately_after_input() {
        let monitor = SystemIdleMonitor::new();
        monitor.record_input();
        assert_eq!(monitor.idle_seconds().unwrap(), 0);
    }

    #[test]
    fn idle_seconds_grows_without_input() {
        let monitor = SystemIdleMonitor::new();
        assert_eq!(monitor.idle_seconds().unwrap(), 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(monitor.idle_seconds().unwrap() >= 1);
    }
}
