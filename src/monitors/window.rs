use std::sync::RwLock;

/// `active_window()` response shape (spec §6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveWindowInfo {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub pid: Option<u32>,
    pub exe_path: Option<String>,
    pub changed: bool,
}

/// A [`super::WindowMonitor`] fed by an external announcement rather than a
/// direct platform lookup (spec §1: foreground-window lookup is a named
/// external collaborator). `announce` is called by whatever platform shell
/// embeds ORBIT each time the foreground window changes; `active_window`
/// simply reports the last announced value and whether it differs from the
/// previously *reported* value.
pub struct AnnouncedWindowMonitor {
    inner: RwLock<Inner>,
}

struct Inner {
    current: ActiveWindowInfo,
    last_reported: Option<ActiveWindowInfo>,
}

impl Default for AnnouncedWindowMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnouncedWindowMonitor {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                current: ActiveWindowInfo::default(),
                last_reported: None,
            }),
        }
    }

    /// Record a new foreground-window observation.
    pub fn announce(
        &self,
        app_name: Option<String>,
        window_title: Option<String>,
        pid: Option<u32>,
        exe_path: Option<String>,
    ) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.current = ActiveWindowInfo {
            app_name,
            window_title,
            pid,
            exe_path,
            changed: false,
        };
    }
}

impl super::WindowMonitor for AnnouncedWindowMonitor {
    fn active_window(&self) -> Result<ActiveWindowInfo, super::MonitorError> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let changed = inner.last_reported.as_ref() != Some(&inner.current);
        let mut reported = inner.current.clone();
        reported.changed = changed;
        inner.last_reported = Some(inner.current.clone());
        Ok(reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitors::WindowMonitor;

    #[test]
    fn reports_no_change_on_repeated_reads() {
        let monitor = AnnouncedWindowMonitor::new();
        monitor.announce(Some("Code.exe".into()), Some("main.rs".into()), None, None);
        let first = monitor.active_window().unwrap();
        assert!(first.changed);
        let second = monitor.active_window().unwrap();
        assert!(!second.changed);
    }

    #[test]
    fn reports_change_after_new_announcement() {
        let monitor = AnnouncedWindowMonitor::new();
        monitor.announce(Some("Code.exe".into()), None, None, None);
        let _ = monitor.active_window();
        monitor.announce(Some("Chrome.exe".into()), None, None, None);
        assert!(monitor.active_window().unwrap().changed);
    }
}
