//! Polling-based config file watcher.
//!
//! Checks the config file's mtime every 2 seconds. When a change is
//! detected, debounces for 500ms (to handle partial writes from editors),
//! then calls [`super::reload`] and sends the result via an mpsc channel.
//! No external file-watch crate needed.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ConfigChange;

/// Events emitted by the config watcher.
#[derive(Debug)]
pub enum ConfigEvent {
    /// Config was successfully reloaded with these changes.
    Reloaded(Vec<ConfigChange>),
    /// Reload was attempted but failed (old config remains active).
    Error(String),
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Run the config file watcher loop until `cancel` fires or the channel closes.
pub async fn run_config_watcher(
    path: PathBuf,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
) {
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_mtime = get_mtime(&path);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled, stopping");
                return;
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let current = match get_mtime(&path) {
            Some(t) => t,
            None => {
                if last_mtime.is_some() {
                    tracing::warn!(
                        path = %path.display(),
                        "Config file not accessible — keeping current config, will retry"
                    );
                    last_mtime = None;
                }
                continue;
            }
        };

        let changed = match last_mtime {
            Some(prev) => current != prev,
            None => true,
        };
        if !changed {
            continue;
        }

        tokio::time::sleep(DEBOUNCE_DELAY).await;

        let stable = get_mtime(&path);
        if stable != Some(current) {
            continue;
        }
        last_mtime = Some(current);

        let event = match super::reload() {
            Ok(changes) => ConfigEvent::Reloaded(changes),
            Err(e) => {
                tracing::error!(error = %e, "Config hot-reload failed — keeping previous config");
                ConfigEvent::Error(e.to_string())
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

fn get_mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
