//! Event-log sink (spec §6 "Event-log sink (consumed from C0)").
//!
//! A `sled`-backed append-only store keyed by big-endian timestamp, matching
//! the teacher's `storage::history` shape: `append`, `recent`, `by_event_type`,
//! `range`, `cleanup_older_than`, and a `stats()` accessor. This store is a
//! telemetry sink only — spec §1 non-goals state no in-memory decision may
//! depend on it, and nothing here is read back into C1–C4.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Schema fields per spec §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub idle_time: u64,
    pub file_changes: u32,
    pub error_count: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_events: u64,
    pub events_last_24h: u64,
}

/// Append-only event-log sink (spec §6). Not authoritative for any
/// in-memory decision (spec §1).
#[derive(Clone)]
pub struct EventLog {
    events: Arc<sled::Tree>,
    by_type: Arc<sled::Tree>,
}

impl EventLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let events = db.open_tree("events")?;
        let by_type = db.open_tree("events_by_type")?;
        Ok(Self {
            events: Arc::new(events),
            by_type: Arc::new(by_type),
        })
    }

    /// Append a tagged event record (spec §6). Keyed by big-endian timestamp
    /// nanos so iteration order sorts chronologically; a secondary index
    /// tree keys by `event_type\0timestamp` for `by_event_type` lookups.
    pub fn append(&self, record: &EventRecord) -> Result<(), StorageError> {
        let key = timestamp_key(record.timestamp);
        let value = serde_json::to_vec(record)?;
        self.events.insert(&key, value.clone())?;

        let mut type_key = record.event_type.clone().into_bytes();
        type_key.push(0);
        type_key.extend_from_slice(&key);
        self.by_type.insert(type_key, value)?;

        Ok(())
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        self.events
            .iter()
            .rev()
            .take(limit)
            .filter_map(|item| item.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect()
    }

    /// Most recent `limit` events of a given type, newest first.
    pub fn by_event_type(&self, event_type: &str, limit: usize) -> Vec<EventRecord> {
        let mut prefix = event_type.as_bytes().to_vec();
        prefix.push(0);
        self.by_type
            .scan_prefix(&prefix)
            .rev()
            .take(limit)
            .filter_map(|item| item.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect()
    }

    /// Events in `[from, to]`, oldest first.
    pub fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<EventRecord> {
        let start = timestamp_key(from);
        let end = timestamp_key(to);
        self.events
            .range(start..=end)
            .filter_map(|item| item.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect()
    }

    /// Delete events older than `days` days. Not authoritative for any
    /// in-memory decision — purely a retention policy on the telemetry sink.
    pub fn cleanup_older_than(&self, days: u64) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let cutoff_key = timestamp_key(cutoff);

        let stale: Vec<Vec<u8>> = self
            .events
            .range(..cutoff_key.to_vec())
            .filter_map(|item| item.ok())
            .map(|(k, _)| k.to_vec())
            .collect();

        let mut deleted = 0;
        for key in &stale {
            self.events.remove(key)?;
            deleted += 1;
        }

        // The secondary index is rebuilt lazily: prune entries whose embedded
        // timestamp falls before the cutoff.
        let stale_type_keys: Vec<Vec<u8>> = self
            .by_type
            .iter()
            .filter_map(|item| item.ok())
            .filter(|(k, _)| {
                k.len() >= 8 && k[k.len() - 8..] < cutoff_key[..]
            })
            .map(|(k, _)| k.to_vec())
            .collect();
        for key in stale_type_keys {
            self.by_type.remove(key)?;
        }

        if deleted > 0 {
            self.events.flush()?;
            self.by_type.flush()?;
        }

        Ok(deleted)
    }

    pub fn stats(&self) -> StorageStats {
        let total_events = self.events.len() as u64;
        let cutoff_key = timestamp_key(Utc::now() - chrono::Duration::hours(24));
        let events_last_24h = self
            .events
            .range(cutoff_key..)
            .filter(|item| item.is_ok())
            .count() as u64;
        StorageStats {
            total_events,
            events_last_24h,
        }
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.events.flush()?;
        self.by_type.flush()?;
        Ok(())
    }
}

fn timestamp_key(ts: DateTime<Utc>) -> [u8; 8] {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(0);
    // Shift to an unsigned range so big-endian byte order still sorts
    // chronologically across the (rare) negative-timestamp edge case.
    (nanos as u64 ^ (1u64 << 63)).to_be_bytes()
}
