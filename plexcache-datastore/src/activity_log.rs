//! Append-front activity ring shared by `OperationRunner` and
//! `MaintenanceRunner` (`spec.md` §4.11).
//!
//! Both runners are in-process singletons behind the mutual-exclusion
//! contract described in `spec.md` §4.8/§4.9, so a single in-process
//! [`std::sync::Mutex`] is enough to serialize "re-read, prepend,
//! persist" — no cross-process locking is added (see the open
//! question preserved in `SPEC_FULL.md` §9).

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plexcache_types::ActivityAction;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    pub action: ActivityAction,
    pub filename: String,
    pub size_bytes: u64,
    pub users: Vec<String>,
}

impl ActivityEvent {
    pub fn new(
        action: ActivityAction,
        filename: impl Into<String>,
        size_bytes: u64,
        users: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        ActivityEvent {
            timestamp,
            action,
            filename: filename.into(),
            size_bytes,
            users,
        }
    }
}

/// Cap named in `spec.md` §4.11 ("capped at ~500 entries").
pub const DEFAULT_CAP: usize = 500;

pub struct ActivityLog {
    path: PathBuf,
    cap: usize,
    write_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: PathBuf) -> Self {
        ActivityLog {
            path,
            cap: DEFAULT_CAP,
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<ActivityEvent>, Error> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading activity log {}", self.path.display()))?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let events: Vec<ActivityEvent> = serde_json::from_str(&data)
            .with_context(|| format!("parsing activity log {}", self.path.display()))?;
        Ok(events)
    }

    /// Loads events newer than `retention_hours` ago.
    pub fn load(&self, retention_hours: f64, now: DateTime<Utc>) -> Result<Vec<ActivityEvent>, Error> {
        let _guard = self.write_lock.lock().unwrap();
        let events = self.read_all()?;
        Ok(filter_by_retention(events, retention_hours, now))
    }

    /// Re-reads from disk, prepends `event`, applies the retention
    /// window and the entry cap, and atomically persists.
    pub fn append(
        &self,
        event: ActivityEvent,
        retention_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let _guard = self.write_lock.lock().unwrap();
        let mut events = self.read_all()?;
        events.insert(0, event);
        let mut events = filter_by_retention(events, retention_hours, now);
        events.truncate(self.cap);

        let data = serde_json::to_vec_pretty(&events)?;
        plexcache_tools::fs::replace_file(&self.path, &data)?;
        Ok(())
    }
}

fn filter_by_retention(
    events: Vec<ActivityEvent>,
    retention_hours: f64,
    now: DateTime<Utc>,
) -> Vec<ActivityEvent> {
    let window = chrono::Duration::milliseconds((retention_hours * 3_600_000.0) as i64);
    events
        .into_iter()
        .filter(|e| now.signed_duration_since(e.timestamp) <= window)
        .collect()
}
