//! `WatchlistTracker` (`spec.md` §4.2.3): earliest-`watchlisted_at`
//! wins across users, weekly staleness cleanup, whole-entry expiry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plexcache_types::CacheSource;

use crate::tracker::{TrackedRecord, TrackerError, TrackerStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistRecord {
    pub watchlisted_at: DateTime<Utc>,
    #[serde(default)]
    pub users: Vec<String>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default)]
    pub cache_source: Option<CacheSource>,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

impl TrackedRecord for WatchlistRecord {}

/// Staleness window for `cleanup_stale` (`spec.md` §4.2.3).
pub const STALE_AFTER_DAYS: i64 = 7;

pub struct WatchlistTracker {
    store: TrackerStore<WatchlistRecord>,
}

impl WatchlistTracker {
    pub fn load(path: PathBuf) -> Result<Self, TrackerError> {
        Ok(WatchlistTracker {
            store: TrackerStore::load(path)?,
        })
    }

    /// Inserts or refreshes an entry. `watchlisted_at` is the
    /// media-server-reported timestamp when available, else `now`; the
    /// earliest across all users/runs is kept ("most aggressive
    /// retention wins", `spec.md` §3).
    pub fn update_entry(
        &self,
        path: &str,
        user: &str,
        watchlisted_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let observed_at = watchlisted_at.unwrap_or(now);
        self.store.mutate(|entries| {
            let record = entries.entry(path.to_string()).or_insert_with(|| WatchlistRecord {
                watchlisted_at: observed_at,
                users: Vec::new(),
                last_seen: now,
                is_cached: false,
                cache_source: None,
                cached_at: None,
            });
            if observed_at < record.watchlisted_at {
                record.watchlisted_at = observed_at;
            }
            record.last_seen = now;
            if !record.users.contains(&user.to_string()) {
                record.users.push(user.to_string());
            }
        })
    }

    pub fn mark_cached(
        &self,
        path: &str,
        source: CacheSource,
        cached_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.store.mutate_if_dirty(|entries| match entries.get_mut(path) {
            Some(r) => {
                r.is_cached = true;
                r.cache_source = Some(source);
                r.cached_at = Some(cached_at);
                ((), true)
            }
            None => ((), false),
        })
    }

    /// Removes entries whose `last_seen` predates `STALE_AFTER_DAYS`.
    pub fn cleanup_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>, TrackerError> {
        let threshold = chrono::Duration::days(STALE_AFTER_DAYS);
        self.store.mutate(|entries| {
            let to_remove: Vec<String> = entries
                .iter()
                .filter(|(_, r)| now.signed_duration_since(r.last_seen) > threshold)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &to_remove {
                entries.remove(key);
            }
            to_remove
        })
    }

    /// Drops entries whose `watchlisted_at` predates `retention_days`
    /// (`spec.md` §4.7 phase 9; fractional days are accepted for
    /// testing).
    pub fn cleanup_past_retention(
        &self,
        retention_days: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, TrackerError> {
        let threshold = chrono::Duration::milliseconds((retention_days * 86_400_000.0) as i64);
        self.store.mutate(|entries| {
            let to_remove: Vec<String> = entries
                .iter()
                .filter(|(_, r)| now.signed_duration_since(r.watchlisted_at) > threshold)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &to_remove {
                entries.remove(key);
            }
            to_remove
        })
    }

    pub fn get(&self, path: &str) -> Option<WatchlistRecord> {
        self.store.get(path)
    }

    pub fn get_with_fallback(&self, path: &str) -> Option<(String, WatchlistRecord)> {
        self.store.get_with_fallback(path)
    }

    pub fn snapshot(&self) -> BTreeMap<String, WatchlistRecord> {
        self.store.snapshot()
    }

    pub fn remove(&self, path: &str) -> Result<Option<WatchlistRecord>, TrackerError> {
        self.store.mutate(|entries| entries.remove(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "plexcache-watchlist-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn earliest_watchlisted_at_wins() {
        let path = scratch_path("earliest");
        let tracker = WatchlistTracker::load(path.clone()).unwrap();
        let early = Utc::now() - chrono::Duration::days(10);
        let late = Utc::now();

        tracker.update_entry("/m.mkv", "alice", Some(late), late).unwrap();
        tracker.update_entry("/m.mkv", "bob", Some(early), late).unwrap();

        assert_eq!(tracker.get("/m.mkv").unwrap().watchlisted_at, early);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn cleanup_stale_removes_old_last_seen() {
        let path = scratch_path("stale");
        let tracker = WatchlistTracker::load(path.clone()).unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        tracker.update_entry("/m.mkv", "alice", Some(old), old).unwrap();

        let removed = tracker.cleanup_stale(Utc::now()).unwrap();
        assert_eq!(removed, vec!["/m.mkv".to_string()]);
        std::fs::remove_file(&path).ok();
    }
}
