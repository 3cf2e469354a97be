//! `OnDeckTracker` (`spec.md` §4.2.2): a per-run lifecycle
//! (`prepare_for_run` / `update_entry` / `cleanup_unseen`) layered over
//! the generic [`TrackerStore`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use plexcache_types::{CacheSource, EpisodeInfo};

use crate::tracker::{TrackedRecord, TrackerError, TrackerStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDeckRecord {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub ondeck_users: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub user_first_seen: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub episode_info: Option<EpisodeInfo>,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default)]
    pub cache_source: Option<CacheSource>,
    #[serde(default)]
    pub cached_at: Option<DateTime<Utc>>,
}

impl TrackedRecord for OnDeckRecord {}

pub struct OnDeckTracker {
    store: TrackerStore<OnDeckRecord>,
    seen_this_run: Mutex<HashSet<String>>,
}

impl OnDeckTracker {
    pub fn load(path: PathBuf) -> Result<Self, TrackerError> {
        Ok(OnDeckTracker {
            store: TrackerStore::load(path)?,
            seen_this_run: Mutex::new(HashSet::new()),
        })
    }

    /// Clears per-run fields on every entry while preserving
    /// `first_seen`, `user_first_seen`, and `last_seen`; resets the
    /// "seen this run" tracking set.
    pub fn prepare_for_run(&self) -> Result<(), TrackerError> {
        *self.seen_this_run.lock().unwrap() = HashSet::new();
        self.store.mutate(|entries| {
            for record in entries.values_mut() {
                record.users.clear();
                record.ondeck_users.clear();
                record.episode_info = None;
            }
        })
    }

    /// Inserts or refreshes one (path, user) observation for this run.
    pub fn update_entry(
        &self,
        path: &str,
        user: &str,
        episode_info: Option<EpisodeInfo>,
        is_current_ondeck: bool,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.seen_this_run.lock().unwrap().insert(path.to_string());

        self.store.mutate(|entries| {
            let record = entries.entry(path.to_string()).or_insert_with(|| OnDeckRecord {
                users: Vec::new(),
                ondeck_users: Vec::new(),
                first_seen: now,
                last_seen: now,
                user_first_seen: HashMap::new(),
                episode_info: None,
                is_cached: false,
                cache_source: None,
                cached_at: None,
            });

            record.last_seen = now;
            if !record.users.contains(&user.to_string()) {
                record.users.push(user.to_string());
            }
            record.user_first_seen.entry(user.to_string()).or_insert(now);
            if is_current_ondeck && !record.ondeck_users.contains(&user.to_string()) {
                record.ondeck_users.push(user.to_string());
            }
            if let Some(info) = episode_info {
                record.episode_info = Some(info);
            }
        })
    }

    /// Marks an entry's cache status (called by `TierMover`/`FileFilter`
    /// after a successful move, independent of the per-run refresh
    /// above).
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

    /// Deletes entries never touched this run; on survivors, trims
    /// `user_first_seen` to intersect with the current `users` list.
    pub fn cleanup_unseen(&self) -> Result<Vec<String>, TrackerError> {
        let seen = self.seen_this_run.lock().unwrap().clone();
        self.store.mutate(|entries| {
            let to_remove: Vec<String> = entries
                .keys()
                .filter(|k| !seen.contains(*k))
                .cloned()
                .collect();
            for key in &to_remove {
                entries.remove(key);
            }
            for record in entries.values_mut() {
                let users: HashSet<&String> = record.users.iter().collect();
                record
                    .user_first_seen
                    .retain(|u, _| users.contains(u));
            }
            to_remove
        })
    }

    /// An entry is expired only when every current user's per-user
    /// timestamp is older than `days`; an empty `users` list is
    /// conservative (`false`); missing per-user data falls back to
    /// `first_seen` (`spec.md` §4.2.2, property 3 in `spec.md` §8).
    pub fn is_expired(&self, path: &str, days: f64, now: DateTime<Utc>) -> bool {
        let Some(record) = self.store.get(path) else {
            return false;
        };
        if record.users.is_empty() {
            return false;
        }
        let threshold = chrono::Duration::milliseconds((days * 86_400_000.0) as i64);
        record.users.iter().all(|u| {
            let first_seen = record
                .user_first_seen
                .get(u)
                .copied()
                .unwrap_or(record.first_seen);
            now.signed_duration_since(first_seen) > threshold
        })
    }

    pub fn get(&self, path: &str) -> Option<OnDeckRecord> {
        self.store.get(path)
    }

    pub fn get_with_fallback(&self, path: &str) -> Option<(String, OnDeckRecord)> {
        self.store.get_with_fallback(path)
    }

    pub fn snapshot(&self) -> BTreeMap<String, OnDeckRecord> {
        self.store.snapshot()
    }

    pub fn remove(&self, path: &str) -> Result<Option<OnDeckRecord>, TrackerError> {
        self.store.mutate(|entries| entries.remove(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "plexcache-ondeck-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn cleanup_unseen_drops_entries_not_refreshed_this_run() {
        let path = scratch_path("cleanup");
        let tracker = OnDeckTracker::load(path.clone()).unwrap();
        let t0 = Utc::now();
        tracker.update_entry("/a.mkv", "alice", None, true, t0).unwrap();
        tracker.update_entry("/b.mkv", "alice", None, true, t0).unwrap();

        tracker.prepare_for_run().unwrap();
        tracker.update_entry("/a.mkv", "alice", None, true, t0).unwrap();
        let removed = tracker.cleanup_unseen().unwrap();

        assert_eq!(removed, vec!["/b.mkv".to_string()]);
        assert!(tracker.get("/a.mkv").is_some());
        assert!(tracker.get("/b.mkv").is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn expired_requires_every_user_past_threshold() {
        let path = scratch_path("expiry");
        let tracker = OnDeckTracker::load(path.clone()).unwrap();
        let old = Utc::now() - chrono::Duration::days(40);
        let recent = Utc::now();

        tracker.update_entry("/a.mkv", "alice", None, true, old).unwrap();
        tracker.update_entry("/a.mkv", "bob", None, true, recent).unwrap();

        assert!(!tracker.is_expired("/a.mkv", 30.0, Utc::now()));

        // bob ages out too
        tracker
            .update_entry("/a.mkv", "bob", None, true, Utc::now() - chrono::Duration::days(40))
            .unwrap();
        // user_first_seen for bob was already set on first observation and stays fixed
        assert!(tracker.is_expired("/a.mkv", 30.0, Utc::now()));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_users_is_conservatively_not_expired() {
        let path = scratch_path("emptyusers");
        let tracker = OnDeckTracker::load(path.clone()).unwrap();
        tracker.update_entry("/a.mkv", "alice", None, true, Utc::now()).unwrap();
        tracker.prepare_for_run().unwrap();
        // no update_entry called this run: users is now empty but entry survives until cleanup
        assert!(!tracker.is_expired("/a.mkv", 0.0, Utc::now()));
        std::fs::remove_file(&path).ok();
    }
}
