//! The generic `TrackerStore<R>`, replacing the source's dynamically
//! typed "JSONTracker base class" with one generic store plus a
//! per-record `TrackedRecord` strategy (`SPEC_FULL.md` §4.2; design
//! rationale in `spec.md` §9).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to read tracker file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tracker file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist tracker file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// A per-record-type strategy. Concrete trackers implement this once
/// for their record type and get migration-at-load plumbing for free.
pub trait TrackedRecord: Clone + Serialize + DeserializeOwned {
    /// Runs once per record, right after the store file is loaded,
    /// before any index is rebuilt. Concrete stores use this for
    /// unrelated-to-serialization fixups (e.g. the subtitle migration
    /// in `CacheTimestampTracker`); the default is a no-op.
    fn on_load(_entries: &mut BTreeMap<String, Self>) {}
}

/// A mapping from string key to JSON-serializable record, backed by a
/// single file, single-writer, atomically persisted.
///
/// Mutating operations hold the mutex for the duration of
/// load-modify-save; callers that only want a point-in-time read use
/// [`TrackerStore::snapshot`], which takes the same mutex briefly
/// (`spec.md` §4.2: "Serialized access").
pub struct TrackerStore<R: TrackedRecord> {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, R>>,
}

impl<R: TrackedRecord> TrackerStore<R> {
    /// Loads `path` if it exists, otherwise starts empty. Runs the
    /// record type's `on_load` hook once, after load.
    pub fn load(path: PathBuf) -> Result<Self, TrackerError> {
        let mut entries = if path.exists() {
            let data =
                std::fs::read_to_string(&path).map_err(|source| TrackerError::Read {
                    path: path.clone(),
                    source,
                })?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data).map_err(|source| TrackerError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };

        R::on_load(&mut entries);

        let store = TrackerStore {
            path,
            entries: Mutex::new(entries),
        };
        Ok(store)
    }

    fn persist_locked(&self, entries: &BTreeMap<String, R>) -> Result<(), TrackerError> {
        let data = serde_json::to_vec_pretty(entries).map_err(|source| TrackerError::Parse {
            path: self.path.clone(),
            source,
        })?;
        plexcache_tools::fs::replace_file(&self.path, &data).map_err(|source| {
            TrackerError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Point-in-time clone of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, R> {
        self.entries.lock().unwrap().clone()
    }

    /// Exact-match lookup only (no filename fallback).
    pub fn get(&self, key: &str) -> Option<R> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Looks up `key`; if no exact match exists, falls back to
    /// scanning for any entry whose basename matches `key`'s basename
    /// (`spec.md` §4.2, "Filename fallback" — the mechanism that lets
    /// the same file be addressed by a host path in one run and a
    /// container-translated path in another; see the open question in
    /// `SPEC_FULL.md` §9 about canonicalizing this away in a future
    /// migration).
    pub fn get_with_fallback(&self, key: &str) -> Option<(String, R)> {
        let entries = self.entries.lock().unwrap();
        if let Some(r) = entries.get(key) {
            return Some((key.to_string(), r.clone()));
        }
        let key_basename = basename(key);
        entries
            .iter()
            .find(|(k, _)| basename(k) == key_basename)
            .map(|(k, r)| (k.clone(), r.clone()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Runs `f` against the full map under the write lock, then
    /// persists. Every tracker-specific mutation in this crate goes
    /// through this one choke point so "mutate then atomically save"
    /// can never be forgotten.
    pub fn mutate<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, R>) -> T,
    ) -> Result<T, TrackerError> {
        let mut entries = self.entries.lock().unwrap();
        let result = f(&mut entries);
        self.persist_locked(&entries)?;
        Ok(result)
    }

    /// Same as [`TrackerStore::mutate`] but skips the write when the
    /// closure reports nothing changed, avoiding a needless atomic
    /// rename for read-only passes that happen to hold the lock.
    pub fn mutate_if_dirty<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, R>) -> (T, bool),
    ) -> Result<T, TrackerError> {
        let mut entries = self.entries.lock().unwrap();
        let (result, dirty) = f(&mut entries);
        if dirty {
            self.persist_locked(&entries)?;
        }
        Ok(result)
    }
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
