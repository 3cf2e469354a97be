//! `CacheTimestampTracker` (`spec.md` §4.2.1): set-once `cached_at`,
//! media-type enrichment, and the subtitle delegation protocol with its
//! in-memory reverse index.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use plexcache_types::{CacheSource, EpisodeInfo, MediaType};

use crate::tracker::{basename, TrackedRecord, TrackerError, TrackerStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub cached_at: DateTime<Utc>,
    pub source: CacheSource,
    #[serde(default)]
    pub original_inode: Option<u64>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub episode_info: Option<EpisodeInfo>,
    /// Cache-side paths of subtitle sidecars delegated to this record.
    #[serde(default)]
    pub subtitles: Vec<String>,
}

static LANGUAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.[a-z]{2,3}(-[a-z]{2,4})?$").unwrap());

impl TrackedRecord for CacheRecord {
    fn on_load(entries: &mut BTreeMap<String, Self>) {
        migrate_subtitle_entries(entries);
    }
}

/// Strips a subtitle extension, then an optional language tag, to
/// derive the candidate video stem (`spec.md` §4.2.1).
fn subtitle_stem_and_dir(subtitle_path: &str) -> Option<(String, String)> {
    let path = std::path::Path::new(subtitle_path);
    let dir = path.parent()?.to_string_lossy().to_string();
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !plexcache_tools::fs::SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let mut stem = path.file_stem()?.to_string_lossy().to_string();
    stem = LANGUAGE_TAG.replace(&format!(".{stem}"), "").to_string();
    let stem = stem.trim_start_matches('.').to_string();
    Some((dir, stem))
}

/// Finds the parent video for a subtitle path by trying each video
/// extension in the subtitle's own directory.
fn derive_parent_video(entries: &BTreeMap<String, CacheRecord>, subtitle_path: &str) -> Option<String> {
    let (dir, stem) = subtitle_stem_and_dir(subtitle_path)?;
    for ext in plexcache_tools::fs::VIDEO_EXTENSIONS {
        let candidate = format!("{dir}/{stem}.{ext}");
        if entries.contains_key(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Migrates any top-level subtitle entry whose derived parent video
/// exists in the store: the subtitle is appended to the parent's
/// `subtitles` list and its own top-level entry is deleted.
fn migrate_subtitle_entries(entries: &mut BTreeMap<String, CacheRecord>) {
    let subtitle_keys: Vec<String> = entries
        .keys()
        .filter(|k| subtitle_stem_and_dir(k).is_some())
        .cloned()
        .collect();

    for sub_key in subtitle_keys {
        let Some(parent_key) = derive_parent_video(entries, &sub_key) else {
            continue;
        };
        if parent_key == sub_key {
            continue;
        }
        entries.remove(&sub_key);
        if let Some(parent) = entries.get_mut(&parent_key) {
            if !parent.subtitles.contains(&sub_key) {
                parent.subtitles.push(sub_key);
            }
        }
    }
}

/// In-memory subtitle -> parent reverse index, rebuilt on load, never
/// persisted separately (`spec.md` §9).
type ReverseIndex = HashMap<String, String>;

fn build_reverse_index(entries: &BTreeMap<String, CacheRecord>) -> ReverseIndex {
    let mut index = ReverseIndex::new();
    for (parent, record) in entries {
        for sub in &record.subtitles {
            index.insert(sub.clone(), parent.clone());
        }
    }
    index
}

pub struct CacheTimestampTracker {
    store: TrackerStore<CacheRecord>,
    reverse_index: Mutex<ReverseIndex>,
}

impl CacheTimestampTracker {
    pub fn load(path: PathBuf) -> Result<Self, TrackerError> {
        let store = TrackerStore::load(path)?;
        let reverse_index = build_reverse_index(&store.snapshot());
        Ok(CacheTimestampTracker {
            store,
            reverse_index: Mutex::new(reverse_index),
        })
    }

    /// Resolves `path` to its own record, or (if it's a subtitle) to
    /// its parent video's record.
    pub fn resolve(&self, path: &str) -> Option<(String, CacheRecord)> {
        if let Some(r) = self.store.get(path) {
            return Some((path.to_string(), r));
        }
        let parent = self.reverse_index.lock().unwrap().get(path).cloned()?;
        self.store.get(&parent).map(|r| (parent, r))
    }

    /// Set-once: a no-op if the entry already exists. `cached_at`
    /// marks the first time a file was cached and is never overwritten
    /// after insertion (`spec.md` §3 CacheEntry invariant).
    pub fn record_cached(
        &self,
        path: &str,
        source: CacheSource,
        original_inode: Option<u64>,
        media_type: Option<MediaType>,
        episode_info: Option<EpisodeInfo>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.store.mutate_if_dirty(|entries| {
            if entries.contains_key(path) {
                return ((), false);
            }
            entries.insert(
                path.to_string(),
                CacheRecord {
                    cached_at: now,
                    source,
                    original_inode,
                    media_type,
                    episode_info,
                    subtitles: Vec::new(),
                },
            );
            ((), true)
        })
    }

    /// Enriches an existing entry with media-type metadata without
    /// touching `cached_at`.
    pub fn enrich_media_type(&self, path: &str, media_type: MediaType) -> Result<(), TrackerError> {
        self.store.mutate_if_dirty(|entries| match entries.get_mut(path) {
            Some(r) if r.media_type.is_none() => {
                r.media_type = Some(media_type);
                ((), true)
            }
            _ => ((), false),
        })
    }

    /// Associates a subtitle path with its parent video, both on disk
    /// and in the in-memory reverse index (`spec.md` §8 property 7).
    pub fn associate_subtitle(&self, parent: &str, subtitle: &str) -> Result<(), TrackerError> {
        self.store.mutate_if_dirty(|entries| {
            let Some(record) = entries.get_mut(parent) else {
                return ((), false);
            };
            entries.remove(subtitle);
            let record = entries.get_mut(parent).unwrap_or(record);
            if !record.subtitles.contains(&subtitle.to_string()) {
                record.subtitles.push(subtitle.to_string());
            }
            ((), true)
        })?;
        self.reverse_index
            .lock()
            .unwrap()
            .insert(subtitle.to_string(), parent.to_string());
        Ok(())
    }

    /// `now - cached_at < hours`; a missing entry means "unknown",
    /// which is conservatively `false` (`spec.md` §4.2.1).
    pub fn is_within_retention(&self, path: &str, hours: f64, now: DateTime<Utc>) -> bool {
        match self.resolve(path) {
            Some((_, record)) => {
                let elapsed = now.signed_duration_since(record.cached_at);
                elapsed.num_milliseconds() as f64 / 3_600_000.0 < hours
            }
            None => false,
        }
    }

    /// Removes a record and its subtitles from the store and the
    /// reverse index (`spec.md` §8 property 7: "removing `v` deletes
    /// `s`'s subtitle entry consistently").
    pub fn remove(&self, path: &str) -> Result<Option<CacheRecord>, TrackerError> {
        let removed = self.store.mutate(|entries| entries.remove(path))?;
        if let Some(ref record) = removed {
            let mut index = self.reverse_index.lock().unwrap();
            for sub in &record.subtitles {
                index.remove(sub);
            }
        }
        Ok(removed)
    }

    pub fn get(&self, path: &str) -> Option<CacheRecord> {
        self.store.get(path)
    }

    pub fn get_with_fallback(&self, path: &str) -> Option<(String, CacheRecord)> {
        self.store.get_with_fallback(path)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CacheRecord> {
        self.store.snapshot()
    }

    /// A subtitle's parent, if any (reverse index lookup).
    pub fn parent_of(&self, subtitle_path: &str) -> Option<String> {
        self.reverse_index.lock().unwrap().get(subtitle_path).cloned()
    }

    pub fn is_subtitle_path(path: &str) -> bool {
        subtitle_stem_and_dir(path).is_some()
    }

    pub fn basename(path: &str) -> &str {
        basename(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "plexcache-cache-tracker-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn cached_at_is_never_overwritten() {
        let path = scratch_path("setonce");
        let tracker = CacheTimestampTracker::load(path.clone()).unwrap();
        let t1 = Utc::now();
        tracker
            .record_cached("/cache/Movies/M.mkv", CacheSource::Ondeck, None, None, None, t1)
            .unwrap();
        let t2 = t1 + chrono::Duration::hours(5);
        tracker
            .record_cached("/cache/Movies/M.mkv", CacheSource::Watchlist, None, None, None, t2)
            .unwrap();

        assert_eq!(tracker.get("/cache/Movies/M.mkv").unwrap().cached_at, t1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn subtitle_migrates_into_parent_on_load() {
        let path = scratch_path("submigrate");
        {
            let tracker = CacheTimestampTracker::load(path.clone()).unwrap();
            let now = Utc::now();
            tracker
                .record_cached("/cache/Movies/Matrix.mkv", CacheSource::Ondeck, None, None, None, now)
                .unwrap();
            tracker
                .record_cached("/cache/Movies/Matrix.en.srt", CacheSource::Ondeck, None, None, None, now)
                .unwrap();
        }

        let reloaded = CacheTimestampTracker::load(path.clone()).unwrap();
        assert!(reloaded.get("/cache/Movies/Matrix.en.srt").is_none());
        let parent = reloaded.get("/cache/Movies/Matrix.mkv").unwrap();
        assert_eq!(parent.subtitles, vec!["/cache/Movies/Matrix.en.srt".to_string()]);
        assert_eq!(
            reloaded.parent_of("/cache/Movies/Matrix.en.srt"),
            Some("/cache/Movies/Matrix.mkv".to_string())
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn removing_parent_clears_subtitle_reverse_index() {
        let path = scratch_path("subremove");
        let tracker = CacheTimestampTracker::load(path.clone()).unwrap();
        let now = Utc::now();
        tracker
            .record_cached("/cache/Movies/Matrix.mkv", CacheSource::Ondeck, None, None, None, now)
            .unwrap();
        tracker
            .associate_subtitle("/cache/Movies/Matrix.mkv", "/cache/Movies/Matrix.en.srt")
            .unwrap();
        assert!(tracker.parent_of("/cache/Movies/Matrix.en.srt").is_some());

        tracker.remove("/cache/Movies/Matrix.mkv").unwrap();
        assert!(tracker.parent_of("/cache/Movies/Matrix.en.srt").is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_entry_is_not_within_retention() {
        let path = scratch_path("missingretention");
        let tracker = CacheTimestampTracker::load(path.clone()).unwrap();
        assert!(!tracker.is_within_retention("/nope", 24.0, Utc::now()));
        std::fs::remove_file(&path).ok();
    }
}
