//! `FileFilter`: decides, for each path the `ControlLoop` has fetched
//! from OnDeck/Watchlist or found in the cache tracker, whether it
//! belongs on the cache tier right now.
//!
//! Classification cascades through whatever identity signal is
//! available (rating key via OnDeck/Watchlist membership, persisted
//! `media_type` on the cache record, a path-regex fallback), since the
//! media-server adapter itself is out of scope for this core and
//! callers hand in already-fetched snapshots.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use plexcache_types::MediaType;

use crate::context::RunContext;

static SEASON_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/(Season|Series)\s*\d+/").unwrap());
static SPECIALS_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)/Specials/").unwrap());

/// Classifies a cache-side path as an episode or a movie. Consults, in
/// order (`spec.md` §4.4): the OnDeckTracker record for the current
/// run, the `media_info` map ControlLoop built from this run's fetched
/// snapshot (covers watchlist items not yet cached), the persisted
/// CacheTimestampTracker `media_type`, then a path-regex fallback.
pub fn classify_media_type(
    ctx: &RunContext,
    cache_path: &str,
    media_info: &HashMap<String, MediaType>,
) -> Option<MediaType> {
    if let Some((_, record)) = ctx.ondeck_tracker.get_with_fallback(cache_path) {
        if record.episode_info.is_some() {
            return Some(MediaType::Episode);
        }
    }
    if let Some(mt) = media_info.get(cache_path) {
        return Some(*mt);
    }
    if let Some((_, record)) = ctx.cache_tracker.resolve(cache_path) {
        if let Some(mt) = record.media_type {
            return Some(mt);
        }
    }
    if SEASON_DIR.is_match(cache_path) || SPECIALS_DIR.is_match(cache_path) {
        return Some(MediaType::Episode);
    }
    None
}

/// Whether a cached path is still wanted on the cache tier: either
/// within OnDeck/Watchlist retention, or an active streaming session.
pub fn still_needed_on_cache(ctx: &RunContext, cache_path: &str, now: DateTime<Utc>) -> bool {
    if ctx.is_active_session(cache_path) {
        return true;
    }

    if let Some((ondeck_key, _)) = ctx.ondeck_tracker.get_with_fallback(cache_path) {
        if !ctx.ondeck_tracker.is_expired(&ondeck_key, ctx.config.ondeck_retention_days, now) {
            return true;
        }
    }

    if let Some((_, record)) = ctx.watchlist_tracker.get_with_fallback(cache_path) {
        let age = now.signed_duration_since(record.watchlisted_at);
        let threshold = chrono::Duration::milliseconds((ctx.config.watchlist_retention_days * 86_400_000.0) as i64);
        if age <= threshold {
            return true;
        }
    }

    ctx.cache_tracker.is_within_retention(cache_path, ctx.config.cache_retention_hours, now)
}

/// Collects cache tracker entries that should move back to the array:
/// not actively streaming, and no longer wanted by either retention
/// tracker.
pub fn candidates_for_move_back(ctx: &RunContext, now: DateTime<Utc>) -> Vec<String> {
    ctx.cache_tracker
        .snapshot()
        .into_keys()
        .filter(|path| !still_needed_on_cache(ctx, path, now))
        .collect()
}

/// `clean_stale_exclude_entries` (`spec.md` §4.4): drops any managed
/// exclude-list entry whose file no longer exists under any of
/// `cache_roots`, translated through `exists`.
pub fn clean_stale_exclude_entries(
    ctx: &RunContext,
    exists: impl Fn(&str) -> bool,
) -> anyhow::Result<Vec<String>> {
    ctx.exclude_list.sweep_stale(exists)
}

/// Episode/movie identity check used to decide whether two candidate
/// files refer to "the same" media across an upgrade-rename: Plex
/// rating keys when both are known, else filename-derived identity.
pub fn same_media_identity(
    rating_key_a: Option<&str>,
    rating_key_b: Option<&str>,
    path_a: &std::path::Path,
    path_b: &std::path::Path,
) -> bool {
    if let (Some(a), Some(b)) = (rating_key_a, rating_key_b) {
        return a == b;
    }
    crate::identity::media_identity(path_a) == crate::identity::media_identity(path_b)
}

/// Paths currently streaming get carried forward untouched
/// (`spec.md` §4.4, §4.7 phase 7: "never schedule an active session's
/// file for move-back or exclude-list removal").
pub fn exclude_active_sessions(paths: Vec<String>, active: &HashSet<String>) -> Vec<String> {
    paths.into_iter().filter(|p| !active.contains(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_config::Config;
    use plexcache_datastore::{ActivityLog, CacheTimestampTracker, OnDeckTracker, WatchlistTracker};
    use plexcache_types::CacheSource;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-filter-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_context(dir: &std::path::Path) -> RunContext {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "plex_url": "http://localhost",
            "plex_token": "x",
            "cache_drive_size": "100GB",
        }))
        .unwrap();
        RunContext::new(
            cfg,
            dir.to_path_buf(),
            Utc::now(),
            CacheTimestampTracker::load(dir.join("timestamps.json")).unwrap(),
            OnDeckTracker::load(dir.join("ondeck.json")).unwrap(),
            WatchlistTracker::load(dir.join("watchlist.json")).unwrap(),
            ActivityLog::new(dir.join("activity.json")),
            crate::exclude_list::ExcludeList::new(dir.join("exclude.txt")),
            Arc::new(crate::platform::NullPlatformAdapter),
        )
    }

    #[test]
    fn classifies_episode_from_season_directory() {
        let dir = scratch_dir("classify");
        let ctx = test_context(&dir);
        assert_eq!(
            classify_media_type(&ctx, "/cache/Show/Season 02/S02E01.mkv", &HashMap::new()),
            Some(MediaType::Episode)
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn active_session_is_always_still_needed() {
        let dir = scratch_dir("active");
        let mut ctx = test_context(&dir);
        ctx.active_session_paths.insert("/cache/a.mkv".to_string());
        assert!(still_needed_on_cache(&ctx, "/cache/a.mkv", Utc::now()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn expired_everywhere_is_a_move_back_candidate() {
        let dir = scratch_dir("expired");
        let ctx = test_context(&dir);
        let now = Utc::now();
        let old = now - chrono::Duration::days(365);
        ctx.cache_tracker
            .record_cached("/cache/old.mkv", CacheSource::PreExisting, None, None, None, old)
            .unwrap();

        let candidates = candidates_for_move_back(&ctx, now);
        assert_eq!(candidates, vec!["/cache/old.mkv".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn identity_prefers_rating_key_when_both_present() {
        assert!(same_media_identity(
            Some("123"),
            Some("123"),
            &PathBuf::from("a.mkv"),
            &PathBuf::from("b.mkv"),
        ));
        assert!(!same_media_identity(
            Some("123"),
            Some("456"),
            &PathBuf::from("same.mkv"),
            &PathBuf::from("same.mkv"),
        ));
    }
}
