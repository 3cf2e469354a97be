//! Scores every tracked path `0..=100` from tracker state and ranks
//! eviction candidates from the low end of that scale.
//!
//! Cross-tracker lookups go through
//! [`plexcache_datastore::tracker::TrackerStore::get_with_fallback`]'s
//! basename match, the same cross-namespace compromise the design
//! notes call out: a cache-side path and a host-side path for the same
//! file don't share a key, but they do share a basename.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use plexcache_datastore::{CacheTimestampTracker, OnDeckTracker, WatchlistTracker};
use plexcache_types::{CacheSource, EpisodeInfo, MediaType};

pub const DEFAULT_EVICTION_MIN_PRIORITY: u8 = 60;

pub struct PriorityScorer<'a> {
    cache: &'a CacheTimestampTracker,
    ondeck: &'a OnDeckTracker,
    watchlist: &'a WatchlistTracker,
    /// Per-show earliest *current* OnDeck position, built once from the
    /// tracker's per-run snapshot.
    earliest_ondeck_position: HashMap<String, EpisodeInfo>,
    /// OnDeck paths that survived retention filtering this run. `None`
    /// disables the episode-bonus-withholding rule entirely.
    active_ondeck_paths: Option<&'a HashSet<String>>,
    number_episodes: u32,
}

impl<'a> PriorityScorer<'a> {
    pub fn new(
        cache: &'a CacheTimestampTracker,
        ondeck: &'a OnDeckTracker,
        watchlist: &'a WatchlistTracker,
        active_ondeck_paths: Option<&'a HashSet<String>>,
        number_episodes: u32,
    ) -> Self {
        let earliest_ondeck_position = build_earliest_position_map(ondeck);
        PriorityScorer {
            cache,
            ondeck,
            watchlist,
            earliest_ondeck_position,
            active_ondeck_paths,
            number_episodes,
        }
    }

    /// The 0..=100 priority for `path` (a cache-side path; subtitles
    /// delegate to their parent via `CacheTimestampTracker::resolve`).
    pub fn score(&self, path: &str, now: DateTime<Utc>) -> u8 {
        let Some((_, cache_record)) = self.cache.resolve(path) else {
            return 50;
        };

        let mut score: i32 = 50;

        score += match cache_record.source {
            CacheSource::Ondeck => 15,
            _ => 0,
        };

        let ondeck_entry = self.ondeck.get_with_fallback(path).map(|(_, r)| r);
        let watchlist_entry = self.watchlist.get_with_fallback(path).map(|(_, r)| r);

        let mut users: HashSet<&str> = HashSet::new();
        if let Some(r) = &ondeck_entry {
            users.extend(r.users.iter().map(String::as_str));
        }
        if let Some(r) = &watchlist_entry {
            users.extend(r.users.iter().map(String::as_str));
        }
        score += 5 * users.len().min(3) as i32;

        let since_cached = now.signed_duration_since(cache_record.cached_at);
        if since_cached <= chrono::Duration::hours(24) {
            score += 5;
        } else if since_cached <= chrono::Duration::hours(72) {
            score += 3;
        }

        if let Some(r) = &watchlist_entry {
            let age = now.signed_duration_since(r.watchlisted_at);
            if age < chrono::Duration::days(7) {
                score += 10;
            } else if age > chrono::Duration::days(60) {
                score -= 10;
            }
        }

        let mut episode_bonus = 0;
        if let Some(r) = &ondeck_entry {
            let first_seen_age = now.signed_duration_since(r.first_seen);
            if first_seen_age < chrono::Duration::days(7) {
                episode_bonus += 5;
            } else if first_seen_age >= chrono::Duration::days(14) && first_seen_age < chrono::Duration::days(30) {
                episode_bonus -= 5;
            } else if first_seen_age >= chrono::Duration::days(30) {
                episode_bonus -= 10;
            }

            if let Some(info) = cache_record.episode_info.as_ref().or(r.episode_info.as_ref()) {
                let withhold = cache_record.media_type == Some(MediaType::Episode)
                    && self
                        .active_ondeck_paths
                        .is_some_and(|active| !active.contains(path));

                if !withhold {
                    if let Some(current) = self.earliest_ondeck_position.get(&info.show) {
                        if info.season == current.season && info.episode == current.episode {
                            episode_bonus += 15;
                        } else if let Some(distance) = info.estimated_distance_after(current) {
                            let lookahead = (self.number_episodes as f64 / 2.0).ceil() as i64;
                            if distance > 0 && distance <= lookahead {
                                episode_bonus += 10;
                            }
                        }
                    }
                }
            }
        }
        score += episode_bonus;

        score.clamp(0, 100) as u8
    }

    /// Walks cached paths ascending by score, skipping those at or
    /// above `eviction_min_priority`, accumulating `sizes` until
    /// `target_bytes` is reached.
    pub fn get_eviction_candidates(
        &self,
        target_bytes: u64,
        sizes: &HashMap<String, u64>,
        eviction_min_priority: u8,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut scored: Vec<(String, u8)> = self
            .cache
            .snapshot()
            .into_keys()
            .map(|path| {
                let s = self.score(&path, now);
                (path, s)
            })
            .collect();
        scored.sort_by_key(|(_, s)| *s);

        let mut accumulated = 0u64;
        let mut candidates = Vec::new();
        for (path, score) in scored {
            if accumulated >= target_bytes {
                break;
            }
            if score >= eviction_min_priority {
                continue;
            }
            let size = sizes.get(&path).copied().unwrap_or(0);
            candidates.push(path);
            accumulated += size;
        }
        candidates
    }
}

fn build_earliest_position_map(ondeck: &OnDeckTracker) -> HashMap<String, EpisodeInfo> {
    let mut map: HashMap<String, EpisodeInfo> = HashMap::new();
    for record in ondeck.snapshot().into_values() {
        let Some(info) = record.episode_info else {
            continue;
        };
        if !info.is_current_ondeck {
            continue;
        }
        map.entry(info.show.clone())
            .and_modify(|current| {
                if (info.season, info.episode) < (current.season, current.episode) {
                    *current = info.clone();
                }
            })
            .or_insert(info);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_types::CacheSource;
    use std::path::PathBuf;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "plexcache-priority-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn ondeck_source_scores_higher_than_watchlist() {
        let cache = CacheTimestampTracker::load(scratch_path("cache-a")).unwrap();
        let ondeck = OnDeckTracker::load(scratch_path("ondeck-a")).unwrap();
        let watchlist = WatchlistTracker::load(scratch_path("watchlist-a")).unwrap();
        let now = Utc::now() - chrono::Duration::days(100);

        cache
            .record_cached("/cache/a.mkv", CacheSource::Ondeck, None, None, None, now)
            .unwrap();
        cache
            .record_cached("/cache/b.mkv", CacheSource::Watchlist, None, None, None, now)
            .unwrap();

        let scorer = PriorityScorer::new(&cache, &ondeck, &watchlist, None, 3);
        assert!(scorer.score("/cache/a.mkv", now) > scorer.score("/cache/b.mkv", now));
    }

    #[test]
    fn recently_cached_scores_above_old() {
        let cache = CacheTimestampTracker::load(scratch_path("cache-b")).unwrap();
        let ondeck = OnDeckTracker::load(scratch_path("ondeck-b")).unwrap();
        let watchlist = WatchlistTracker::load(scratch_path("watchlist-b")).unwrap();
        let now = Utc::now();

        cache
            .record_cached("/cache/new.mkv", CacheSource::Watchlist, None, None, None, now - chrono::Duration::hours(1))
            .unwrap();
        cache
            .record_cached("/cache/old.mkv", CacheSource::Watchlist, None, None, None, now - chrono::Duration::days(30))
            .unwrap();

        let scorer = PriorityScorer::new(&cache, &ondeck, &watchlist, None, 3);
        assert!(scorer.score("/cache/new.mkv", now) > scorer.score("/cache/old.mkv", now));
    }

    #[test]
    fn eviction_candidates_are_ascending_by_score_and_capped_by_target() {
        let cache = CacheTimestampTracker::load(scratch_path("cache-c")).unwrap();
        let ondeck = OnDeckTracker::load(scratch_path("ondeck-c")).unwrap();
        let watchlist = WatchlistTracker::load(scratch_path("watchlist-c")).unwrap();
        let now = Utc::now();

        cache
            .record_cached("/cache/low.mkv", CacheSource::Unknown, None, None, None, now - chrono::Duration::days(90))
            .unwrap();
        cache
            .record_cached("/cache/high.mkv", CacheSource::Ondeck, None, None, None, now)
            .unwrap();

        let mut sizes = HashMap::new();
        sizes.insert("/cache/low.mkv".to_string(), 1_000u64);
        sizes.insert("/cache/high.mkv".to_string(), 1_000u64);

        let scorer = PriorityScorer::new(&cache, &ondeck, &watchlist, None, 3);
        let candidates = scorer.get_eviction_candidates(1_000, &sizes, DEFAULT_EVICTION_MIN_PRIORITY, now);
        assert_eq!(candidates, vec!["/cache/low.mkv".to_string()]);
    }
}
