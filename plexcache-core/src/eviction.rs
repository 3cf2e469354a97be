//! `EvictionEngine`: watermark-triggered cache reclaim, delegating the
//! "who goes" decision to [`PriorityScorer`] (`smart` mode) or plain
//! recency (`fifo` mode), and the "how" to [`TierMover`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Error;
use chrono::{DateTime, Utc};
use log::{info, warn};

use plexcache_types::EvictionMode;

use crate::context::RunContext;
use crate::mover::{ArrayRestoreRequest, MoveResult, TierMover};
use crate::priority::PriorityScorer;

#[derive(Debug, Default)]
pub struct EvictionReport {
    pub considered: usize,
    pub evicted_bytes: u64,
    pub evicted_paths: Vec<String>,
    pub failures: Vec<String>,
}

pub struct EvictionEngine;

impl EvictionEngine {
    /// `cache_total_bytes`/`cache_used_bytes` describe the cache tier's
    /// current occupancy; `needed_bytes` is extra headroom a caller
    /// already knows it needs beyond the watermark (0 if none).
    /// `sizes` maps every candidate cache path to its size on disk;
    /// `array_paths`/`cache_roots` map a cache path back to its array
    /// path and cache-mapping root so a restore request can be built.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        ctx: &Arc<RunContext>,
        mover: &TierMover,
        cache_total_bytes: u64,
        cache_used_bytes: u64,
        needed_bytes: u64,
        sizes: &HashMap<String, u64>,
        array_paths: &HashMap<String, String>,
        cache_roots: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<EvictionReport, Error> {
        let mut report = EvictionReport::default();

        if ctx.config.cache_eviction_mode == EvictionMode::None {
            return Ok(report);
        }

        let watermark_bytes =
            (cache_total_bytes as f64 * (ctx.config.cache_eviction_threshold_percent / 100.0)) as u64;
        let over_watermark = cache_used_bytes.saturating_sub(watermark_bytes);
        let target_bytes = needed_bytes.max(over_watermark);
        if target_bytes == 0 {
            return Ok(report);
        }

        let candidates = match ctx.config.cache_eviction_mode {
            EvictionMode::Smart => {
                let scorer = PriorityScorer::new(
                    &ctx.cache_tracker,
                    &ctx.ondeck_tracker,
                    &ctx.watchlist_tracker,
                    None,
                    ctx.config.number_episodes,
                );
                scorer.get_eviction_candidates(target_bytes, sizes, ctx.config.eviction_min_priority, now)
            }
            EvictionMode::Fifo => fifo_candidates(ctx, target_bytes, sizes),
            EvictionMode::None => unreachable!(),
        };
        report.considered = candidates.len();

        let mut accumulated = 0u64;
        for cache_path in candidates {
            if accumulated >= target_bytes {
                break;
            }
            if ctx.is_active_session(&cache_path) {
                continue;
            }
            let Some(array_path) = array_paths.get(&cache_path) else {
                warn!("eviction: no array path known for {cache_path}, skipping");
                continue;
            };
            let cache_root = cache_roots
                .get(&cache_path)
                .cloned()
                .unwrap_or_else(|| cache_path.clone());

            let req = ArrayRestoreRequest {
                array_path: std::path::PathBuf::from(array_path),
                cache_path: std::path::PathBuf::from(&cache_path),
                exclude_entry: cache_path.clone(),
                cache_root: std::path::PathBuf::from(cache_root),
            };

            let results = mover.move_all_to_array(
                Arc::clone(ctx),
                vec![req],
                1,
                Arc::new(|_| {}),
                Arc::new(|| {}),
            );
            match results.into_iter().next() {
                Some(MoveResult::Restored { size }) => {
                    accumulated += size;
                    report.evicted_bytes += size;
                    report.evicted_paths.push(cache_path);
                }
                Some(MoveResult::Cancelled) => {
                    info!("eviction stopped early: cancellation requested");
                    break;
                }
                Some(MoveResult::Skipped(reason)) => {
                    report.failures.push(format!("{cache_path}: {reason}"));
                }
                Some(MoveResult::Cached { .. }) | None => {
                    report.failures.push(format!("{cache_path}: unexpected eviction outcome"));
                }
            }
        }

        Ok(report)
    }
}

fn fifo_candidates(ctx: &RunContext, target_bytes: u64, sizes: &HashMap<String, u64>) -> Vec<String> {
    let mut entries: Vec<(String, DateTime<Utc>)> = ctx
        .cache_tracker
        .snapshot()
        .into_iter()
        .map(|(path, record)| (path, record.cached_at))
        .collect();
    // Oldest first: the longest-resident file is evicted first.
    entries.sort_by_key(|(_, cached_at)| *cached_at);

    let mut accumulated = 0u64;
    let mut candidates = Vec::new();
    for (path, _) in entries {
        if accumulated >= target_bytes {
            break;
        }
        let size = sizes.get(&path).copied().unwrap_or(0);
        candidates.push(path.clone());
        accumulated += size;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_config::Config;
    use plexcache_datastore::{ActivityLog, CacheTimestampTracker, OnDeckTracker, WatchlistTracker};
    use plexcache_types::CacheSource;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-eviction-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config(mode: EvictionMode) -> Config {
        let mut cfg: Config = serde_json::from_value(serde_json::json!({
            "plex_url": "http://localhost",
            "plex_token": "x",
            "cache_drive_size": "100GB",
        }))
        .unwrap();
        cfg.cache_eviction_mode = mode;
        cfg.cache_eviction_threshold_percent = 50.0;
        cfg
    }

    fn test_context(dir: &std::path::Path, mode: EvictionMode) -> Arc<RunContext> {
        Arc::new(RunContext::new(
            test_config(mode),
            dir.to_path_buf(),
            Utc::now(),
            CacheTimestampTracker::load(dir.join("timestamps.json")).unwrap(),
            OnDeckTracker::load(dir.join("ondeck.json")).unwrap(),
            WatchlistTracker::load(dir.join("watchlist.json")).unwrap(),
            ActivityLog::new(dir.join("activity.json")),
            crate::exclude_list::ExcludeList::new(dir.join("exclude.txt")),
            Arc::new(crate::platform::NullPlatformAdapter),
        ))
    }

    #[test]
    fn none_mode_never_evicts() {
        let dir = scratch_dir("none-mode");
        let ctx = test_context(&dir, EvictionMode::None);
        let mover = TierMover::new(crate::mover::new_stop_flag());
        let report = EvictionEngine::run(
            &ctx,
            &mover,
            1000,
            999,
            0,
            &HashMap::new(),
            &HashMap::new(),
            &HashMap::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(report.considered, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fifo_mode_evicts_oldest_file_first() {
        let dir = scratch_dir("fifo");
        let array_dir = dir.join("array");
        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&array_dir).unwrap();
        std::fs::create_dir_all(&cache_dir).unwrap();

        let old_cache = cache_dir.join("old.mkv");
        let new_cache = cache_dir.join("new.mkv");
        std::fs::write(&old_cache, vec![0u8; 100]).unwrap();
        std::fs::write(&new_cache, vec![0u8; 100]).unwrap();
        std::fs::write(array_dir.join("old.mkv.plexcached"), vec![0u8; 100]).unwrap();
        std::fs::write(array_dir.join("new.mkv.plexcached"), vec![0u8; 100]).unwrap();

        let ctx = test_context(&dir, EvictionMode::Fifo);
        let now = Utc::now();
        ctx.cache_tracker
            .record_cached(&old_cache.display().to_string(), CacheSource::Ondeck, None, None, None, now - chrono::Duration::days(10))
            .unwrap();
        ctx.cache_tracker
            .record_cached(&new_cache.display().to_string(), CacheSource::Ondeck, None, None, None, now)
            .unwrap();
        ctx.exclude_list.append(&old_cache.display().to_string()).unwrap();
        ctx.exclude_list.append(&new_cache.display().to_string()).unwrap();

        let mut sizes = HashMap::new();
        sizes.insert(old_cache.display().to_string(), 100u64);
        sizes.insert(new_cache.display().to_string(), 100u64);

        let mut array_paths = HashMap::new();
        array_paths.insert(old_cache.display().to_string(), array_dir.join("old.mkv").display().to_string());
        array_paths.insert(new_cache.display().to_string(), array_dir.join("new.mkv").display().to_string());

        let mut cache_roots = HashMap::new();
        cache_roots.insert(old_cache.display().to_string(), cache_dir.display().to_string());
        cache_roots.insert(new_cache.display().to_string(), cache_dir.display().to_string());

        let mover = TierMover::new(crate::mover::new_stop_flag());
        let report = EvictionEngine::run(&ctx, &mover, 1000, 600, 0, &sizes, &array_paths, &cache_roots, now).unwrap();

        assert_eq!(report.evicted_paths, vec![old_cache.display().to_string()]);
        assert!(!old_cache.exists());
        assert!(new_cache.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
