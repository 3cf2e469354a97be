//! Cache-size-limit and `min_free_space` gating for to-cache candidate
//! selection (`spec.md` §4.7 phase 12): sum currently-tracked bytes,
//! accept caller-prioritized candidates (OnDeck before watchlist) into
//! the remaining budget in order, then apply the `min_free_space` floor
//! as a second pass. `cache_drive_size`/`cache_limit`/`plexcache_quota`
//! may be absolute bytes, `N[KMGT]B?`, or `N%` of the drive total —
//! when both a drive limit and a quota are configured, the stricter
//! wins.

use std::collections::HashMap;
use std::str::FromStr;

use log::info;

use plexcache_config::Config;
use plexcache_types::SizeExpr;

use crate::mover::CacheMoveRequest;

/// The stricter of `cache_limit` (falling back to `cache_drive_size`)
/// and `plexcache_quota`, both resolved against `disk_total_bytes`.
pub fn resolve_cache_limit_bytes(config: &Config, disk_total_bytes: u64) -> u64 {
    let drive_cap = config
        .cache_limit
        .as_deref()
        .or(Some(config.cache_drive_size.as_str()))
        .and_then(|s| SizeExpr::from_str(s).ok())
        .map(|e| e.resolve(disk_total_bytes))
        .unwrap_or(u64::MAX);

    let quota_cap = config
        .plexcache_quota
        .as_deref()
        .and_then(|s| SizeExpr::from_str(s).ok())
        .map(|e| e.resolve(disk_total_bytes));

    match quota_cap {
        Some(quota) => drive_cap.min(quota),
        None => drive_cap,
    }
}

/// `min_free_space` as an absolute byte floor, resolved against
/// `disk_total_bytes`. Absent configuration means no floor.
pub fn resolve_min_free_space_bytes(config: &Config, disk_total_bytes: u64) -> u64 {
    config
        .min_free_space
        .as_deref()
        .and_then(|s| SizeExpr::from_str(s).ok())
        .map(|e| e.resolve(disk_total_bytes))
        .unwrap_or(0)
}

fn size_of(req: &CacheMoveRequest, file_sizes: &HashMap<String, u64>) -> u64 {
    file_sizes.get(&req.cache_path.display().to_string()).copied().unwrap_or(0)
}

/// First pass: accepts `candidates` in input order into
/// `cache_limit_bytes - already_tracked_bytes`, dropping the remainder
/// (the candidate order is a prefix property: `spec.md` §8 invariant 6).
/// Second pass: further drops anything that would push projected disk
/// free space below `min_free_space_bytes`.
#[allow(clippy::too_many_arguments)]
pub fn apply_cache_size_limit(
    candidates: Vec<CacheMoveRequest>,
    file_sizes: &HashMap<String, u64>,
    already_tracked_bytes: u64,
    cache_limit_bytes: u64,
    disk_total_bytes: u64,
    disk_used_bytes: u64,
    min_free_space_bytes: u64,
) -> Vec<CacheMoveRequest> {
    let mut remaining = cache_limit_bytes.saturating_sub(already_tracked_bytes);
    let mut within_budget = Vec::new();
    let mut dropped_over_budget = 0usize;
    for req in candidates {
        let size = size_of(&req, file_sizes);
        if size <= remaining {
            remaining -= size;
            within_budget.push(req);
        } else {
            dropped_over_budget += 1;
        }
    }
    if dropped_over_budget > 0 {
        info!("cache-size limit: dropped {dropped_over_budget} candidate(s) past the configured budget");
    }

    let mut projected_used = disk_used_bytes;
    let mut within_floor = Vec::new();
    let mut dropped_below_floor = 0usize;
    for req in within_budget {
        let size = size_of(&req, file_sizes);
        let projected_free = disk_total_bytes.saturating_sub(projected_used + size);
        if projected_free >= min_free_space_bytes {
            projected_used += size;
            within_floor.push(req);
        } else {
            dropped_below_floor += 1;
        }
    }
    if dropped_below_floor > 0 {
        info!("min_free_space floor: dropped {dropped_below_floor} candidate(s)");
    }

    within_floor
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_types::{CacheSource, MediaType};
    use std::path::PathBuf;

    fn req(cache_path: &str) -> CacheMoveRequest {
        CacheMoveRequest {
            array_path: PathBuf::from(format!("/array{cache_path}")),
            cache_path: PathBuf::from(cache_path),
            exclude_entry: cache_path.to_string(),
            source: CacheSource::Ondeck,
            media_type: Some(MediaType::Movie),
            episode_info: None,
        }
    }

    #[test]
    fn accepts_a_prefix_of_input_order_within_budget() {
        let mut sizes = HashMap::new();
        sizes.insert("/cache/a.mkv".to_string(), 3_000u64);
        sizes.insert("/cache/b.mkv".to_string(), 3_000u64);
        sizes.insert("/cache/c.mkv".to_string(), 3_000u64);

        let candidates = vec![req("/cache/a.mkv"), req("/cache/b.mkv"), req("/cache/c.mkv")];
        let accepted = apply_cache_size_limit(candidates, &sizes, 0, 7_000, 1_000_000, 0, 0);

        assert_eq!(
            accepted.iter().map(|r| r.cache_path.display().to_string()).collect::<Vec<_>>(),
            vec!["/cache/a.mkv".to_string(), "/cache/b.mkv".to_string()]
        );
    }

    #[test]
    fn already_tracked_bytes_shrink_the_remaining_budget() {
        let mut sizes = HashMap::new();
        sizes.insert("/cache/a.mkv".to_string(), 1_000u64);
        let candidates = vec![req("/cache/a.mkv")];
        let accepted = apply_cache_size_limit(candidates, &sizes, 9_500, 10_000, 1_000_000, 0, 0);
        assert!(accepted.is_empty());
    }

    #[test]
    fn min_free_space_floor_drops_candidates_that_would_breach_it() {
        let mut sizes = HashMap::new();
        sizes.insert("/cache/a.mkv".to_string(), 500u64);
        let candidates = vec![req("/cache/a.mkv")];
        // 1000 total, 400 used: adding 500 leaves 100 free, below a 200 floor.
        let accepted = apply_cache_size_limit(candidates, &sizes, 0, 10_000, 1_000, 400, 200);
        assert!(accepted.is_empty());
    }

    #[test]
    fn quota_stricter_than_drive_limit_wins() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "plex_url": "http://localhost",
            "plex_token": "x",
            "cache_drive_size": "1000GB",
            "plexcache_quota": "10GB",
        }))
        .unwrap();
        let limit = resolve_cache_limit_bytes(&cfg, 2_000_000_000_000);
        assert_eq!(limit, 10 * 1024 * 1024 * 1024);
    }

    #[test]
    fn percent_quota_resolves_against_drive_total() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "plex_url": "http://localhost",
            "plex_token": "x",
            "cache_drive_size": "100%",
            "min_free_space": "10%",
        }))
        .unwrap();
        assert_eq!(resolve_cache_limit_bytes(&cfg, 1_000_000), 1_000_000);
        assert_eq!(resolve_min_free_space_bytes(&cfg, 1_000_000), 100_000);
    }
}
