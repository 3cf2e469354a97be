//! `ControlLoop`: the run sequence an `OperationRunner` thread executes
//! once per invocation — fetch ingestion, candidate selection, the
//! to-cache/to-array moves, eviction, and tracker cleanup.
//!
//! The media-server fetch itself is out of scope for this core (the
//! adapter that talks to Plex hands in already-fetched snapshots as
//! `ControlLoopInput`); everything downstream of that boundary lives
//! here.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use plexcache_tools::fs::is_regular_file_no_symlink;
use plexcache_types::{OnDeckItem, RunOutcome, RunPhase, WatchlistItem};

use crate::cache_limit;
use crate::context::RunContext;
use crate::eviction::EvictionEngine;
use crate::filter;
use crate::migration::OneTimeMigration;
use crate::mover::{ArrayRestoreRequest, CacheMoveRequest, TierMover};
use crate::path_router::PathRouter;

use super::operation_runner::RunHandle;

/// Everything a `ControlLoop` run needs beyond what `RunContext`
/// already carries: the media-server snapshot, and a directory-scan
/// summary the caller produced up front (sizes/array paths/cache
/// roots keyed by cache path).
pub struct ControlLoopInput {
    pub router: PathRouter,
    pub ondeck_items: Vec<OnDeckItem>,
    pub watchlist_items: Vec<WatchlistItem>,
    pub active_sessions: HashSet<String>,
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub needed_bytes: u64,
    pub file_sizes: HashMap<String, u64>,
    pub array_paths: HashMap<String, String>,
    pub cache_roots: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ControlLoopReport {
    pub cached: usize,
    pub restored: usize,
    pub evicted: usize,
    pub failures: Vec<String>,
}

pub struct ControlLoop;

impl ControlLoop {
    /// Runs the full sequence. Never panics on a component failure —
    /// errors from individual phases are logged and folded into the
    /// failure list, only the unrecoverable ones (tracker load/save)
    /// turn into `RunOutcome::Failed`.
    pub fn run(ctx: Arc<RunContext>, handle: &RunHandle, input: ControlLoopInput) -> RunOutcome {
        let mut report = ControlLoopReport::default();

        handle.set_phase(RunPhase::Starting);

        // Mover-conflict probe (`spec.md` §4.7 phase 2): the external
        // bulk mover moving a freshly-cached file back before the
        // exclude list reaches disk is a known race, so a run that
        // finds the mover active skips itself entirely rather than
        // racing it.
        match ctx.platform.is_mover_running() {
            Ok(true) => {
                info!("bulk mover is running; skipping this run");
                return RunOutcome::Completed { stopped_early: false };
            }
            Ok(false) => {}
            Err(e) => warn!("could not determine whether the bulk mover is running: {e:#}"),
        }

        let migration = OneTimeMigration::new(plexcache_config::paths::migration_v2_marker(&ctx.project_root));
        if let Err(e) = migration.run_if_needed(Vec::new(), ctx.config.max_concurrent_moves_array) {
            warn!("one-time migration failed: {e:#}");
        }
        if let Err(e) = ctx.ondeck_tracker.prepare_for_run() {
            return RunOutcome::Failed { reason: format!("preparing OnDeck tracker: {e}") };
        }

        // Skip-active-sessions gate (`spec.md` §4.7 phase 7 / §6
        // `exit_if_active_session`): when set, any active stream aborts
        // the whole run rather than merely being skipped individually.
        if ctx.config.exit_if_active_session && !input.active_sessions.is_empty() {
            info!(
                "{} active session(s) and exit_if_active_session is set; aborting run",
                input.active_sessions.len()
            );
            return RunOutcome::Completed { stopped_early: true };
        }

        handle.set_phase(RunPhase::Fetching);
        ingest_fetched_state(&ctx, &input);

        if handle.is_stopped() {
            return RunOutcome::Completed { stopped_early: true };
        }

        handle.set_phase(RunPhase::Analyzing);
        let media_info = build_media_info(&input);
        let to_cache = select_cache_candidates(&ctx, &input, &media_info);
        let to_cache = apply_cache_size_limit(&ctx, &input, to_cache);
        let to_array = select_array_candidates(&ctx, &input);

        handle.set_phase(RunPhase::Moving);
        info!("control loop: {} to cache, {} to array", to_cache.len(), to_array.len());

        if handle.is_stopped() {
            return RunOutcome::Completed { stopped_early: true };
        }

        // To-array precedes eviction precedes to-cache (`spec.md` §5,
        // §4.5.3, §4.7 phases 13-15): an evicted file's space must be
        // reclaimed, and a restored file's space freed, before caching
        // the replacement.
        handle.set_phase(RunPhase::Restoring);
        let mover = TierMover::new(handle.stop_flag());
        let array_results = mover.move_all_to_array(
            Arc::clone(&ctx),
            to_array,
            ctx.config.max_concurrent_moves_array,
            handle.on_bytes_callback(),
            handle.on_file_done_callback(),
        );
        for result in &array_results {
            match result {
                crate::mover::MoveResult::Restored { .. } => report.restored += 1,
                crate::mover::MoveResult::Skipped(reason) => report.failures.push(reason.clone()),
                _ => {}
            }
        }

        if handle.is_stopped() {
            return RunOutcome::Completed { stopped_early: true };
        }

        handle.set_phase(RunPhase::Evicting);
        match EvictionEngine::run(
            &ctx,
            &mover,
            input.disk_total_bytes,
            input.disk_used_bytes,
            input.needed_bytes,
            &input.file_sizes,
            &input.array_paths,
            &input.cache_roots,
            ctx.now,
        ) {
            Ok(eviction_report) => {
                report.evicted = eviction_report.evicted_paths.len();
                report.failures.extend(eviction_report.failures);
            }
            Err(e) => warn!("eviction pass failed: {e:#}"),
        }

        if handle.is_stopped() {
            return RunOutcome::Completed { stopped_early: true };
        }

        handle.set_phase(RunPhase::Caching);
        let cache_results = mover.move_all_to_cache(
            Arc::clone(&ctx),
            to_cache,
            ctx.config.max_concurrent_moves_cache,
            handle.on_bytes_callback(),
            handle.on_file_done_callback(),
        );
        for result in &cache_results {
            match result {
                crate::mover::MoveResult::Cached { .. } => report.cached += 1,
                crate::mover::MoveResult::Skipped(reason) => report.failures.push(reason.clone()),
                _ => {}
            }
        }

        handle.set_phase(RunPhase::Results);
        if let Err(e) = ctx.ondeck_tracker.cleanup_unseen() {
            warn!("OnDeck cleanup failed: {e:#}");
        }
        if let Err(e) = ctx.watchlist_tracker.cleanup_stale(ctx.now) {
            warn!("watchlist stale cleanup failed: {e:#}");
        }
        if let Err(e) = ctx
            .watchlist_tracker
            .cleanup_past_retention(ctx.config.watchlist_retention_days, ctx.now)
        {
            warn!("watchlist retention cleanup failed: {e:#}");
        }
        match filter::clean_stale_exclude_entries(&ctx, |p| PathBuf::from(p).exists()) {
            Ok(removed) if !removed.is_empty() => {
                info!("swept {} stale exclude-list entries", removed.len())
            }
            Err(e) => warn!("exclude-list sweep failed: {e:#}"),
            _ => {}
        }

        info!(
            "control loop finished: {} cached, {} restored, {} evicted, {} failures",
            report.cached,
            report.restored,
            report.evicted,
            report.failures.len()
        );

        RunOutcome::Completed { stopped_early: false }
    }
}

fn ingest_fetched_state(ctx: &RunContext, input: &ControlLoopInput) {
    for item in &input.ondeck_items {
        let (real, _) = input.router.plex_to_real(&item.plex_path);
        if let Err(e) = ctx.ondeck_tracker.update_entry(
            &real,
            &item.user,
            item.episode_info.clone(),
            item.is_current_ondeck,
            ctx.now,
        ) {
            warn!("recording OnDeck entry for {real}: {e:#}");
        }
    }
    for item in &input.watchlist_items {
        let (real, _) = input.router.plex_to_real(&item.plex_path);
        if let Err(e) =
            ctx.watchlist_tracker
                .update_entry(&real, &item.user, item.watchlisted_at, ctx.now)
        {
            warn!("recording watchlist entry for {real}: {e:#}");
        }
    }
}

/// Builds the run's media-info map (`spec.md` §4.4 classification
/// source 2): every fetched OnDeck/watchlist item's cache path to
/// `Episode`/`Movie`, derived from whether it carries `episode_info`.
/// Covers watchlist items not yet cached, which have no OnDeckTracker
/// record to classify them.
fn build_media_info(input: &ControlLoopInput) -> HashMap<String, plexcache_types::MediaType> {
    let mut media_info = HashMap::new();
    for item in input.ondeck_items.iter() {
        let (real, _) = input.router.plex_to_real(&item.plex_path);
        let (cache_opt, _) = input.router.real_to_cache(&real);
        if let Some(cache_path) = cache_opt {
            let mt = if item.episode_info.is_some() {
                plexcache_types::MediaType::Episode
            } else {
                plexcache_types::MediaType::Movie
            };
            media_info.insert(cache_path, mt);
        }
    }
    for item in input.watchlist_items.iter() {
        let (real, _) = input.router.plex_to_real(&item.plex_path);
        let (cache_opt, _) = input.router.real_to_cache(&real);
        if let Some(cache_path) = cache_opt {
            let mt = if item.episode_info.is_some() {
                plexcache_types::MediaType::Episode
            } else {
                plexcache_types::MediaType::Movie
            };
            media_info.entry(cache_path).or_insert(mt);
        }
    }
    media_info
}

/// OnDeck/watchlist items not yet cached become `CacheMoveRequest`s,
/// skipping anything already a regular file on the cache tier (already
/// cached) or whose mapping isn't cacheable at all.
fn select_cache_candidates(
    ctx: &RunContext,
    input: &ControlLoopInput,
    media_info: &HashMap<String, plexcache_types::MediaType>,
) -> Vec<CacheMoveRequest> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for item in &input.ondeck_items {
        let (real, _) = input.router.plex_to_real(&item.plex_path);
        let (cache_opt, _) = input.router.real_to_cache(&real);
        let Some(cache_path) = cache_opt else { continue };
        if !seen.insert(cache_path.clone()) {
            continue;
        }
        if is_regular_file_no_symlink(&PathBuf::from(&cache_path)) {
            continue;
        }
        requests.push(CacheMoveRequest {
            array_path: PathBuf::from(&real),
            cache_path: PathBuf::from(&cache_path),
            exclude_entry: input.router.translate_container_to_host(&cache_path),
            source: plexcache_types::CacheSource::Ondeck,
            media_type: filter::classify_media_type(ctx, &cache_path, media_info),
            episode_info: item.episode_info.clone(),
        });
    }

    if ctx.config.watchlist_toggle {
        for item in &input.watchlist_items {
            let (real, _) = input.router.plex_to_real(&item.plex_path);
            let (cache_opt, _) = input.router.real_to_cache(&real);
            let Some(cache_path) = cache_opt else { continue };
            if !seen.insert(cache_path.clone()) {
                continue;
            }
            if is_regular_file_no_symlink(&PathBuf::from(&cache_path)) {
                continue;
            }
            requests.push(CacheMoveRequest {
                array_path: PathBuf::from(&real),
                cache_path: PathBuf::from(&cache_path),
                exclude_entry: input.router.translate_container_to_host(&cache_path),
                source: plexcache_types::CacheSource::Watchlist,
                media_type: filter::classify_media_type(ctx, &cache_path, media_info),
                episode_info: item.episode_info.clone(),
            });
        }
    }

    requests
}

/// Gates `candidates` through the configured cache-size limit and
/// `min_free_space` floor (`spec.md` §4.7 phase 12), sized from the
/// caller-supplied directory scan (`input.file_sizes`).
fn apply_cache_size_limit(
    ctx: &RunContext,
    input: &ControlLoopInput,
    candidates: Vec<CacheMoveRequest>,
) -> Vec<CacheMoveRequest> {
    let already_tracked_bytes: u64 = ctx
        .cache_tracker
        .keys()
        .iter()
        .filter_map(|k| input.file_sizes.get(k))
        .sum();
    let cache_limit_bytes = cache_limit::resolve_cache_limit_bytes(&ctx.config, input.disk_total_bytes);
    let min_free_space_bytes = cache_limit::resolve_min_free_space_bytes(&ctx.config, input.disk_total_bytes);

    cache_limit::apply_cache_size_limit(
        candidates,
        &input.file_sizes,
        already_tracked_bytes,
        cache_limit_bytes,
        input.disk_total_bytes,
        input.disk_used_bytes,
        min_free_space_bytes,
    )
}

/// Cache-tracker entries no longer wanted on the cache tier become
/// `ArrayRestoreRequest`s, skipping active sessions. When
/// `watched_move` is false, files are never moved back to array — they
/// accumulate on cache until eviction reclaims the space (`spec.md`
/// §6).
fn select_array_candidates(ctx: &RunContext, input: &ControlLoopInput) -> Vec<ArrayRestoreRequest> {
    if !ctx.config.watched_move {
        return Vec::new();
    }

    let move_back = filter::candidates_for_move_back(ctx, ctx.now);
    let move_back = filter::exclude_active_sessions(move_back, &input.active_sessions);

    move_back
        .into_iter()
        .filter_map(|cache_path| {
            let array_path = input.array_paths.get(&cache_path)?.clone();
            let cache_root = input
                .cache_roots
                .get(&cache_path)
                .cloned()
                .unwrap_or_else(|| cache_path.clone());
            Some(ArrayRestoreRequest {
                array_path: PathBuf::from(array_path),
                cache_path: PathBuf::from(&cache_path),
                exclude_entry: input.router.translate_container_to_host(&cache_path),
                cache_root: PathBuf::from(cache_root),
            })
        })
        .collect()
}
