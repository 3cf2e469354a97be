//! One-shot CLI entry point. Loads the config, builds a `RunContext`,
//! and drives one `ControlLoop` pass synchronously — grounded on
//! `proxmox-backup-banner/src/main.rs`'s plain, argument-light `main`
//! (no CLI-definition framework, just `std::env::args`).
//!
//! Fetching OnDeck/watchlist state from the media server and scanning
//! the array/cache directory trees are both out of scope for this
//! crate; a real deployment wires an adapter that builds
//! `plexcache_core::ControlLoopInput` and hands it to [`run`]. This
//! binary runs with an empty snapshot, which still performs the
//! housekeeping passes that don't need one (stale exclude-list sweep,
//! one-time backup-sidecar migration, tracker retention cleanup).

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Error};
use chrono::Utc;
use log::{error, info};

use plexcache_config::{paths, Config};
use plexcache_core::server::{ControlLoop, ControlLoopInput, RunHandle};
use plexcache_core::{ExcludeList, LinuxPlatformAdapter, PathRouter, RunContext};
use plexcache_datastore::{ActivityLog, CacheTimestampTracker, OnDeckTracker, WatchlistTracker};
use plexcache_tools::lock::InstanceLock;

struct Args {
    config: PathBuf,
    project_root: PathBuf,
    verbose: bool,
    dry_run: bool,
    restore_plexcached: bool,
}

fn parse_args() -> Args {
    let mut config = PathBuf::from("config.json");
    let mut project_root = PathBuf::from(".");
    let mut verbose = false;
    let mut dry_run = false;
    let mut restore_plexcached = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(v) = it.next() {
                    config = PathBuf::from(v);
                }
            }
            "--project-root" => {
                if let Some(v) = it.next() {
                    project_root = PathBuf::from(v);
                }
            }
            "--verbose" => verbose = true,
            "--dry-run" => dry_run = true,
            "--restore-plexcached" => restore_plexcached = true,
            "--once" => {} // the only mode this binary supports today
            other => eprintln!("ignoring unrecognized argument: {other}"),
        }
    }

    Args { config, project_root, verbose, dry_run, restore_plexcached }
}

fn main() {
    let args = parse_args();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(args) {
        error!("plexcache run failed: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Error> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    if args.restore_plexcached {
        let roots: Vec<PathBuf> = config
            .sorted_path_mappings()
            .iter()
            .map(|m| PathBuf::from(m.real_path.as_str()))
            .collect();
        let report = plexcache_datastore::PlexcachedRestorer::restore_subtrees(&roots)?;
        info!(
            "restore-plexcached: {} sidecar(s) restored, {} skipped",
            report.restored.len(),
            report.skipped.len()
        );
        for (path, reason) in &report.skipped {
            info!("  skipped {}: {reason}", path.display());
        }
        return Ok(());
    }

    if args.dry_run {
        info!("--dry-run: moves will be reported but not performed");
    }

    let lock_path = paths::instance_lock_file(&args.project_root);
    let _lock = match InstanceLock::try_acquire(&lock_path)? {
        Some(lock) => lock,
        None => {
            info!("another instance already holds {}; exiting", lock_path.display());
            return Ok(());
        }
    };

    let now = Utc::now();
    let cache_tracker = CacheTimestampTracker::load(paths::cache_timestamps_file(&args.project_root))?;
    let ondeck_tracker = OnDeckTracker::load(paths::ondeck_tracker_file(&args.project_root))?;
    let watchlist_tracker = WatchlistTracker::load(paths::watchlist_tracker_file(&args.project_root))?;
    let activity_log = ActivityLog::new(paths::recent_activity_file(&args.project_root));
    let exclude_list = ExcludeList::new(paths::exclude_list_file(&args.project_root));

    let router = PathRouter::new(config.sorted_path_mappings());

    let ctx = RunContext::new(
        config,
        args.project_root.clone(),
        now,
        cache_tracker,
        ondeck_tracker,
        watchlist_tracker,
        activity_log,
        exclude_list,
        Arc::new(LinuxPlatformAdapter::detect()),
    )
    .with_dry_run(args.dry_run);
    let ctx = Arc::new(ctx);

    let input = ControlLoopInput {
        router,
        ondeck_items: Vec::new(),
        watchlist_items: Vec::new(),
        active_sessions: Default::default(),
        disk_total_bytes: 0,
        disk_used_bytes: 0,
        needed_bytes: 0,
        file_sizes: Default::default(),
        array_paths: Default::default(),
        cache_roots: Default::default(),
    };

    let handle = RunHandle::standalone(Arc::new(AtomicBool::new(false)));
    let outcome = ControlLoop::run(ctx, &handle, input);
    info!("run finished: {outcome:?}");
    Ok(())
}
