//! `RunContext`: the one value threaded through `ControlLoop` and every
//! component it calls, replacing the source's module-level globals for
//! warning/error counters and activity state (`SPEC_FULL.md` §9,
//! "No global mutable state").

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use plexcache_config::Config;
use plexcache_datastore::{ActivityLog, CacheTimestampTracker, OnDeckTracker, WatchlistTracker};

use crate::exclude_list::ExcludeList;
use crate::platform::PlatformAdapter;

/// Counts per-file failures by taxonomy bucket for the run summary
/// (`spec.md` §7: "surface aggregated count in summary").
#[derive(Debug, Default)]
pub struct ErrorCounters {
    pub permission_denied: AtomicU64,
    pub no_space: AtomicU64,
    pub verification_failed: AtomicU64,
    pub source_vanished: AtomicU64,
    pub other: AtomicU64,
}

impl ErrorCounters {
    pub fn total(&self) -> u64 {
        self.permission_denied.load(Ordering::Relaxed)
            + self.no_space.load(Ordering::Relaxed)
            + self.verification_failed.load(Ordering::Relaxed)
            + self.source_vanished.load(Ordering::Relaxed)
            + self.other.load(Ordering::Relaxed)
    }
}

/// Everything a single caching run or maintenance action needs, built
/// once at the start of a run and handed by shared reference to every
/// component instead of being reached for through process-global state.
pub struct RunContext {
    pub config: Config,
    pub project_root: PathBuf,
    pub now: DateTime<Utc>,

    pub cache_tracker: CacheTimestampTracker,
    pub ondeck_tracker: OnDeckTracker,
    pub watchlist_tracker: WatchlistTracker,
    pub activity_log: ActivityLog,
    pub exclude_list: ExcludeList,

    pub platform: Arc<dyn PlatformAdapter>,

    /// Paths currently being streamed; sticky-protected for the
    /// duration of the run (`spec.md` §4.4, §4.7 phase 7).
    pub active_session_paths: HashSet<String>,

    /// `true` once any media-server fetch failed partway, degrading
    /// move-back decisions to the conservative side (`spec.md` §4.7
    /// phase 6, §7 "Authentication failure").
    pub watchlist_data_incomplete: std::sync::atomic::AtomicBool,

    /// When set, `TierMover` reports what it would do without touching
    /// any file, tracker, or exclude-list entry (`--dry-run`).
    pub dry_run: bool,

    pub errors: ErrorCounters,
}

impl RunContext {
    pub fn new(
        config: Config,
        project_root: PathBuf,
        now: DateTime<Utc>,
        cache_tracker: CacheTimestampTracker,
        ondeck_tracker: OnDeckTracker,
        watchlist_tracker: WatchlistTracker,
        activity_log: ActivityLog,
        exclude_list: ExcludeList,
        platform: Arc<dyn PlatformAdapter>,
    ) -> Self {
        RunContext {
            config,
            project_root,
            now,
            cache_tracker,
            ondeck_tracker,
            watchlist_tracker,
            activity_log,
            exclude_list,
            platform,
            active_session_paths: HashSet::new(),
            watchlist_data_incomplete: std::sync::atomic::AtomicBool::new(false),
            dry_run: false,
            errors: ErrorCounters::default(),
        }
    }

    /// Builder-style opt-in to dry-run mode, so the positional
    /// constructor above stays unchanged for every existing call site.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn mark_watchlist_data_incomplete(&self) {
        self.watchlist_data_incomplete.store(true, Ordering::Relaxed);
    }

    pub fn watchlist_data_incomplete(&self) -> bool {
        self.watchlist_data_incomplete.load(Ordering::Relaxed)
    }

    pub fn is_active_session(&self, path: &str) -> bool {
        self.active_session_paths.contains(path)
    }
}
