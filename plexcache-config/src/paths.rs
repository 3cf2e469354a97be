//! Well-known paths under the project root, grounded on
//! `pbs-buildcfg`'s directory constants.

use std::path::{Path, PathBuf};

/// The persistent-state directory, relative to the configured project
/// root (`spec.md` §3: "All persistent state lives under a `data/`
/// directory").
pub fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join("data")
}

pub fn cache_timestamps_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("timestamps.json")
}

pub fn ondeck_tracker_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("ondeck_tracker.json")
}

pub fn watchlist_tracker_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("watchlist_tracker.json")
}

pub fn user_tokens_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("user_tokens.json")
}

pub fn rss_cache_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("rss_cache.json")
}

pub fn recent_activity_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("recent_activity.json")
}

pub fn last_run_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("last_run.txt")
}

pub fn migration_v2_marker(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("plexcache_migration_v2.complete")
}

/// The external bulk mover's exclude list.
pub fn exclude_list_file(project_root: &Path) -> PathBuf {
    data_dir(project_root).join("exclude_list.txt")
}

/// The single-instance lock file (`spec.md` §4.7 step 1).
pub fn instance_lock_file(project_root: &Path) -> PathBuf {
    project_root.join("plexcache.lock")
}

/// Sentinel separating user-managed exclude-file content from the
/// PlexCache-managed block below it (`spec.md` §4.7 step 16).
pub const EXCLUDE_SENTINEL: &str = "### Plexcache exclusions below this line";

/// Suffix for a BackupSidecar (`spec.md` §3).
pub use plexcache_types::SIDECAR_SUFFIX;
