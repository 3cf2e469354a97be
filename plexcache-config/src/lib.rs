//! Exports the well-known state paths, grounded on `pbs-buildcfg`, and
//! the `Config` struct itself.
//!
//! Loading, JSON-Schema validation, and legacy-field migration of the
//! config file are all explicitly out of scope (`spec.md` §1) — this
//! crate only provides the plain `serde::Deserialize` shape the core
//! consumes, plus a bare loader with no validation so tests and the
//! thin `plexcache` binary can construct/parse it directly.

pub mod paths;

use std::path::Path;

use anyhow::{Context, Error};
use plexcache_types::{EvictionMode, HardlinkPolicy, NotificationLevel, PathMapping};
use serde::{Deserialize, Serialize};

/// Recognized top-level config options (`spec.md` §6, domain-relevant
/// subset). Every field with a documented default gets `serde(default)`
/// so a minimal JSON object is already a valid `Config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub plex_url: String,
    pub plex_token: String,

    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,

    #[serde(default)]
    pub valid_sections: Vec<i64>,

    #[serde(default = "default_number_episodes")]
    pub number_episodes: u32,

    #[serde(default = "default_days_to_monitor")]
    pub days_to_monitor: u32,

    #[serde(default)]
    pub watchlist_toggle: bool,
    #[serde(default)]
    pub watchlist_episodes: bool,
    #[serde(default)]
    pub remote_watchlist_toggle: bool,
    #[serde(default)]
    pub remote_watchlist_rss_url: Option<String>,

    #[serde(default = "default_true")]
    pub watched_move: bool,

    #[serde(default)]
    pub cache_retention_hours: f64,
    #[serde(default = "default_watchlist_retention_days")]
    pub watchlist_retention_days: f64,
    #[serde(default = "default_ondeck_retention_days")]
    pub ondeck_retention_days: f64,

    pub cache_drive_size: String,
    #[serde(default)]
    pub cache_limit: Option<String>,
    #[serde(default)]
    pub min_free_space: Option<String>,
    #[serde(default)]
    pub plexcache_quota: Option<String>,

    #[serde(default = "default_eviction_mode")]
    pub cache_eviction_mode: EvictionMode,
    #[serde(default = "default_eviction_threshold")]
    pub cache_eviction_threshold_percent: f64,
    #[serde(default = "default_eviction_min_priority")]
    pub eviction_min_priority: u8,

    #[serde(default = "default_true")]
    pub create_plexcached_backups: bool,
    #[serde(default = "default_hardlink_policy")]
    pub hardlinked_files: HardlinkPolicy,
    #[serde(default = "default_true")]
    pub cleanup_empty_folders: bool,
    #[serde(default)]
    pub use_symlinks: bool,
    #[serde(default = "default_true")]
    pub exit_if_active_session: bool,

    #[serde(default = "default_concurrency")]
    pub max_concurrent_moves_cache: usize,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_moves_array: usize,

    #[serde(default)]
    pub excluded_folders: Vec<String>,

    #[serde(default = "default_activity_retention_hours")]
    pub activity_retention_hours: f64,

    /// Notification dispatch itself is out of scope (`spec.md` §1); the
    /// core only carries these values so a future dispatcher has
    /// something to read without this crate needing another field added.
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub unraid_levels: Vec<NotificationLevel>,
    #[serde(default)]
    pub webhook_levels: Vec<NotificationLevel>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_number_episodes() -> u32 {
    3
}
fn default_days_to_monitor() -> u32 {
    30
}
fn default_watchlist_retention_days() -> f64 {
    90.0
}
fn default_ondeck_retention_days() -> f64 {
    30.0
}
fn default_eviction_mode() -> EvictionMode {
    EvictionMode::Smart
}
fn default_eviction_threshold() -> f64 {
    90.0
}
fn default_eviction_min_priority() -> u8 {
    60
}
fn default_hardlink_policy() -> HardlinkPolicy {
    HardlinkPolicy::Skip
}
fn default_concurrency() -> usize {
    2
}
fn default_activity_retention_hours() -> f64 {
    24.0 * 7.0
}

impl Config {
    /// Bare `serde_json` parse, no schema validation (out of scope).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Mappings normalized and sorted the way `PathRouter` requires.
    pub fn sorted_path_mappings(&self) -> Vec<PathMapping> {
        let mut mappings: Vec<PathMapping> = self
            .path_mappings
            .iter()
            .cloned()
            .map(|m| m.normalized())
            .collect();
        plexcache_types::mapping::sort_by_descending_prefix_len(&mut mappings);
        mappings
    }
}
