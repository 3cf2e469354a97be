//! Domain types shared by every PlexCache-R crate.
//!
//! Grounded on `pbs-api-types`: small `serde`-only records and tagged
//! enums, without the JSON-Schema macro layer (config validation is out
//! of scope for this core, see `SPEC_FULL.md` §0).

pub mod episode;
pub mod mapping;
pub mod media_item;
pub mod size;

pub use episode::EpisodeInfo;
pub use mapping::PathMapping;
pub use media_item::{OnDeckItem, WatchlistItem};
pub use size::{HumanByte, SizeExpr};

use serde::{Deserialize, Serialize};

/// Suffix for a BackupSidecar file (`spec.md` §3, §10).
pub const SIDECAR_SUFFIX: &str = ".plexcached";

/// Where a cached file's retention policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheSource {
    Ondeck,
    Watchlist,
    PreExisting,
    Unknown,
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CacheSource::Ondeck => "ondeck",
            CacheSource::Watchlist => "watchlist",
            CacheSource::PreExisting => "pre-existing",
            CacheSource::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Episode vs movie classification for a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Episode,
    Movie,
}

/// One entry in the shared `ActivityLog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Cached,
    Restored,
    Moved,
    Protected,
    Evicted,
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityAction::Cached => "Cached",
            ActivityAction::Restored => "Restored",
            ActivityAction::Moved => "Moved",
            ActivityAction::Protected => "Protected",
            ActivityAction::Evicted => "Evicted",
        };
        f.write_str(s)
    }
}

/// `cache_eviction_mode` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    Smart,
    Fifo,
    None,
}

/// `hardlinked_files` config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardlinkPolicy {
    Skip,
    Move,
}

/// `notification_type`-adjacent severity used when an activity event is
/// escalated to a notification (dispatch itself is out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Summary,
    Activity,
    Warning,
    Error,
}

/// Phased status surfaced by `OperationRunner`/`MaintenanceRunner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Starting,
    Fetching,
    Analyzing,
    Moving,
    Restoring,
    Caching,
    Evicting,
    Results,
}

/// Terminal state of a completed/aborted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunOutcome {
    Completed { stopped_early: bool },
    Failed { reason: String },
}
