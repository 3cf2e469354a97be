//! The three persistent trackers, the shared generic store they're
//! built on, the activity log, and the backup-sidecar protocol.
//!
//! Grounded on `pbs-datastore`: `tracker` plays the role `DataStore`
//! plays for chunks, `activity_log` mirrors the shape of
//! `StoreProgress`/GC status reporting, and `sidecar` generalizes the
//! `.gc-status` atomically-replaced sentinel file into the
//! `.plexcached` backup convention.

pub mod activity_log;
pub mod cache_tracker;
pub mod ondeck_tracker;
pub mod progress;
pub mod sidecar;
pub mod tracker;
pub mod watchlist_tracker;

pub use activity_log::{ActivityEvent, ActivityLog};
pub use cache_tracker::{CacheRecord, CacheTimestampTracker};
pub use ondeck_tracker::{OnDeckRecord, OnDeckTracker};
pub use progress::RunProgress;
pub use sidecar::{is_sidecar, original_of_sidecar, sidecar_path, PlexcachedRestorer, RestoreReport};
pub use tracker::{TrackerError, TrackerStore};
pub use watchlist_tracker::{WatchlistRecord, WatchlistTracker};
