//! The caching control loop: path routing, priority scoring, tier
//! movement, eviction, and the background runners that drive them.
//!
//! Wires together the media-server-agnostic pieces of the system —
//! everything downstream of "here is a snapshot of OnDeck/Watchlist
//! items and a directory scan" — grounded throughout on Proxmox
//! Backup Server's worker-pool, atomic-persistence, and worker-task
//! idioms.

pub mod cache_limit;
pub mod context;
pub mod eviction;
pub mod exclude_list;
pub mod filter;
pub mod identity;
pub mod maintenance;
pub mod migration;
pub mod mover;
pub mod path_router;
pub mod platform;
pub mod priority;
pub mod server;

pub use cache_limit::{apply_cache_size_limit, resolve_cache_limit_bytes, resolve_min_free_space_bytes};
pub use context::{ErrorCounters, RunContext};
pub use eviction::{EvictionEngine, EvictionReport};
pub use maintenance::MaintenanceReport;
pub use exclude_list::ExcludeList;
pub use migration::OneTimeMigration;
pub use mover::{ArrayRestoreRequest, CacheMoveRequest, MoveResult, TierMover};
pub use path_router::PathRouter;
pub use platform::{LinuxPlatformAdapter, NullPlatformAdapter, PlatformAdapter};
pub use priority::PriorityScorer;
pub use server::{ControlLoop, ControlLoopInput, MaintenanceAction, MaintenanceRunner, OperationRunner};
