//! Small, dependency-light helpers shared by every PlexCache-R crate
//! that touches the filesystem: atomic file replace, a single-instance
//! `flock` guard, directory scanning, and an append-only file logger.
//!
//! Grounded on `pbs-tools::{fs, process_locker}` and
//! `src/server/worker_task.rs`'s `FileLogger`.

pub mod fs;
pub mod lock;
pub mod logger;
pub mod pool;
