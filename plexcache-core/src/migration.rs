//! The one-time backup-sidecar migration (`spec.md` §4.7 phase 5,
//! §2 item 12): on first run after upgrade, every currently-excluded
//! path lacking a `.plexcached` sidecar gets one created from the
//! cache copy. All-or-nothing per file, retry-safe overall — an
//! aborted pass simply leaves the marker absent so the next run
//! retries it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{info, warn};

use plexcache_datastore::sidecar_path;
use plexcache_tools::pool::ParallelHandler;

pub struct OneTimeMigration {
    marker_path: PathBuf,
}

impl OneTimeMigration {
    pub fn new(marker_path: PathBuf) -> Self {
        OneTimeMigration { marker_path }
    }

    pub fn is_complete(&self) -> bool {
        self.marker_path.exists()
    }

    /// Runs the migration if not already complete. `excluded_cache_paths`
    /// is the current exclude-list contents translated to the direct
    /// array path the sidecar belongs next to; `concurrency` mirrors
    /// `max_concurrent_moves_array` the way `TierMover` uses it.
    pub fn run_if_needed(
        &self,
        pairs: Vec<(PathBuf, PathBuf)>,
        concurrency: usize,
    ) -> Result<(), Error> {
        if self.is_complete() {
            return Ok(());
        }

        info!("running one-time backup-sidecar migration over {} entries", pairs.len());

        let pool = ParallelHandler::new("plexcache-migration", concurrency, move |(cache_path, array_path): (PathBuf, PathBuf)| {
            create_missing_sidecar(&cache_path, &array_path)
        });
        for pair in pairs {
            pool.send(pair)?;
        }
        pool.complete()?;

        if let Some(dir) = self.marker_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.marker_path, b"")
            .with_context(|| format!("writing migration marker {}", self.marker_path.display()))?;
        Ok(())
    }
}

pub(crate) fn create_missing_sidecar(cache_path: &Path, array_path: &Path) -> Result<(), Error> {
    let sidecar = sidecar_path(array_path);
    if sidecar.exists() {
        return Ok(());
    }
    if !cache_path.exists() {
        warn!("migration: cache file missing for {}, skipping", cache_path.display());
        return Ok(());
    }
    std::fs::copy(cache_path, &sidecar)
        .with_context(|| format!("copying {} to {}", cache_path.display(), sidecar.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-migration-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn creates_sidecars_and_writes_marker() {
        let dir = scratch_dir("run");
        let cache_file = dir.join("Movie.mkv");
        std::fs::write(&cache_file, b"data").unwrap();
        let array_file = dir.join("array").join("Movie.mkv");
        std::fs::create_dir_all(array_file.parent().unwrap()).unwrap();

        let migration = OneTimeMigration::new(dir.join("plexcache_migration_v2.complete"));
        migration.run_if_needed(vec![(cache_file.clone(), array_file.clone())], 2).unwrap();

        assert!(sidecar_path(&array_file).exists());
        assert!(migration.is_complete());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn second_call_is_a_no_op() {
        let dir = scratch_dir("idempotent");
        let migration = OneTimeMigration::new(dir.join("marker"));
        migration.run_if_needed(vec![], 1).unwrap();
        assert!(migration.is_complete());
        migration.run_if_needed(vec![(PathBuf::from("/nonexistent"), PathBuf::from("/nonexistent2"))], 1).unwrap();

        std::fs::remove_dir_all(&dir).ok();
    }
}
