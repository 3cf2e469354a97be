//! The five `MaintenanceRunner` actions (`spec.md` §4.9): on-demand
//! repair operations distinct from a routine `ControlLoop` pass, each
//! restoring one corner of the `BackupSidecar` invariant (`spec.md`
//! §3) rather than rediscovering path mappings itself — callers supply
//! the same cache-path -> array-path shape `ControlLoopInput` does.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;
use walkdir::WalkDir;

use plexcache_datastore::{is_sidecar, original_of_sidecar, sidecar_path};

use crate::context::RunContext;
use crate::migration::create_missing_sidecar;
use crate::mover::{ArrayRestoreRequest, TierMover};

#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub affected: Vec<String>,
    pub failures: Vec<String>,
}

/// `backup-protect`: for every path currently in the exclude list
/// (believed cached), create its `.plexcached` sidecar if missing —
/// the same per-file repair `OneTimeMigration` performs, invocable on
/// demand instead of only once per install.
pub fn backup_protect(ctx: &RunContext, array_paths: &HashMap<String, String>) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();
    let managed = match ctx.exclude_list.managed_paths() {
        Ok(paths) => paths,
        Err(e) => {
            report.failures.push(format!("reading exclude list: {e:#}"));
            return report;
        }
    };

    for cache_path in managed {
        let Some(array_path) = array_paths.get(&cache_path) else { continue };
        match create_missing_sidecar(&PathBuf::from(&cache_path), &PathBuf::from(array_path)) {
            Ok(()) => report.affected.push(cache_path),
            Err(e) => report.failures.push(format!("{cache_path}: {e:#}")),
        }
    }
    report
}

/// `delete-plexcached`: walks `roots` (skipping dot-directories) and
/// deletes every `.plexcached` sidecar whose original already exists
/// as a regular, non-symlink file on the array — the sidecar is
/// redundant once the original has been restored or re-downloaded by
/// some other means.
pub fn delete_plexcached(roots: &[PathBuf]) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    for root in roots {
        let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().map(|n| n.starts_with('.')).unwrap_or(false))
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_sidecar(path) {
                continue;
            }
            let Some(original) = original_of_sidecar(path) else { continue };
            match std::fs::symlink_metadata(&original) {
                Ok(meta) if meta.is_file() && !meta.file_type().is_symlink() => {
                    match std::fs::remove_file(path) {
                        Ok(()) => report.affected.push(path.display().to_string()),
                        Err(e) => report.failures.push(format!("{}: {e}", path.display())),
                    }
                }
                _ => {}
            }
        }
    }
    report
}

/// `sync-to-array`: walks `cache_roots` for regular files whose
/// exclude-list entry has been lost (orphans — the mover's own
/// bookkeeping no longer protects them, so they must not linger on the
/// cache tier) and restores each one to the array.
pub fn sync_orphans_to_array(
    ctx: Arc<RunContext>,
    cache_roots: &[PathBuf],
    array_paths: &HashMap<String, String>,
    max_concurrent: usize,
) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();
    let mut requests = Vec::new();

    for cache_root in cache_roots {
        let walker = WalkDir::new(cache_root).into_iter().filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().map(|n| n.starts_with('.')).unwrap_or(false))
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || is_sidecar(entry.path()) {
                continue;
            }
            let cache_path = entry.path().display().to_string();
            match ctx.exclude_list.contains(&cache_path) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    report.failures.push(format!("{cache_path}: checking exclude list: {e:#}"));
                    continue;
                }
            }
            let Some(array_path) = array_paths.get(&cache_path) else { continue };
            requests.push(ArrayRestoreRequest {
                array_path: PathBuf::from(array_path),
                cache_path: PathBuf::from(&cache_path),
                exclude_entry: cache_path.clone(),
                cache_root: cache_root.clone(),
            });
        }
    }

    let mover = TierMover::new(crate::mover::new_stop_flag());
    let results = mover.move_all_to_array(
        ctx,
        requests,
        max_concurrent.max(1),
        Arc::new(|_| {}),
        Arc::new(|| {}),
    );
    for result in results {
        match result {
            crate::mover::MoveResult::Restored { .. } => {}
            crate::mover::MoveResult::Skipped(reason) => report.failures.push(reason),
            _ => {}
        }
    }
    report
}

/// `fix-with-backup`: repairs a tracked cache entry whose cache copy
/// has vanished by falling back to its `.plexcached` sidecar — either
/// renaming the sidecar back to the array (the common case) or, if the
/// array original has also reappeared by other means, simply dropping
/// the now-redundant sidecar. Clears the tracker and exclude-list
/// entries either way.
pub fn fix_with_backup(ctx: &RunContext, array_paths: &HashMap<String, String>) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    for cache_path in ctx.cache_tracker.keys() {
        if PathBuf::from(&cache_path).exists() {
            continue;
        }
        let Some(array_path) = array_paths.get(&cache_path) else { continue };
        let array_path = PathBuf::from(array_path);
        let sidecar = sidecar_path(&array_path);

        if array_path.exists() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    report.failures.push(format!("{cache_path}: removing stale sidecar: {e}"));
                    continue;
                }
            }
        } else if sidecar.exists() {
            if let Err(e) = std::fs::rename(&sidecar, &array_path) {
                report.failures.push(format!("{cache_path}: restoring sidecar: {e}"));
                continue;
            }
        } else {
            report.failures.push(format!("{cache_path}: cache file and sidecar both missing"));
            continue;
        }

        if let Err(e) = ctx.cache_tracker.remove(&cache_path) {
            warn!("fix-with-backup: clearing tracker entry for {cache_path}: {e:#}");
        }
        if let Err(e) = ctx.exclude_list.remove(&cache_path) {
            warn!("fix-with-backup: clearing exclude entry for {cache_path}: {e:#}");
        }
        report.affected.push(cache_path);
    }
    report
}
