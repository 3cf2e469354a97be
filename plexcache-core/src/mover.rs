//! `TierMover` (`spec.md` §4.5): physically copies/renames/deletes
//! files between the array and cache tiers with bounded parallelism,
//! per-byte progress, and all-or-nothing semantics per file.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};
use chrono::Utc;
use log::{info, warn};

use plexcache_datastore::sidecar::{is_sidecar, original_of_sidecar, sidecar_path};
use plexcache_tools::fs::{cleanup_empty_parents, is_regular_file_no_symlink};
use plexcache_tools::pool::ParallelHandler;
use plexcache_types::{ActivityAction, CacheSource, EpisodeInfo, HardlinkPolicy, MediaType};

use crate::context::RunContext;
use crate::identity::media_identity;

/// Default chunk size for the copy loop (`spec.md` §4.5.1 step 3:
/// "commonly 8 MiB").
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CacheMoveRequest {
    pub array_path: PathBuf,
    pub cache_path: PathBuf,
    /// The host-side path recorded in the exclude file for this file
    /// (already translated to the mover's view by the caller).
    pub exclude_entry: String,
    pub source: CacheSource,
    pub media_type: Option<MediaType>,
    pub episode_info: Option<EpisodeInfo>,
}

#[derive(Debug, Clone)]
pub struct ArrayRestoreRequest {
    pub array_path: PathBuf,
    pub cache_path: PathBuf,
    pub exclude_entry: String,
    /// The cache-tier mapping root; empty cache directories are pruned
    /// up to, but never including, this path (`spec.md` §4.5.2,
    /// `cleanup_empty_folders`).
    pub cache_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveResult {
    Cached { size: u64 },
    Restored { size: u64 },
    Cancelled,
    Skipped(String),
}

/// Shared per-run cancellation flag. Workers check it between chunks
/// and at task-submission boundaries (`spec.md` §4.5.3, §5).
pub fn new_stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

pub struct TierMover {
    chunk_size: usize,
    stop: Arc<AtomicBool>,
}

impl TierMover {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        TierMover { chunk_size: DEFAULT_CHUNK_SIZE, stop }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Runs every `req` to the cache tier through a bounded worker pool
    /// sized `max_concurrent`. `on_bytes` is called from worker threads
    /// after each chunk with the bytes copied in that chunk.
    pub fn move_all_to_cache(
        &self,
        ctx: Arc<RunContext>,
        requests: Vec<CacheMoveRequest>,
        max_concurrent: usize,
        on_bytes: Arc<dyn Fn(u64) + Send + Sync>,
        on_file_done: Arc<dyn Fn() + Send + Sync>,
    ) -> Vec<MoveResult> {
        let results = Arc::new(Mutex::new(Vec::with_capacity(requests.len())));
        let chunk_size = self.chunk_size;
        let stop = Arc::clone(&self.stop);

        {
            let results = Arc::clone(&results);
            let pool = ParallelHandler::new("plexcache-to-cache", max_concurrent.max(1), move |req: CacheMoveRequest| {
                let outcome = move_one_to_cache(&ctx, &req, chunk_size, &stop, on_bytes.as_ref());
                on_file_done();
                match outcome {
                    Ok(result) => {
                        results.lock().unwrap().push(result);
                        Ok(())
                    }
                    Err(e) => {
                        warn!("to-cache move failed for {}: {e:#}", req.array_path.display());
                        results.lock().unwrap().push(MoveResult::Skipped(e.to_string()));
                        Ok(())
                    }
                }
            });
            let mut requests = requests.into_iter();
            while let Some(req) = requests.next() {
                if self.is_stopped() {
                    results.lock().unwrap().push(MoveResult::Cancelled);
                    for _ in requests.by_ref() {
                        results.lock().unwrap().push(MoveResult::Cancelled);
                    }
                    break;
                }
                let _ = pool.send(req);
            }
            let _ = pool.complete();
        }

        Arc::try_unwrap(results).map(|m| m.into_inner().unwrap()).unwrap_or_default()
    }

    pub fn move_all_to_array(
        &self,
        ctx: Arc<RunContext>,
        requests: Vec<ArrayRestoreRequest>,
        max_concurrent: usize,
        on_bytes: Arc<dyn Fn(u64) + Send + Sync>,
        on_file_done: Arc<dyn Fn() + Send + Sync>,
    ) -> Vec<MoveResult> {
        let results = Arc::new(Mutex::new(Vec::with_capacity(requests.len())));
        let chunk_size = self.chunk_size;
        let stop = Arc::clone(&self.stop);

        {
            let results = Arc::clone(&results);
            let pool = ParallelHandler::new("plexcache-to-array", max_concurrent.max(1), move |req: ArrayRestoreRequest| {
                let outcome = move_one_to_array(&ctx, &req, chunk_size, &stop, on_bytes.as_ref());
                on_file_done();
                match outcome {
                    Ok(result) => {
                        results.lock().unwrap().push(result);
                        Ok(())
                    }
                    Err(e) => {
                        warn!("to-array move failed for {}: {e:#}", req.cache_path.display());
                        results.lock().unwrap().push(MoveResult::Skipped(e.to_string()));
                        Ok(())
                    }
                }
            });
            let mut requests = requests.into_iter();
            while let Some(req) = requests.next() {
                if self.is_stopped() {
                    results.lock().unwrap().push(MoveResult::Cancelled);
                    for _ in requests.by_ref() {
                        results.lock().unwrap().push(MoveResult::Cancelled);
                    }
                    break;
                }
                let _ = pool.send(req);
            }
            let _ = pool.complete();
        }

        Arc::try_unwrap(results).map(|m| m.into_inner().unwrap()).unwrap_or_default()
    }
}

fn move_one_to_cache(
    ctx: &RunContext,
    req: &CacheMoveRequest,
    chunk_size: usize,
    stop: &AtomicBool,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> Result<MoveResult, Error> {
    // Idempotence: a repeated move of an already-moved file is a no-op.
    if is_regular_file_no_symlink(&req.cache_path) && sidecar_path(&req.array_path).exists() {
        let size = std::fs::metadata(&req.cache_path)?.len();
        return Ok(MoveResult::Cached { size });
    }

    let src_meta = match std::fs::symlink_metadata(&req.array_path) {
        Ok(m) => m,
        Err(_) => return Ok(MoveResult::Skipped("source vanished".to_string())),
    };
    if !src_meta.is_file() {
        return Ok(MoveResult::Skipped("source is not a regular file".to_string()));
    }

    if ctx.dry_run {
        on_bytes(src_meta.len());
        info!(
            "dry-run: would cache {} -> {}",
            req.array_path.display(),
            req.cache_path.display()
        );
        return Ok(MoveResult::Cached { size: src_meta.len() });
    }

    // 1. Hard-link probe.
    let hardlinked = src_meta.nlink() > 1;
    let original_inode = if hardlinked {
        if ctx.config.hardlinked_files == HardlinkPolicy::Skip {
            return Ok(MoveResult::Skipped("hard-linked, policy is skip".to_string()));
        }
        Some(src_meta.ino())
    } else {
        None
    };

    // 2. Upgrade cleanup: a stale sidecar for a different filename at
    // the same media identity gets deleted; its old exclude entry is
    // dropped too.
    let mut stale_exclude_entry = None;
    if let Some(dir) = req.array_path.parent() {
        if let Some(old_sidecar) = find_sibling_sidecar_by_identity(dir, &req.array_path) {
            if let Some(old_original) = original_of_sidecar(&old_sidecar) {
                stale_exclude_entry = Some(old_original.display().to_string());
            }
            std::fs::remove_file(&old_sidecar).ok();
        }
    }

    if let Some(parent) = req.cache_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }

    // 3. Copy.
    let copy_outcome = copy_with_progress(&req.array_path, &req.cache_path, chunk_size, stop, on_bytes)?;
    if copy_outcome == CopyOutcome::Cancelled {
        std::fs::remove_file(&req.cache_path).ok();
        return Ok(MoveResult::Cancelled);
    }

    // 4. Verify.
    let src_size = src_meta.len();
    let dst_size = std::fs::metadata(&req.cache_path)?.len();
    if src_size != dst_size {
        std::fs::remove_file(&req.cache_path).ok();
        ctx.errors.verification_failed.fetch_add(1, Ordering::Relaxed);
        anyhow::bail!("size mismatch after copy: {src_size} != {dst_size}");
    }
    preserve_metadata(&src_meta, &req.cache_path).ok();

    // 5. Array-side transition.
    let rename_succeeded = if ctx.config.create_plexcached_backups && !hardlinked {
        let sidecar = sidecar_path(&req.array_path);
        match std::fs::rename(&req.array_path, &sidecar) {
            Ok(()) => true,
            Err(e) => {
                std::fs::remove_file(&req.cache_path).ok();
                anyhow::bail!("renaming {} to sidecar failed: {e}", req.array_path.display());
            }
        }
    } else {
        std::fs::remove_file(&req.array_path).ok();
        false
    };

    // 6. Optional symlink.
    if ctx.config.use_symlinks {
        #[cfg(unix)]
        std::os::unix::fs::symlink(&req.cache_path, &req.array_path).ok();
    }

    // 7. Exclude list.
    ctx.exclude_list.append(&req.exclude_entry)?;
    if let Some(stale) = stale_exclude_entry {
        ctx.exclude_list.remove(&stale).ok();
    }

    // 8. Tracker updates.
    let cache_key = req.cache_path.display().to_string();
    ctx.cache_tracker.record_cached(
        &cache_key,
        req.source,
        original_inode,
        req.media_type,
        req.episode_info.clone(),
        ctx.now,
    )?;
    match req.source {
        CacheSource::Ondeck => {
            ctx.ondeck_tracker.mark_cached(&req.exclude_entry, req.source, ctx.now).ok();
        }
        CacheSource::Watchlist => {
            ctx.watchlist_tracker.mark_cached(&req.exclude_entry, req.source, ctx.now).ok();
        }
        _ => {}
    }

    // 9. Activity log.
    ctx.activity_log.append(
        plexcache_datastore::ActivityEvent::new(
            ActivityAction::Cached,
            req.array_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            dst_size,
            Vec::new(),
            ctx.now,
        ),
        ctx.config.activity_retention_hours,
        ctx.now,
    )?;

    if ctx.config.use_symlinks && !rename_succeeded {
        warn!("symlink requested but array original was deleted outright, not renamed to a sidecar");
    }
    Ok(MoveResult::Cached { size: dst_size })
}

fn move_one_to_array(
    ctx: &RunContext,
    req: &ArrayRestoreRequest,
    chunk_size: usize,
    stop: &AtomicBool,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> Result<MoveResult, Error> {
    if !req.cache_path.exists() {
        return Ok(MoveResult::Skipped("cache file vanished".to_string()));
    }
    let cache_meta = std::fs::metadata(&req.cache_path)?;
    let cache_size = cache_meta.len();

    if ctx.dry_run {
        on_bytes(cache_size);
        info!(
            "dry-run: would restore {} -> {}",
            req.cache_path.display(),
            req.array_path.display()
        );
        return Ok(MoveResult::Restored { size: cache_size });
    }

    // Disk-space precheck on the target disk.
    let sidecar = sidecar_path(&req.array_path);
    let needed = if sidecar.exists() {
        let sidecar_size = std::fs::metadata(&sidecar)?.len();
        if sidecar_size == cache_size {
            16 * 1024 * 1024 // metadata headroom only
        } else {
            cache_size.saturating_sub(sidecar_size) + 16 * 1024 * 1024
        }
    } else {
        cache_size + 16 * 1024 * 1024
    };
    if let Some(parent) = req.array_path.parent() {
        if let Ok(free) = ctx.platform.get_disk_free_space_bytes(parent) {
            if free < needed {
                ctx.errors.no_space.fetch_add(1, Ordering::Relaxed);
                return Ok(MoveResult::Skipped(format!("insufficient space: need {needed}, have {free}")));
            }
        }
    }

    // 1. Hard-link restore.
    if let Some((_, record)) = ctx.cache_tracker.resolve(&req.cache_path.display().to_string()) {
        if let Some(inode) = record.original_inode {
            if let Some(found) = find_surviving_hardlink(&req.array_path, inode) {
                std::fs::hard_link(&found, &req.array_path)
                    .with_context(|| format!("hard-linking {} from {}", req.array_path.display(), found.display()))?;
                std::fs::remove_file(&req.cache_path).ok();
                finish_restore(ctx, req, cache_size)?;
                return Ok(MoveResult::Restored { size: cache_size });
            }
        }
    }

    let restored = if sidecar.exists() {
        let sidecar_size = std::fs::metadata(&sidecar)?.len();
        if sidecar_size == cache_size {
            // 2. Sidecar rename, the fast path.
            std::fs::rename(&sidecar, &req.array_path)
                .with_context(|| format!("renaming sidecar back to {}", req.array_path.display()))?;
            true
        } else {
            // 3. In-place upgrade: delete stale sidecar, copy fresh.
            std::fs::remove_file(&sidecar).ok();
            copy_to_array_direct(ctx, &req.cache_path, &req.array_path, chunk_size, stop, on_bytes)?
        }
    } else if let Some(other_sidecar) = find_sibling_sidecar_by_identity(req.array_path.parent().unwrap_or(Path::new(".")), &req.array_path) {
        // 4. Filename-change upgrade.
        std::fs::remove_file(&other_sidecar).ok();
        copy_to_array_direct(ctx, &req.cache_path, &req.array_path, chunk_size, stop, on_bytes)?
    } else {
        // 5. No sidecar path: plain copy.
        copy_to_array_direct(ctx, &req.cache_path, &req.array_path, chunk_size, stop, on_bytes)?
    };

    if !restored {
        return Ok(MoveResult::Cancelled);
    }

    std::fs::remove_file(&req.cache_path).ok();
    finish_restore(ctx, req, cache_size)?;
    Ok(MoveResult::Restored { size: cache_size })
}

/// Copies cache -> array bypassing any FUSE union view, verifying by
/// size afterward. Returns `false` if cancelled mid-copy.
fn copy_to_array_direct(
    ctx: &RunContext,
    cache_path: &Path,
    array_path: &Path,
    chunk_size: usize,
    stop: &AtomicBool,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> Result<bool, Error> {
    let direct_target = PathBuf::from(ctx.platform.get_array_direct_path(&array_path.display().to_string()));
    if let Some(parent) = direct_target.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let outcome = copy_with_progress(cache_path, &direct_target, chunk_size, stop, on_bytes)?;
    if outcome == CopyOutcome::Cancelled {
        std::fs::remove_file(&direct_target).ok();
        return Ok(false);
    }
    let src_size = std::fs::metadata(cache_path)?.len();
    let dst_size = std::fs::metadata(&direct_target)?.len();
    if src_size != dst_size {
        std::fs::remove_file(&direct_target).ok();
        anyhow::bail!("size mismatch restoring to array: {src_size} != {dst_size}");
    }
    Ok(true)
}

fn finish_restore(ctx: &RunContext, req: &ArrayRestoreRequest, size: u64) -> Result<(), Error> {
    if ctx.config.cleanup_empty_folders {
        cleanup_empty_parents(&req.cache_path, &req.cache_root).ok();
    }
    ctx.exclude_list.remove(&req.exclude_entry)?;
    ctx.cache_tracker.remove(&req.cache_path.display().to_string())?;
    ctx.activity_log.append(
        plexcache_datastore::ActivityEvent::new(
            ActivityAction::Restored,
            req.array_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            size,
            Vec::new(),
            ctx.now,
        ),
        ctx.config.activity_retention_hours,
        ctx.now,
    )?;
    Ok(())
}

fn find_surviving_hardlink(array_path: &Path, inode: u64) -> Option<PathBuf> {
    let dir = array_path.parent()?;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path == array_path {
            continue;
        }
        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.is_file() && meta.ino() == inode {
                return Some(path);
            }
        }
    }
    None
}

fn find_sibling_sidecar_by_identity(dir: &Path, new_file: &Path) -> Option<PathBuf> {
    let target_identity = media_identity(new_file);
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if !is_sidecar(&path) {
            continue;
        }
        let Some(original) = original_of_sidecar(&path) else {
            continue;
        };
        if original == new_file {
            continue;
        }
        if media_identity(&original) == target_identity {
            return Some(path);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyOutcome {
    Completed,
    Cancelled,
}

fn copy_with_progress(
    src: &Path,
    dst: &Path,
    chunk_size: usize,
    stop: &AtomicBool,
    on_bytes: &(dyn Fn(u64) + Send + Sync),
) -> Result<CopyOutcome, Error> {
    let mut reader = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut writer = File::create(dst).with_context(|| format!("creating {}", dst.display()))?;

    let mut buf = vec![0u8; chunk_size];
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(CopyOutcome::Cancelled);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        on_bytes(n as u64);
        if stop.load(Ordering::SeqCst) {
            return Ok(CopyOutcome::Cancelled);
        }
    }
    writer.sync_all()?;
    Ok(CopyOutcome::Completed)
}

fn preserve_metadata(src_meta: &std::fs::Metadata, dst: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dst, std::fs::Permissions::from_mode(src_meta.permissions().mode()))?;

    let atime = nix::sys::time::TimeSpec::new(src_meta.atime(), src_meta.atime_nsec());
    let mtime = nix::sys::time::TimeSpec::new(src_meta.mtime(), src_meta.mtime_nsec());
    nix::sys::stat::utimensat(
        None,
        dst,
        &atime,
        &mtime,
        nix::sys::stat::UtimensatFlags::FollowSymlink,
    )?;

    // Best-effort: only a privileged process can actually chown.
    let _ = nix::unistd::chown(
        dst,
        Some(nix::unistd::Uid::from_raw(src_meta.uid())),
        Some(nix::unistd::Gid::from_raw(src_meta.gid())),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_config::Config;
    use plexcache_datastore::{ActivityLog, CacheTimestampTracker, OnDeckTracker, WatchlistTracker};
    use std::sync::atomic::AtomicU64;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-mover-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "plex_url": "http://localhost",
            "plex_token": "x",
            "cache_drive_size": "100GB",
        }))
        .unwrap()
    }

    fn test_context(dir: &Path) -> Arc<RunContext> {
        Arc::new(RunContext::new(
            test_config(),
            dir.to_path_buf(),
            Utc::now(),
            CacheTimestampTracker::load(dir.join("timestamps.json")).unwrap(),
            OnDeckTracker::load(dir.join("ondeck.json")).unwrap(),
            WatchlistTracker::load(dir.join("watchlist.json")).unwrap(),
            ActivityLog::new(dir.join("activity.json")),
            crate::exclude_list::ExcludeList::new(dir.join("exclude.txt")),
            Arc::new(crate::platform::NullPlatformAdapter),
        ))
    }

    #[test]
    fn caches_a_file_and_leaves_a_sidecar() {
        let dir = scratch_dir("cache-basic");
        let array_dir = dir.join("array");
        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&array_dir).unwrap();
        let array_file = array_dir.join("Movie.mkv");
        std::fs::write(&array_file, vec![7u8; 4096]).unwrap();

        let ctx = test_context(&dir);
        let mover = TierMover::new(new_stop_flag());
        let req = CacheMoveRequest {
            array_path: array_file.clone(),
            cache_path: cache_dir.join("Movie.mkv"),
            exclude_entry: cache_dir.join("Movie.mkv").display().to_string(),
            source: CacheSource::Ondeck,
            media_type: Some(MediaType::Movie),
            episode_info: None,
        };

        let bytes_counter = Arc::new(AtomicU64::new(0));
        let bc = Arc::clone(&bytes_counter);
        let results = mover.move_all_to_cache(
            Arc::clone(&ctx),
            vec![req],
            1,
            Arc::new(move |n| { bc.fetch_add(n, Ordering::Relaxed); }),
            Arc::new(|| {}),
        );

        assert_eq!(results, vec![MoveResult::Cached { size: 4096 }]);
        assert!(cache_dir.join("Movie.mkv").exists());
        assert!(!array_file.exists());
        assert!(array_dir.join("Movie.mkv.plexcached").exists());
        assert_eq!(bytes_counter.load(Ordering::Relaxed), 4096);
        assert!(ctx.exclude_list.contains(&cache_dir.join("Movie.mkv").display().to_string()).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn restores_via_sidecar_fast_path() {
        let dir = scratch_dir("restore-fast");
        let array_dir = dir.join("array");
        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&array_dir).unwrap();
        std::fs::create_dir_all(&cache_dir).unwrap();
        let array_file = array_dir.join("Movie.mkv");
        let cache_file = cache_dir.join("Movie.mkv");
        let sidecar = array_dir.join("Movie.mkv.plexcached");
        std::fs::write(&cache_file, vec![1u8; 2048]).unwrap();
        std::fs::write(&sidecar, vec![1u8; 2048]).unwrap();

        let ctx = test_context(&dir);
        ctx.exclude_list.append(&cache_file.display().to_string()).unwrap();
        let mover = TierMover::new(new_stop_flag());
        let req = ArrayRestoreRequest {
            array_path: array_file.clone(),
            cache_path: cache_file.clone(),
            exclude_entry: cache_file.display().to_string(),
            cache_root: cache_dir.clone(),
        };

        let results = mover.move_all_to_array(
            Arc::clone(&ctx),
            vec![req],
            1,
            Arc::new(|_| {}),
            Arc::new(|| {}),
        );

        assert_eq!(results, vec![MoveResult::Restored { size: 2048 }]);
        assert!(array_file.exists());
        assert!(!sidecar.exists());
        assert!(!cache_file.exists());
        assert!(!ctx.exclude_list.contains(&cache_file.display().to_string()).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dry_run_leaves_files_untouched() {
        let dir = scratch_dir("dry-run");
        let array_dir = dir.join("array");
        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&array_dir).unwrap();
        let array_file = array_dir.join("Movie.mkv");
        std::fs::write(&array_file, vec![3u8; 128]).unwrap();

        let mut ctx = RunContext::new(
            test_config(),
            dir.to_path_buf(),
            Utc::now(),
            CacheTimestampTracker::load(dir.join("timestamps.json")).unwrap(),
            OnDeckTracker::load(dir.join("ondeck.json")).unwrap(),
            WatchlistTracker::load(dir.join("watchlist.json")).unwrap(),
            ActivityLog::new(dir.join("activity.json")),
            crate::exclude_list::ExcludeList::new(dir.join("exclude.txt")),
            Arc::new(crate::platform::NullPlatformAdapter),
        );
        ctx = ctx.with_dry_run(true);
        let ctx = Arc::new(ctx);

        let mover = TierMover::new(new_stop_flag());
        let req = CacheMoveRequest {
            array_path: array_file.clone(),
            cache_path: cache_dir.join("Movie.mkv"),
            exclude_entry: cache_dir.join("Movie.mkv").display().to_string(),
            source: CacheSource::Ondeck,
            media_type: Some(MediaType::Movie),
            episode_info: None,
        };

        let results = mover.move_all_to_cache(Arc::clone(&ctx), vec![req], 1, Arc::new(|_| {}), Arc::new(|| {}));
        assert_eq!(results, vec![MoveResult::Cached { size: 128 }]);
        assert!(array_file.exists());
        assert!(!cache_dir.join("Movie.mkv").exists());
        assert!(!ctx.exclude_list.contains(&cache_dir.join("Movie.mkv").display().to_string()).unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cancelling_mid_copy_leaves_no_partial_cache_file() {
        let dir = scratch_dir("cancel");
        let array_dir = dir.join("array");
        let cache_dir = dir.join("cache");
        std::fs::create_dir_all(&array_dir).unwrap();
        let array_file = array_dir.join("Movie.mkv");
        std::fs::write(&array_file, vec![9u8; 64]).unwrap();

        let ctx = test_context(&dir);
        let stop = new_stop_flag();
        stop.store(true, Ordering::SeqCst);
        let mover = TierMover::new(stop);
        let req = CacheMoveRequest {
            array_path: array_file.clone(),
            cache_path: cache_dir.join("Movie.mkv"),
            exclude_entry: cache_dir.join("Movie.mkv").display().to_string(),
            source: CacheSource::Ondeck,
            media_type: None,
            episode_info: None,
        };

        let results = mover.move_all_to_cache(ctx, vec![req], 1, Arc::new(|_| {}), Arc::new(|| {}));
        assert_eq!(results, vec![MoveResult::Cancelled]);
        assert!(!cache_dir.join("Movie.mkv").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
