//! Atomic file replace and directory scan helpers.
//!
//! `replace_file` is the one piece of `pbs-tools::fs` /
//! `proxmox-sys`'s "write-temp-then-rename" convention every tracker
//! store, the exclude list, and the activity log in this crate build
//! on (`spec.md` §3: "Every write is atomic ... No partial file is
//! ever observable").

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

/// Atomically replaces the contents of `path` with `data`.
///
/// The temporary file is created in the same directory as `path` (so
/// the final `rename` is guaranteed to be intra-volume, per the
/// contract), written, `fsync`'d, then renamed over the target.
pub fn replace_file(path: &Path, data: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating parent directory for {}", path.display()))?;

    let tmp_path = sibling_temp_path(path);

    {
        let mut tmp = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("opening temp file {}", tmp_path.display()))?;
        tmp.write_all(data)
            .with_context(|| format!("writing temp file {}", tmp_path.display()))?;
        tmp.sync_all()
            .with_context(|| format!("fsyncing temp file {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "renaming temp file {} onto {}",
            tmp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Picks a same-directory temp-file name that won't collide with a
/// concurrent writer (pid + a per-process counter), the same scheme
/// `pbs-tools` uses rather than pull in a `tempfile` dependency this
/// crate never otherwise needs.
fn sibling_temp_path(path: &Path) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());

    let tmp_name = format!(".{file_name}.{pid}.{n}.tmp");
    path.with_file_name(tmp_name)
}

/// `true` iff `path` exists and is a regular file (symlinks are not
/// followed into "is cached" decisions per `spec.md` §4.5.3's
/// idempotence rule: "the destination side is detected by `isfile` on
/// the final path, excluding symlinks").
pub fn is_regular_file_no_symlink(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

/// Extensions recognized as subtitle sidecars.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "vtt"];

/// Video extensions tried, in order, when deriving a subtitle's parent
/// video (`spec.md` §4.2.1).
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "wmv", "flv", "mov", "ts"];

/// Scans `dir` (non-recursive) for files whose name begins with
/// `video_stem` and ends in a recognized subtitle extension.
pub fn find_subtitle_sidecars(dir: &Path, video_stem: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return found,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(video_stem) {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if SUBTITLE_EXTENSIONS
            .iter()
            .any(|sub_ext| sub_ext.eq_ignore_ascii_case(ext))
        {
            found.push(path);
        }
    }
    found.sort();
    found
}

/// Removes empty parent directories of `leaf` up to, but never
/// including, `stop_at` (`spec.md` §4.5.2, `cleanup_empty_folders`).
pub fn cleanup_empty_parents(leaf: &Path, stop_at: &Path) -> Result<(), Error> {
    let mut dir = match leaf.parent() {
        Some(d) => d.to_path_buf(),
        None => return Ok(()),
    };

    while dir != stop_at && dir.starts_with(stop_at) {
        let mut entries = std::fs::read_dir(&dir)?;
        if entries.next().is_some() {
            break;
        }
        std::fs::remove_dir(&dir)?;
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-tools-test-{tag}-{}-{}",
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
    fn replace_file_is_atomic_and_leaves_no_temp() {
        let dir = scratch_dir("replace");
        let target = dir.join("state.json");

        replace_file(&target, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":1}");

        replace_file(&target, b"{\"a\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":2}");

        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn finds_subtitle_sidecars_by_stem() {
        let dir = scratch_dir("subs");
        std::fs::write(dir.join("Movie.mkv"), b"").unwrap();
        std::fs::write(dir.join("Movie.en.srt"), b"").unwrap();
        std::fs::write(dir.join("Movie.fr.srt"), b"").unwrap();
        std::fs::write(dir.join("Other.srt"), b"").unwrap();

        let found = find_subtitle_sidecars(&dir, "Movie");
        assert_eq!(found.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
