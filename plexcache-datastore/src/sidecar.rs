//! The `BackupSidecar` protocol (`spec.md` §4.10): the on-disk
//! convention that turns caching into a reversible operation, plus the
//! `PlexcachedRestorer` emergency tool.

use std::path::{Path, PathBuf};

use anyhow::{bail, Error};
use walkdir::WalkDir;

use plexcache_types::SIDECAR_SUFFIX;

/// The sidecar path for an array-side original.
pub fn sidecar_path(array_file: &Path) -> PathBuf {
    let mut s = array_file.as_os_str().to_owned();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

/// `true` iff `path` names a sidecar file.
pub fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .map(|e| e == &SIDECAR_SUFFIX[1..])
        .unwrap_or(false)
}

/// The original path a sidecar restores to.
pub fn original_of_sidecar(sidecar: &Path) -> Option<PathBuf> {
    let s = sidecar.to_str()?;
    s.strip_suffix(SIDECAR_SUFFIX).map(PathBuf::from)
}

/// Walks `roots`, skipping dot-directories, enumerating every
/// `*.plexcached` sidecar and renaming it back to its original name.
/// Refuses to overwrite a non-symlink existing original; a symlink at
/// the original location (pointing at the now-doomed cache copy) is
/// removed first so the rename can proceed (`spec.md` §4.10).
pub struct PlexcachedRestorer;

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
}

impl PlexcachedRestorer {
    pub fn restore_subtrees(roots: &[PathBuf]) -> Result<RestoreReport, Error> {
        let mut report = RestoreReport::default();

        for root in roots {
            let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .map(|n| n.starts_with('.'))
                        .unwrap_or(false))
            });

            for entry in walker.filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if !is_sidecar(path) {
                    continue;
                }
                match restore_one(path) {
                    Ok(original) => report.restored.push(original),
                    Err(e) => report.skipped.push((path.to_path_buf(), e.to_string())),
                }
            }
        }

        Ok(report)
    }
}

fn restore_one(sidecar: &Path) -> Result<PathBuf, Error> {
    let Some(original) = original_of_sidecar(sidecar) else {
        bail!("sidecar path has no valid original: {}", sidecar.display());
    };

    match std::fs::symlink_metadata(&original) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::remove_file(&original)?;
        }
        Ok(_) => {
            bail!(
                "refusing to overwrite existing non-symlink original {}",
                original.display()
            );
        }
        Err(_) => {}
    }

    std::fs::rename(sidecar, &original)?;
    Ok(original)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "plexcache-sidecar-{tag}-{}-{}",
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
    fn restores_sidecar_to_original_name() {
        let dir = scratch_dir("restore");
        let sidecar = dir.join("Movie.mkv.plexcached");
        std::fs::write(&sidecar, b"data").unwrap();

        let report = PlexcachedRestorer::restore_subtrees(&[dir.clone()]).unwrap();
        assert_eq!(report.restored, vec![dir.join("Movie.mkv")]);
        assert!(dir.join("Movie.mkv").exists());
        assert!(!sidecar.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn refuses_to_overwrite_existing_non_symlink_original() {
        let dir = scratch_dir("refuse");
        std::fs::write(dir.join("Movie.mkv"), b"existing").unwrap();
        std::fs::write(dir.join("Movie.mkv.plexcached"), b"data").unwrap();

        let report = PlexcachedRestorer::restore_subtrees(&[dir.clone()]).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.join("Movie.mkv")).unwrap(),
            "existing"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn skips_dot_directories() {
        let dir = scratch_dir("dotdir");
        std::fs::create_dir_all(dir.join(".recycle")).unwrap();
        std::fs::write(dir.join(".recycle/Movie.mkv.plexcached"), b"data").unwrap();

        let report = PlexcachedRestorer::restore_subtrees(&[dir.clone()]).unwrap();
        assert!(report.restored.is_empty());
        assert!(report.skipped.is_empty());
        assert!(dir.join(".recycle/Movie.mkv.plexcached").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
