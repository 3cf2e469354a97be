//! The external bulk mover's exclude file: the operating contract that
//! tells the mover which cache-side paths it must not migrate away.
//!
//! Format (`spec.md` §4.7 phase 16, §6): everything above the sentinel
//! line is user-managed and preserved verbatim; everything below is
//! replaced every run by the PlexCache-managed set, one absolute
//! host-side cache path per line, LF-terminated, deduplicated.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Error};

pub const SENTINEL: &str = "### Plexcache exclusions below this line";

pub struct ExcludeList {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ExcludeList {
    pub fn new(path: PathBuf) -> Self {
        ExcludeList { path, lock: Mutex::new(()) }
    }

    fn read_raw(&self) -> Result<String, Error> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("reading exclude list {}", self.path.display())),
        }
    }

    /// The user-preserved header above the sentinel, or the whole file
    /// content verbatim if the sentinel is absent.
    fn user_header(raw: &str) -> &str {
        match raw.find(SENTINEL) {
            Some(idx) => &raw[..idx],
            None => raw,
        }
    }

    /// Reads the current PlexCache-managed lines (below the sentinel),
    /// deduplicated but in file order.
    pub fn managed_paths(&self) -> Result<Vec<String>, Error> {
        let _guard = self.lock.lock().unwrap();
        let raw = self.read_raw()?;
        let managed = match raw.find(SENTINEL) {
            Some(idx) => &raw[idx + SENTINEL.len()..],
            None => "",
        };
        let mut seen = BTreeSet::new();
        let mut lines = Vec::new();
        for line in managed.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if seen.insert(line.to_string()) {
                lines.push(line.to_string());
            }
        }
        Ok(lines)
    }

    /// `true` iff `path` is currently listed below the sentinel.
    pub fn contains(&self, path: &str) -> Result<bool, Error> {
        Ok(self.managed_paths()?.iter().any(|p| p == path))
    }

    /// Rewrites the managed section to exactly `paths` (deduplicated,
    /// insertion order preserved), keeping the user header verbatim. If
    /// the sentinel is missing, it is appended.
    pub fn rewrite(&self, paths: &[String]) -> Result<(), Error> {
        let _guard = self.lock.lock().unwrap();
        let raw = self.read_raw()?;
        let header = Self::user_header(&raw);

        let mut seen = BTreeSet::new();
        let mut out = String::new();
        out.push_str(header.trim_end_matches('\n'));
        if !header.is_empty() {
            out.push('\n');
        }
        out.push_str(SENTINEL);
        out.push('\n');
        for p in paths {
            if seen.insert(p.clone()) {
                out.push_str(p);
                out.push('\n');
            }
        }

        plexcache_tools::fs::replace_file(&self.path, out.as_bytes())
    }

    /// Appends one path to the managed section if not already present.
    pub fn append(&self, path: &str) -> Result<(), Error> {
        let mut paths = self.managed_paths()?;
        if !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
            self.rewrite(&paths)?;
        }
        Ok(())
    }

    /// Removes one path from the managed section, if present.
    pub fn remove(&self, path: &str) -> Result<(), Error> {
        let paths = self.managed_paths()?;
        let filtered: Vec<String> = paths.into_iter().filter(|p| p != path).collect();
        self.rewrite(&filtered)
    }

    /// Removes any managed entry whose file no longer exists
    /// (`clean_stale_exclude_entries`, `spec.md` §4.4). `exists` lets
    /// callers translate a cache path to whatever filesystem view is
    /// appropriate before checking.
    pub fn sweep_stale(&self, exists: impl Fn(&str) -> bool) -> Result<Vec<String>, Error> {
        let paths = self.managed_paths()?;
        let (kept, removed): (Vec<String>, Vec<String>) = paths.into_iter().partition(|p| exists(p));
        self.rewrite(&kept)?;
        Ok(removed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "plexcache-exclude-{tag}-{}-{}.txt",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn preserves_user_header_above_sentinel() {
        let path = scratch_path("header");
        std::fs::write(&path, format!("# manual entry\n/mnt/cache/manual.mkv\n{SENTINEL}\n/mnt/cache/old.mkv\n")).unwrap();

        let list = ExcludeList::new(path.clone());
        list.rewrite(&["/mnt/cache/new.mkv".to_string()]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# manual entry\n/mnt/cache/manual.mkv\n"));
        assert!(contents.contains(SENTINEL));
        assert!(contents.contains("/mnt/cache/new.mkv"));
        assert!(!contents.contains("/mnt/cache/old.mkv"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn appends_sentinel_when_missing() {
        let path = scratch_path("nosentinel");
        let list = ExcludeList::new(path.clone());
        list.append("/mnt/cache/a.mkv").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(SENTINEL));
        assert!(contents.contains("/mnt/cache/a.mkv"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_lines_are_deduplicated_on_rewrite() {
        let path = scratch_path("dedup");
        let list = ExcludeList::new(path.clone());
        list.rewrite(&[
            "/mnt/cache/a.mkv".to_string(),
            "/mnt/cache/a.mkv".to_string(),
            "/mnt/cache/b.mkv".to_string(),
        ])
        .unwrap();

        assert_eq!(
            list.managed_paths().unwrap(),
            vec!["/mnt/cache/a.mkv".to_string(), "/mnt/cache/b.mkv".to_string()]
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sweep_stale_removes_nonexistent_entries() {
        let path = scratch_path("sweep");
        let list = ExcludeList::new(path.clone());
        list.rewrite(&["/exists".to_string(), "/gone".to_string()]).unwrap();

        let removed = list.sweep_stale(|p| p == "/exists").unwrap();
        assert_eq!(removed, vec!["/gone".to_string()]);
        assert_eq!(list.managed_paths().unwrap(), vec!["/exists".to_string()]);

        std::fs::remove_file(&path).ok();
    }
}
