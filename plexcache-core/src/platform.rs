//! The `PlatformAdapter` capability the core consumes from its host
//! environment (`spec.md` §6) — Unraid/Docker/ZFS detection and
//! subprocess probes are all platform-specific noise the core itself
//! must never touch directly.

use std::path::Path;

use anyhow::{Context, Error};

pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

pub trait PlatformAdapter: Send + Sync {
    fn is_linux(&self) -> bool;
    fn is_unraid(&self) -> bool;
    fn is_docker(&self) -> bool;
    fn get_disk_usage(&self, path: &Path) -> Result<DiskUsage, Error>;
    fn get_disk_free_space_bytes(&self, path: &Path) -> Result<u64, Error> {
        Ok(self.get_disk_usage(path)?.free_bytes)
    }
    /// Unraid-specific: `/mnt/user0/...` -> `/mnt/diskN/...`.
    fn resolve_user0_to_disk(&self, path: &str) -> Option<String>;
    /// `/mnt/user/x` -> `/mnt/user0/x`, the direct (non-FUSE-union)
    /// view of the array used to sidestep rename-visibility glitches
    /// (`SPEC_FULL.md` §9).
    fn get_array_direct_path(&self, path: &str) -> String;
    fn detect_zfs(&self, path: &Path) -> bool;
    fn is_mover_running(&self) -> Result<bool, Error>;
}

/// A no-op adapter for tests and non-Linux builds: reports nothing
/// special about the host and never claims the mover is running.
pub struct NullPlatformAdapter;

impl PlatformAdapter for NullPlatformAdapter {
    fn is_linux(&self) -> bool {
        false
    }
    fn is_unraid(&self) -> bool {
        false
    }
    fn is_docker(&self) -> bool {
        false
    }
    fn get_disk_usage(&self, _path: &Path) -> Result<DiskUsage, Error> {
        Ok(DiskUsage { total_bytes: 0, used_bytes: 0, free_bytes: u64::MAX })
    }
    fn resolve_user0_to_disk(&self, _path: &str) -> Option<String> {
        None
    }
    fn get_array_direct_path(&self, path: &str) -> String {
        path.to_string()
    }
    fn detect_zfs(&self, _path: &Path) -> bool {
        false
    }
    fn is_mover_running(&self) -> Result<bool, Error> {
        Ok(false)
    }
}

/// The `zfs` magic number from `statfs(2)`'s `f_type`; not exposed by
/// `libc` on every target the way the common VFS magics are.
const ZFS_SUPER_MAGIC: i64 = 0x2fc1_2fc1;

/// Production adapter for Unraid/Linux hosts.
pub struct LinuxPlatformAdapter {
    unraid: bool,
    docker: bool,
    mover_pid_file: Option<std::path::PathBuf>,
}

impl LinuxPlatformAdapter {
    pub fn new(unraid: bool, docker: bool, mover_pid_file: Option<std::path::PathBuf>) -> Self {
        LinuxPlatformAdapter { unraid, docker, mover_pid_file }
    }

    /// Detects Unraid by the presence of its version file, Docker by
    /// the conventional `/.dockerenv` marker.
    pub fn detect() -> Self {
        LinuxPlatformAdapter {
            unraid: Path::new("/etc/unraid-version").exists(),
            docker: Path::new("/.dockerenv").exists(),
            mover_pid_file: Some(std::path::PathBuf::from("/var/run/mover.pid")),
        }
    }
}

impl PlatformAdapter for LinuxPlatformAdapter {
    fn is_linux(&self) -> bool {
        true
    }

    fn is_unraid(&self) -> bool {
        self.unraid
    }

    fn is_docker(&self) -> bool {
        self.docker
    }

    fn get_disk_usage(&self, path: &Path) -> Result<DiskUsage, Error> {
        let stat = nix::sys::statvfs::statvfs(path)
            .with_context(|| format!("statvfs {}", path.display()))?;
        let block_size = stat.fragment_size().max(1);
        let total_bytes = stat.blocks() * block_size;
        let free_bytes = stat.blocks_available() * block_size;
        Ok(DiskUsage {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            free_bytes,
        })
    }

    fn resolve_user0_to_disk(&self, path: &str) -> Option<String> {
        path.strip_prefix("/mnt/user0/")
            .map(|rest| format!("/mnt/diskN/{rest}"))
    }

    fn get_array_direct_path(&self, path: &str) -> String {
        if let Some(rest) = path.strip_prefix("/mnt/user/") {
            format!("/mnt/user0/{rest}")
        } else {
            path.to_string()
        }
    }

    fn detect_zfs(&self, path: &Path) -> bool {
        let Ok(file) = std::fs::File::open(path) else {
            return false;
        };
        use std::os::unix::io::AsRawFd;
        let mut fs_stat = std::mem::MaybeUninit::uninit();
        let res = unsafe { libc::fstatfs(file.as_raw_fd(), fs_stat.as_mut_ptr()) };
        if res != 0 {
            return false;
        }
        let fs_stat = unsafe { fs_stat.assume_init() };
        fs_stat.f_type as i64 == ZFS_SUPER_MAGIC
    }

    fn is_mover_running(&self) -> Result<bool, Error> {
        let Some(pid_file) = &self.mover_pid_file else {
            return Ok(false);
        };
        match std::fs::read_to_string(pid_file) {
            Ok(contents) => {
                let pid: libc::pid_t = contents.trim().parse().unwrap_or(0);
                if pid <= 0 {
                    return Ok(false);
                }
                let alive = unsafe { libc::kill(pid, 0) } == 0;
                Ok(alive)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("reading mover pid file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_user0_to_disk_rewrites_prefix() {
        let adapter = LinuxPlatformAdapter::new(true, false, None);
        assert_eq!(
            adapter.resolve_user0_to_disk("/mnt/user0/Movies/x.mkv"),
            Some("/mnt/diskN/Movies/x.mkv".to_string())
        );
        assert_eq!(adapter.resolve_user0_to_disk("/mnt/cache/Movies/x.mkv"), None);
    }

    #[test]
    fn get_array_direct_path_rewrites_user_to_user0() {
        let adapter = LinuxPlatformAdapter::new(true, false, None);
        assert_eq!(
            adapter.get_array_direct_path("/mnt/user/Movies/x.mkv"),
            "/mnt/user0/Movies/x.mkv"
        );
        assert_eq!(adapter.get_array_direct_path("/mnt/cache/x.mkv"), "/mnt/cache/x.mkv");
    }

    #[test]
    fn null_adapter_reports_mover_not_running() {
        let adapter = NullPlatformAdapter;
        assert!(!adapter.is_mover_running().unwrap());
    }
}
