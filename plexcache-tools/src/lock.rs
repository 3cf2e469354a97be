//! The single-instance lock used by `ControlLoop` (`spec.md` §4.7 step
//! 1): a non-blocking `fcntl` exclusive lock on a file in the project
//! root. Grounded on `pbs-tools::process_locker::ProcessLocker`,
//! simplified from that file's shared/exclusive reader-writer model
//! down to the one thing this core needs: "try to become the only
//! writer, fail fast if not".

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{bail, Error};

/// Held for the lifetime of one caching run (or one maintenance
/// action). Dropping it releases the lock.
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    /// Tries to acquire the lock without blocking. Returns `Ok(None)`
    /// (not an error) if another instance already holds it — callers
    /// are expected to exit cleanly in that case, per `spec.md` §4.7.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, Error> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let op = libc::flock {
            l_type: libc::F_WRLCK as i16,
            l_whence: libc::SEEK_SET as i16,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };

        match nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLK(&op)) {
            Ok(_) => Ok(Some(InstanceLock { _file: file })),
            Err(nix::errno::Errno::EACCES) | Err(nix::errno::Errno::EAGAIN) => Ok(None),
            Err(e) => bail!("failed to acquire instance lock {}: {e}", path.display()),
        }
    }
}
