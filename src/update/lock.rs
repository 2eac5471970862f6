use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{CanonError, Result};

/// Exclusive hold on the update cache, released on drop
///
/// The lock is a non-blocking `flock`; a second holder fails immediately with
/// [`CanonError::Locked`]. The file keeps the pid of the current holder.
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for UpdateLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateLock").field("path", &self.path).finish()
    }
}

impl UpdateLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if !try_flock_exclusive(&file)? {
            return Err(CanonError::Locked(path.to_path_buf()));
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        log::debug!("Acquired update lock {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned by `self.file`, which is still open
        let result = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            log::debug!(
                "Failed to unlock {}: {}",
                self.path.display(),
                io::Error::last_os_error()
            );
        }
    }
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    // SAFETY: flock on a descriptor owned by `file`; LOCK_NB never blocks
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}
