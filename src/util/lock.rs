//! Exclusive lock on a data directory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::{Error, Result};

use super::filename::lock_file_path;

/// Advisory lock held on `<dir>/LOCK` for as long as the value lives.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
}

impl DirLock {
    /// Acquire the lock, failing if another process holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = lock_file_path(dir);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            // SAFETY: `fd` is a valid descriptor owned by `lock_file` for the whole call.
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(format!(
                    "{} is already locked by another process",
                    dir.display()
                )));
            }
        }

        let mut lock_file = lock_file;
        writeln!(lock_file, "quorumkv lock pid={}", std::process::id()).ok();

        Ok(Self { _file: lock_file })
    }
}
