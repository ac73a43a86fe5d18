// Author: Dustin Pilgrim
// License: MIT

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub fn lock_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("fresco.lock")
}

/// Try to acquire a non-blocking exclusive lock.
/// Keep the returned File alive for the daemon lifetime.
/// If already locked -> Ok(None) (another daemon instance is running).
#[cfg(unix)]
pub fn try_acquire_single_instance_lock(lock_path: &Path) -> Result<Option<std::fs::File>> {
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("open lock file: {}", lock_path.display()))?;

    let rc = unsafe { libc::flock(f.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(Some(f))
    } else {
        let e = std::io::Error::last_os_error();
        match e.raw_os_error() {
            Some(libc::EWOULDBLOCK) => Ok(None),
            _ => Err(e).with_context(|| format!("flock: {}", lock_path.display())),
        }
    }
}

#[cfg(not(unix))]
pub fn try_acquire_single_instance_lock(lock_path: &Path) -> Result<Option<std::fs::File>> {
    use std::fs::TryLockError;

    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("open lock file: {}", lock_path.display()))?;

    match f.try_lock() {
        Ok(()) => Ok(Some(f)),
        Err(TryLockError::WouldBlock) => Ok(None),
        Err(TryLockError::Error(e)) => {
            Err(e).with_context(|| format!("lock: {}", lock_path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn second_lock_attempt_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let p = lock_path(dir.path());

        let first = try_acquire_single_instance_lock(&p).unwrap();
        assert!(first.is_some());
        assert!(try_acquire_single_instance_lock(&p).unwrap().is_none());

        drop(first);
        assert!(try_acquire_single_instance_lock(&p).unwrap().is_some());
    }
}
