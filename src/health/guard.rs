//! Overlap guard for check invocations
//!
//! A slow mount can still be running when the scheduler fires the next
//! check for the same server. Each check takes a non-blocking exclusive
//! `flock` on a per-server lock file; a check that finds it held skips.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// Held lock; released when dropped
pub struct CheckGuard {
    _lock: Flock<File>,
}

/// Result of trying to take the lock
pub enum GuardStatus {
    /// Lock taken; keep the guard alive for the rest of the run
    Acquired(CheckGuard),
    /// Another invocation holds the lock
    Busy,
}

/// Try to take the per-server lock without blocking
pub fn try_acquire(path: &Path) -> Result<GuardStatus> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(GuardStatus::Acquired(CheckGuard { _lock: lock })),
        Err((_, Errno::EWOULDBLOCK)) => Ok(GuardStatus::Busy),
        Err((_, errno)) => Err(Error::CommandFailed {
            command: format!("flock({})", path.display()),
            message: errno.desc().to_string(),
        }),
    }
}
