//! Exclusive apply section.
//!
//! A PID lockfile under the state directory. Creation is atomic, so two
//! applies in one process exclude each other just like two processes do. A
//! lockfile whose owner is no longer running is treated as stale and taken
//! over. Takeovers serialize on a guard file and only remove a lockfile
//! whose contents are unchanged since it was judged stale.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ApplyError;

pub const LOCK_FILE: &str = "apply.lock";
const TAKEOVER_FILE: &str = "apply.lock.takeover";

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// A takeover guard older than this was left by a crashed waiter.
const ABANDONED_GUARD: Duration = Duration::from_secs(2);

/// Held apply lock. The lockfile is removed on drop.
#[derive(Debug)]
pub struct ApplyLock {
    path: PathBuf,
}

impl ApplyLock {
    /// Take the lock in `state_dir`, waiting up to `wait` for a live holder.
    pub fn acquire(state_dir: &Path, wait: Duration) -> Result<Self, ApplyError> {
        fs::create_dir_all(state_dir).map_err(ApplyError::LockIo)?;
        let path = state_dir.join(LOCK_FILE);
        let deadline = Instant::now() + wait;
        let pid = std::process::id();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = write!(file, "{pid}") {
                        let _ = fs::remove_file(&path);
                        return Err(ApplyError::LockIo(e));
                    }
                    tracing::debug!(path = %path.display(), pid, "apply lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(ApplyError::LockIo(e)),
            }

            let seen = match fs::read_to_string(&path) {
                Ok(seen) => seen,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ApplyError::LockIo(e)),
            };
            let expired = Instant::now() >= deadline;
            match seen.trim().parse::<u32>().ok() {
                Some(holder) if is_process_alive(holder) => {
                    if expired {
                        return Err(ApplyError::Locked { holder });
                    }
                }
                Some(holder) => {
                    if remove_if_unchanged(&path, &seen)? {
                        tracing::warn!(holder, "removed stale apply lock");
                        continue;
                    }
                }
                // Being written by its creator, or garbage.
                None if expired => {
                    if remove_if_unchanged(&path, &seen)? {
                        tracing::warn!(path = %path.display(), "removed unreadable apply lock");
                        continue;
                    }
                }
                None => {}
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ApplyLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release apply lock");
        }
    }
}

/// Removes the takeover guard on drop.
struct TakeoverGuard(PathBuf);

impl Drop for TakeoverGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Remove the lockfile at `path` if it still reads `seen`. Returns false
/// when another waiter holds the takeover guard or the lockfile changed.
fn remove_if_unchanged(path: &Path, seen: &str) -> Result<bool, ApplyError> {
    let guard_path = path.with_file_name(TAKEOVER_FILE);
    let _guard = match OpenOptions::new().write(true).create_new(true).open(&guard_path) {
        Ok(_) => TakeoverGuard(guard_path),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            clear_abandoned_guard(&guard_path);
            return Ok(false);
        }
        Err(e) => return Err(ApplyError::LockIo(e)),
    };

    match fs::read_to_string(path) {
        Ok(current) if current == seen => match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ApplyError::LockIo(e)),
        },
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ApplyError::LockIo(e)),
    }
}

fn clear_abandoned_guard(guard_path: &Path) {
    let age = fs::metadata(guard_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok());
    if age.is_some_and(|age| age >= ABANDONED_GUARD) {
        tracing::warn!(path = %guard_path.display(), "removing abandoned lock takeover guard");
        let _ = fs::remove_file(guard_path);
    }
}

fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 checks for existence without delivering anything.
        // SAFETY: kill(2) with signal 0 takes plain integers and touches no memory.
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
