//! Serialization gate for the office engine.
//!
//! The office suite cannot run two conversions in parallel, so every
//! invocation holds the gate: an in-process mutex, plus an advisory lock on
//! a file shared by every eml2pdf process on the host. The kernel drops the
//! file lock when its holder exits, however it exits, so a crashed process
//! never blocks the others.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::Result;

/// Mutual exclusion around office engine invocations.
#[derive(Debug)]
pub struct OfficeGate {
    local: Mutex<()>,
    lock_file: Option<PathBuf>,
    wait_limit: Duration,
}

/// Held while one conversion runs. Releases the gate on drop.
#[derive(Debug)]
pub struct OfficeGuard<'a> {
    // Field order is drop order: the host lock goes before the local one.
    _host: Option<HostLock>,
    _local: MutexGuard<'a, ()>,
}

impl OfficeGate {
    /// Gate that also locks `lock_file` host-wide.
    ///
    /// The file is created if missing and never removed. Waiting longer than
    /// `wait_limit` for another process fails with [`crate::error::Error::Resource`].
    /// Without Unix file locks the gate serializes this process only.
    pub fn new(lock_file: PathBuf, wait_limit: Duration) -> Self {
        if cfg!(not(unix)) {
            tracing::warn!(
                path = %lock_file.display(),
                "Host-wide office lock unavailable on this platform"
            );
        }
        Self {
            local: Mutex::new(()),
            lock_file: cfg!(unix).then_some(lock_file),
            wait_limit,
        }
    }

    /// Gate that only serializes threads of this process.
    pub fn in_process() -> Self {
        Self {
            local: Mutex::new(()),
            lock_file: None,
            wait_limit: Duration::ZERO,
        }
    }

    /// Block until this caller is the only one converting.
    pub fn acquire(&self) -> Result<OfficeGuard<'_>> {
        // A panic while holding the guard leaves no state to repair.
        let local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let host = match &self.lock_file {
            Some(path) => Some(HostLock::acquire(path.clone(), self.wait_limit)?),
            None => None,
        };
        Ok(OfficeGuard {
            _host: host,
            _local: local,
        })
    }
}

/// An exclusive advisory lock on an open file.
#[derive(Debug)]
struct HostLock {
    file: File,
    path: PathBuf,
}

#[cfg(unix)]
mod host {
    use std::fs::{File, OpenOptions};
    use std::io::{Seek, Write};
    use std::os::fd::AsRawFd;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use super::HostLock;
    use crate::error::{Error, Result};

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Try once to take an exclusive lock. `Ok(false)` when someone else holds it.
    pub(super) fn try_lock(file: &File) -> std::io::Result<bool> {
        loop {
            // SAFETY: the descriptor stays open for the duration of the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    impl HostLock {
        pub(super) fn acquire(path: PathBuf, wait_limit: Duration) -> Result<Self> {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| Error::io(&path, e))?;
            let start = Instant::now();
            let mut announced = false;
            while !try_lock(&file).map_err(|e| Error::io(&path, e))? {
                if start.elapsed() > wait_limit {
                    return Err(Error::resource(
                        "office gate",
                        format!(
                            "lock {} held for more than {}s",
                            path.display(),
                            wait_limit.as_secs()
                        ),
                    ));
                }
                if !announced {
                    tracing::info!(path = %path.display(), "Waiting for office lock");
                    announced = true;
                }
                std::thread::sleep(POLL_INTERVAL);
            }

            // Holder pid, for whoever inspects a stuck lock.
            let _ = file.set_len(0);
            let _ = file.rewind();
            let _ = writeln!(file, "{}", std::process::id());
            tracing::debug!(path = %path.display(), "Acquired office lock");
            Ok(Self { file, path })
        }
    }

    impl Drop for HostLock {
        fn drop(&mut self) {
            // SAFETY: as above. Closing the file would release the lock too.
            let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
            if rc != 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %std::io::Error::last_os_error(),
                    "Cannot unlock office lock"
                );
            }
        }
    }
}

#[cfg(not(unix))]
mod host {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::HostLock;
    use crate::error::{Error, Result};

    impl HostLock {
        pub(super) fn acquire(path: PathBuf, _wait_limit: Duration) -> Result<Self> {
            Err(Error::Config(format!(
                "host-wide office lock {} needs a Unix host",
                path.display()
            )))
        }
    }
}
