//! # File Coordination
//!
//! Exclusive leases over file paths, shared by everything that reads or writes
//! inside the synchronized directories: the file writer, the bookmarks store
//! and the ubiquity container.
//!
//! For every path a lease holds an in-process async mutex plus an advisory
//! `flock(2)` on a lock file named after the path. Lock files live in a
//! separate directory so the monitors never report them. Two coordinators
//! pointing at the same lock directory exclude each other, in one process or
//! across processes.
//!
//! Waiting has no deadline. Leases are RAII guards and are released on drop,
//! whatever the exit path.
//!
//! ```ignore
//! let coordinator = FileCoordinator::default();
//! let _lease = coordinator.coordinate(&[source, target]).await?;
//! tokio::fs::copy(source, target).await?;
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Directory under the system temp dir used by [`FileCoordinator::default`].
pub const DEFAULT_LOCK_DIRECTORY_NAME: &str = "bookmarks-sync-locks";

/// Delay between two attempts on a lock file held by someone else.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

const MAX_LOCK_FILE_NAME_LEN: usize = 200;

/// Hands out exclusive access to file paths.
///
/// Cloning is cheap; clones share the same in-process locks.
#[derive(Debug, Clone)]
pub struct FileCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Debug)]
struct CoordinatorInner {
    lock_directory: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl Default for FileCoordinator {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_LOCK_DIRECTORY_NAME))
    }
}

impl FileCoordinator {
    pub fn new(lock_directory: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                lock_directory: lock_directory.into(),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn lock_directory(&self) -> &Path {
        &self.inner.lock_directory
    }

    /// Acquire every path in `paths`, waiting as long as needed.
    ///
    /// Paths are taken in sorted order so two leases over overlapping sets
    /// cannot deadlock. Duplicates are ignored. Leases are not reentrant:
    /// asking again for a path already held by the caller never returns.
    pub async fn coordinate<P: AsRef<Path>>(&self, paths: &[P]) -> io::Result<CoordinationLease> {
        let mut sorted: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        sorted.sort();
        sorted.dedup();

        tokio::fs::create_dir_all(&self.inner.lock_directory).await?;

        let mut guards = Vec::with_capacity(sorted.len());
        for path in &sorted {
            let local = self.lock_for(path).lock_owned().await;
            let os_lock = OsLock::acquire(&self.lock_file_for(path)).await?;
            guards.push(PathGuard {
                _os_lock: os_lock,
                _local: local,
            });
        }

        trace!(paths = ?sorted, "Coordination lease acquired");
        Ok(CoordinationLease {
            paths: sorted,
            _guards: guards,
        })
    }

    /// Lock file standing for `path` inside the lock directory.
    pub fn lock_file_for(&self, path: &Path) -> PathBuf {
        let flattened: String = path
            .to_string_lossy()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '%',
                other => other,
            })
            .collect();
        // Keep the most specific end of long paths.
        let skip = flattened.chars().count().saturating_sub(MAX_LOCK_FILE_NAME_LEN);
        let name: String = flattened.chars().skip(skip).collect();
        self.inner.lock_directory.join(format!("{}.lock", name))
    }

    fn lock_for(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries nobody holds or waits on can go.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Exclusive access to a set of paths, released on drop.
#[derive(Debug)]
pub struct CoordinationLease {
    paths: Vec<PathBuf>,
    _guards: Vec<PathGuard>,
}

impl CoordinationLease {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for CoordinationLease {
    fn drop(&mut self) {
        trace!(paths = ?self.paths, "Coordination lease released");
    }
}

// Field order matters: the OS lock is released before the in-process one.
#[derive(Debug)]
struct PathGuard {
    _os_lock: OsLock,
    _local: OwnedMutexGuard<()>,
}

#[cfg(unix)]
#[derive(Debug)]
struct OsLock {
    file: std::fs::File,
}

#[cfg(unix)]
impl OsLock {
    async fn acquire(lock_file: &Path) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_file)?;

        loop {
            // SAFETY: flock on a descriptor owned by `file`.
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result == 0 {
                return Ok(Self { file });
            }

            let error = io::Error::last_os_error();
            match error.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                _ => return Err(error),
            }
        }
    }
}

#[cfg(unix)]
impl Drop for OsLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        // SAFETY: flock with LOCK_UN on a descriptor owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

// Without flock only the in-process lock applies.
#[cfg(not(unix))]
#[derive(Debug)]
struct OsLock;

#[cfg(not(unix))]
impl OsLock {
    async fn acquire(_lock_file: &Path) -> io::Result<Self> {
        Ok(Self)
    }
}
