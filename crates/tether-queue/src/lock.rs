//! Advisory lock guarding read-modify-write cycles on a queue file.
//!
//! The lock is an exclusive `flock` on a sidecar `<queue>.lock` file. It is
//! cooperative: every appender and replayer, in this process or another,
//! takes it before touching the queue file. Each acquisition opens its own
//! descriptor, so two tasks in one process exclude each other the same way
//! two processes do. The OS drops the lock when its holder dies, so there is
//! no stale-lock recovery to do.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use tether_core::metrics::{LOCK_TIMEOUTS_TOTAL, LOCK_WAIT_SECONDS};
use tether_core::{Result, TetherError};
use tether_settings::QueueSettings;
use tokio::fs::OpenOptions;
use tracing::{debug, warn};

/// Suffix appended to the queue file name to form the lock file name.
pub const LOCK_SUFFIX: &str = ".lock";

/// Bounds on lock acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after waiting this long.
    pub timeout: Duration,
    /// Sleep between attempts while the lock is held elsewhere.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl From<&QueueSettings> for LockOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            timeout: settings.lock_timeout(),
            poll_interval: settings.lock_poll_interval(),
        }
    }
}

/// A held queue lock. Released on drop.
pub struct QueueLock {
    file: File,
    lock_path: PathBuf,
}

impl QueueLock {
    /// Lock file path for a queue file.
    pub fn lock_path(queue_path: &Path) -> PathBuf {
        let mut name = OsString::from(queue_path.as_os_str());
        name.push(LOCK_SUFFIX);
        PathBuf::from(name)
    }

    /// Attempt to take the lock without waiting.
    ///
    /// Returns `Ok(None)` if another holder has it.
    pub async fn try_acquire(queue_path: &Path) -> Result<Option<Self>> {
        let lock_path = Self::lock_path(queue_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .await
            .map_err(|source| TetherError::Lock {
                path: lock_path.clone(),
                source,
            })?
            .into_std()
            .await;

        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(Some(Self { file, lock_path })),
            Err(errno) if errno == Errno::WOULDBLOCK => Ok(None),
            Err(errno) => Err(TetherError::Lock {
                path: lock_path,
                source: errno.into(),
            }),
        }
    }

    /// Take the lock, polling until `options.timeout` elapses.
    ///
    /// A timeout has no side effects beyond the (empty) lock file.
    pub async fn acquire(queue_path: &Path, options: &LockOptions) -> Result<Self> {
        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(queue_path).await? {
                let waited = start.elapsed();
                histogram!(LOCK_WAIT_SECONDS).record(waited.as_secs_f64());
                debug!(path = %queue_path.display(), waited_ms = waited.as_millis() as u64, "acquired queue lock");
                return Ok(lock);
            }

            let waited = start.elapsed();
            if waited >= options.timeout {
                counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(
                    path = %queue_path.display(),
                    timeout_ms = options.timeout.as_millis() as u64,
                    "timed out waiting for queue lock"
                );
                return Err(TetherError::LockTimeout {
                    path: queue_path.to_path_buf(),
                    waited,
                });
            }
            let remaining = options.timeout.saturating_sub(waited);
            tokio::time::sleep(options.poll_interval.min(remaining)).await;
        }
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if let Err(errno) = flock(&self.file, FlockOperation::Unlock) {
            warn!(path = %self.lock_path.display(), error = %errno, "failed to release queue lock");
        }
        debug!(path = %self.lock_path.display(), "released queue lock");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn fast() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            QueueLock::lock_path(Path::new("/q/key.eventstream")),
            PathBuf::from("/q/key.eventstream.lock")
        );
    }

    #[tokio::test]
    async fn try_acquire_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("k.eventstream");

        let held = QueueLock::try_acquire(&queue).await.unwrap();
        assert!(held.is_some());
        assert!(QueueLock::try_acquire(&queue).await.unwrap().is_none());

        drop(held);
        assert!(QueueLock::try_acquire(&queue).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("k.eventstream");

        let _held = QueueLock::acquire(&queue, &fast()).await.unwrap();
        let err = QueueLock::acquire(&queue, &fast()).await.err().unwrap();
        assert_matches!(err, TetherError::LockTimeout { waited, .. } if waited >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("k.eventstream");

        let held = QueueLock::acquire(&queue, &fast()).await.unwrap();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(held);
        });

        let options = LockOptions {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(5),
        };
        let lock = QueueLock::acquire(&queue, &options).await;
        assert!(lock.is_ok());
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn missing_directory_is_lock_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("missing").join("k.eventstream");
        let err = QueueLock::acquire(&queue, &fast()).await.err().unwrap();
        assert_matches!(err, TetherError::Lock { .. });
    }

    #[test]
    fn options_from_settings() {
        let settings = QueueSettings {
            lock_timeout_ms: 750,
            lock_poll_ms: 15,
            ..QueueSettings::default()
        };
        let options = LockOptions::from(&settings);
        assert_eq!(options.timeout, Duration::from_millis(750));
        assert_eq!(options.poll_interval, Duration::from_millis(15));
    }
}
