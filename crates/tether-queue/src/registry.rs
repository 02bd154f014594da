//! Registry of open append handles, one per queue file.
//!
//! Appenders for the same path share one handle instead of reopening the
//! file per write. A handle is evicted when it is closed explicitly, when a
//! write through it fails, or before a replay replaces the file on disk, so
//! the next [`StreamRegistry::get_stream`] reopens cleanly. A handle whose
//! file was replaced on disk (another process rewrote the queue) is detected
//! by inode and reopened as well.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared append handle. The mutex serializes writers within the process.
pub type SharedStream = Arc<Mutex<File>>;

/// Path-keyed cache of append-mode file handles.
///
/// Create one per process and hand it to every queue through an `Arc`.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<PathBuf, SharedStream>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `path`, opening it in append mode on first use.
    ///
    /// Creates the file if missing. If two callers race to open the same
    /// path, the first handle registered wins and the other is dropped.
    pub async fn get_stream(&self, path: &Path) -> std::io::Result<SharedStream> {
        let cached = self.streams.get(path).map(|entry| Arc::clone(entry.value()));
        if let Some(stream) = cached {
            if still_linked(path, &stream).await {
                return Ok(stream);
            }
            debug!(path = %path.display(), "queue file replaced on disk, reopening stream");
            self.evict(path);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let opened = Arc::new(Mutex::new(file));
        let stream = Arc::clone(
            self.streams
                .entry(path.to_path_buf())
                .or_insert(opened)
                .value(),
        );
        debug!(path = %path.display(), "opened queue stream");
        Ok(stream)
    }

    /// Flush and deregister the handle for `path`.
    ///
    /// Returns `false` if no handle was open. The file descriptor closes once
    /// the last in-flight writer holding a clone drops it.
    pub async fn close_stream(&self, path: &Path) -> bool {
        let Some((_, stream)) = self.streams.remove(path) else {
            return false;
        };
        let mut file = stream.lock().await;
        if let Err(e) = file.flush().await {
            warn!(path = %path.display(), error = %e, "flush on stream close failed");
        }
        debug!(path = %path.display(), "closed queue stream");
        true
    }

    /// Drop a handle without flushing, after a write through it failed.
    pub fn evict(&self, path: &Path) {
        if self.streams.remove(path).is_some() {
            debug!(path = %path.display(), "evicted queue stream");
        }
    }

    /// Whether a handle is currently registered for `path`.
    pub fn is_open(&self, path: &Path) -> bool {
        self.streams.contains_key(path)
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no handles are registered.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Whether `stream` still refers to the file currently at `path`.
async fn still_linked(path: &Path, stream: &SharedStream) -> bool {
    let open = stream.lock().await.metadata().await;
    match (open, tokio::fs::metadata(path).await) {
        (Ok(open), Ok(current)) => open.dev() == current.dev() && open.ino() == current.ino(),
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_stream_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.eventstream");
        let registry = StreamRegistry::new();

        let _stream = registry.get_stream(&path).await.unwrap();
        assert!(path.exists());
        assert!(registry.is_open(&path));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn get_stream_reuses_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.eventstream");
        let registry = StreamRegistry::new();

        let first = registry.get_stream(&path).await.unwrap();
        let second = registry.get_stream(&path).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn separate_paths_get_separate_handles() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StreamRegistry::new();

        let a = registry.get_stream(&dir.path().join("a")).await.unwrap();
        let b = registry.get_stream(&dir.path().join("b")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.eventstream");
        let registry = StreamRegistry::new();

        let first = registry.get_stream(&path).await.unwrap();
        first.lock().await.write_all(b"one\n").await.unwrap();
        assert!(registry.close_stream(&path).await);
        assert!(!registry.is_open(&path));
        assert!(registry.is_empty());

        let second = registry.get_stream(&path).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        {
            let mut file = second.lock().await;
            file.write_all(b"two\n").await.unwrap();
            file.flush().await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn close_unknown_path_is_false() {
        let registry = StreamRegistry::new();
        assert!(!registry.close_stream(Path::new("/nonexistent/x")).await);
    }

    #[tokio::test]
    async fn evict_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.eventstream");
        let registry = StreamRegistry::new();

        let _stream = registry.get_stream(&path).await.unwrap();
        registry.evict(&path);
        assert!(!registry.is_open(&path));
    }

    #[tokio::test]
    async fn replaced_file_gets_fresh_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.eventstream");
        let registry = StreamRegistry::new();

        let stale = registry.get_stream(&path).await.unwrap();
        let tmp = dir.path().join("a.eventstream.tmp");
        std::fs::write(&tmp, "kept\n").unwrap();
        std::fs::rename(&tmp, &path).unwrap();

        let fresh = registry.get_stream(&path).await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        {
            let mut file = fresh.lock().await;
            file.write_all(b"new\n").await.unwrap();
            file.flush().await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\nnew\n");
    }

    #[tokio::test]
    async fn get_stream_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StreamRegistry::new();
        let result = registry.get_stream(&dir.path().join("missing/a")).await;
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
