//! The durable per-key queue file.
//!
//! One `<api_key>.eventstream` file per API key holds the events that have
//! not reached the peer yet, one encoded record per line, in receipt order.
//! Appends go through the shared [`StreamRegistry`] handle; replay reads the
//! whole file, hands each record to the caller and replaces the file with
//! whatever the caller did not consume. Both run inside one [`QueueLock`]
//! scope.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use tether_core::codec::{decode_line, encode_record};
use tether_core::metrics::REPLAY_MALFORMED_TOTAL;
use tether_core::{DecodeError, EventRecord, Result, TetherError};
use tether_settings::QueueSettings;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::lock::{LockOptions, QueueLock};
use crate::registry::StreamRegistry;

/// Extension of queue files.
pub const QUEUE_FILE_EXTENSION: &str = "eventstream";

/// Everything a queue needs besides its key: where files live, the shared
/// handle registry and lock bounds.
#[derive(Clone)]
pub struct QueueContext {
    /// Directory holding the queue files.
    pub dir: PathBuf,
    /// Process-wide handle registry.
    pub registry: Arc<StreamRegistry>,
    /// Lock acquisition bounds.
    pub lock: LockOptions,
}

impl QueueContext {
    /// Build a context with a fresh registry.
    pub fn new(dir: impl Into<PathBuf>, lock: LockOptions) -> Self {
        Self {
            dir: dir.into(),
            registry: Arc::new(StreamRegistry::new()),
            lock,
        }
    }

    /// Build a context from loaded settings, sharing `registry`.
    pub fn from_settings(settings: &QueueSettings, registry: Arc<StreamRegistry>) -> Self {
        Self {
            dir: settings.dir.clone(),
            registry,
            lock: LockOptions::from(settings),
        }
    }

    /// Queue file path for `api_key`, after validating the key.
    pub fn queue_path(&self, api_key: &str) -> Result<PathBuf> {
        validate_api_key(api_key)?;
        Ok(self.dir.join(format!("{api_key}.{QUEUE_FILE_EXTENSION}")))
    }
}

/// Reject keys that cannot safely become a file name.
///
/// Allowed: ASCII letters, digits, `-`, `_`, `.`; not empty; not starting with `.`.
pub fn validate_api_key(api_key: &str) -> Result<()> {
    let valid = !api_key.is_empty()
        && !api_key.starts_with('.')
        && api_key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(TetherError::InvalidApiKey(api_key.to_string()))
    }
}

/// What the drain callback did with a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Forwarded; remove it from the file.
    Delivered,
    /// Forward was rejected for good; remove it from the file.
    Dropped,
    /// Peer is gone; keep this line and every line after it.
    Halt,
}

/// Counts from one drain pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records handed to the peer.
    pub delivered: usize,
    /// Records whose forward failed and were not kept.
    pub dropped: usize,
    /// Lines that failed to decode and were kept.
    pub malformed: usize,
    /// Well-formed lines kept because replay halted.
    pub deferred: usize,
}

impl ReplayReport {
    /// Lines left in the file after the pass.
    pub fn retained(&self) -> usize {
        self.malformed + self.deferred
    }
}

/// One line of a queue file, as seen by [`QueueFile::inspect`].
#[derive(Debug)]
pub struct QueueEntry {
    /// 1-based line number among non-empty lines.
    pub line: usize,
    /// Raw line bytes, exactly as stored.
    pub raw: Vec<u8>,
    /// Decoded record, or why it failed.
    pub record: std::result::Result<EventRecord, DecodeError>,
}

impl QueueEntry {
    /// Raw line for display; bytes that are not UTF-8 are replaced.
    pub fn raw_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// Which lines [`QueueFile::purge`] removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeMode {
    /// Empty the file.
    All,
    /// Remove only lines that fail to decode.
    MalformedOnly,
}

/// The queue file for one API key.
pub struct QueueFile {
    path: PathBuf,
    registry: Arc<StreamRegistry>,
    lock: LockOptions,
}

impl QueueFile {
    /// Queue file for `api_key` under `ctx.dir`.
    pub fn open(ctx: &QueueContext, api_key: &str) -> Result<Self> {
        Ok(Self {
            path: ctx.queue_path(api_key)?,
            registry: Arc::clone(&ctx.registry),
            lock: ctx.lock,
        })
    }

    /// Path of the queue file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directory and an empty queue file if missing.
    pub async fn ensure(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| TetherError::io(dir, e))?;
        }
        let _ = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| TetherError::io(&self.path, e))?;
        Ok(())
    }

    /// Append one record under the lock.
    ///
    /// The record is encoded before the lock is taken, so an encode or lock
    /// failure leaves the file untouched. If the file ends in a partial line
    /// (a writer died mid-append), that fragment is terminated first so the
    /// new record lands on a line of its own.
    pub async fn append(&self, record: &EventRecord) -> Result<()> {
        let encoded = encode_record(record)?;

        let _lock = QueueLock::acquire(&self.path, &self.lock).await?;
        let mut line = String::with_capacity(encoded.len() + 2);
        if self.ends_mid_line().await? {
            warn!(path = %self.path.display(), "queue file ends in a partial line, terminating it");
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');

        let stream = self
            .registry
            .get_stream(&self.path)
            .await
            .map_err(|e| TetherError::io(&self.path, e))?;

        let mut file = stream.lock().await;
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        drop(file);

        if let Err(e) = written {
            self.registry.evict(&self.path);
            return Err(TetherError::io(&self.path, e));
        }
        debug!(path = %self.path.display(), event = %record.event, "appended event to queue");
        Ok(())
    }

    /// Replay the queue through `forward` and keep what it does not consume.
    ///
    /// Lines are visited in file order. Malformed lines are kept verbatim and
    /// never reach `forward`. Once `forward` returns [`ReplayOutcome::Halt`],
    /// that line and all later lines are kept without further calls. The file
    /// is then replaced with exactly the kept lines. A missing file is an
    /// empty queue and is not created.
    pub async fn drain<F, Fut>(&self, mut forward: F) -> Result<ReplayReport>
    where
        F: FnMut(EventRecord) -> Fut,
        Fut: Future<Output = ReplayOutcome>,
    {
        let mut report = ReplayReport::default();
        if !self.exists().await? {
            debug!(path = %self.path.display(), "no queue file, nothing to replay");
            return Ok(report);
        }

        let _lock = QueueLock::acquire(&self.path, &self.lock).await?;
        let Some(content) = self.read().await? else {
            return Ok(report);
        };

        let mut kept: Vec<&[u8]> = Vec::new();
        let mut halted = false;
        for line in non_empty_lines(&content) {
            if halted {
                kept.push(line);
                report.deferred += 1;
                continue;
            }
            match decode_line(line) {
                Ok(record) => match forward(record).await {
                    ReplayOutcome::Delivered => report.delivered += 1,
                    ReplayOutcome::Dropped => report.dropped += 1,
                    ReplayOutcome::Halt => {
                        halted = true;
                        kept.push(line);
                        report.deferred += 1;
                    }
                },
                Err(e) => {
                    counter!(REPLAY_MALFORMED_TOTAL).increment(1);
                    warn!(path = %self.path.display(), error = %e, "keeping malformed queue line");
                    kept.push(line);
                    report.malformed += 1;
                }
            }
        }

        if report.delivered + report.dropped > 0 {
            self.rewrite(&kept).await?;
        }
        info!(
            path = %self.path.display(),
            delivered = report.delivered,
            dropped = report.dropped,
            malformed = report.malformed,
            deferred = report.deferred,
            "queue replay finished"
        );
        Ok(report)
    }

    /// Read and decode every non-empty line under the lock, without changing the file.
    pub async fn inspect(&self) -> Result<Vec<QueueEntry>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        let _lock = QueueLock::acquire(&self.path, &self.lock).await?;
        let Some(content) = self.read().await? else {
            return Ok(Vec::new());
        };
        Ok(non_empty_lines(&content)
            .enumerate()
            .map(|(i, raw)| QueueEntry {
                line: i + 1,
                raw: raw.to_vec(),
                record: decode_line(raw),
            })
            .collect())
    }

    /// Remove lines under the lock. Returns how many were removed.
    pub async fn purge(&self, mode: PurgeMode) -> Result<usize> {
        if !self.exists().await? {
            return Ok(0);
        }
        let _lock = QueueLock::acquire(&self.path, &self.lock).await?;
        let Some(content) = self.read().await? else {
            return Ok(0);
        };

        let lines: Vec<&[u8]> = non_empty_lines(&content).collect();
        let kept: Vec<&[u8]> = match mode {
            PurgeMode::All => Vec::new(),
            PurgeMode::MalformedOnly => lines
                .iter()
                .copied()
                .filter(|line| decode_line(line).is_ok())
                .collect(),
        };
        let removed = lines.len() - kept.len();
        if removed > 0 {
            self.rewrite(&kept).await?;
        }
        info!(path = %self.path.display(), removed, ?mode, "purged queue");
        Ok(removed)
    }

    async fn exists(&self) -> Result<bool> {
        tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| TetherError::io(&self.path, e))
    }

    /// Whether the file is non-empty and its last byte is not `\n`. Caller holds the lock.
    async fn ends_mid_line(&self) -> Result<bool> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(TetherError::io(&self.path, e)),
        };
        let io = |e| TetherError::io(&self.path, e);
        let len = file.metadata().await.map_err(io)?.len();
        if len == 0 {
            return Ok(false);
        }
        let _ = file.seek(std::io::SeekFrom::Start(len - 1)).await.map_err(io)?;
        let last = file.read_u8().await.map_err(io)?;
        Ok(last != b'\n')
    }

    /// Read the whole file as raw bytes; `None` if it vanished.
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TetherError::io(&self.path, e)),
        }
    }

    /// Replace the file with `lines`. Caller holds the lock.
    ///
    /// Writes a sibling temp file and renames it over the queue, so a failure
    /// leaves the previous content in place. The cached append handle still
    /// points at the old inode and is closed first.
    async fn rewrite(&self, lines: &[&[u8]]) -> Result<()> {
        let mut body = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            body.extend_from_slice(line);
            body.push(b'\n');
        }

        let tmp = self.tmp_path();
        if let Err(e) = tokio::fs::write(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TetherError::io(&tmp, e));
        }

        let _ = self.registry.close_stream(&self.path).await;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(TetherError::io(&self.path, e));
        }
        debug!(path = %self.path.display(), lines = lines.len(), "rewrote queue file");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

/// Lines with content, without their terminators. Whitespace-only lines are skipped.
fn non_empty_lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_core::codec::encode;

    fn context(dir: &Path) -> QueueContext {
        QueueContext::new(
            dir.join("api"),
            LockOptions {
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    async fn ready_queue(dir: &Path, key: &str) -> QueueFile {
        let queue = QueueFile::open(&context(dir), key).unwrap();
        queue.ensure().await.unwrap();
        queue
    }

    fn decoded_lines(content: &str) -> Vec<EventRecord> {
        non_empty_lines(content.as_bytes())
            .map(|l| decode_line(l).unwrap())
            .collect()
    }

    #[test]
    fn queue_path_is_derived_from_key() {
        let ctx = QueueContext::new("/var/q", LockOptions::default());
        assert_eq!(
            ctx.queue_path("abc-123").unwrap(),
            PathBuf::from("/var/q/abc-123.eventstream")
        );
    }

    #[test]
    fn api_key_validation() {
        assert!(validate_api_key("key_1.v2-x").is_ok());
        assert_matches!(validate_api_key(""), Err(TetherError::InvalidApiKey(_)));
        assert_matches!(validate_api_key("../etc/passwd"), Err(TetherError::InvalidApiKey(_)));
        assert_matches!(validate_api_key(".hidden"), Err(TetherError::InvalidApiKey(_)));
        assert_matches!(validate_api_key("a/b"), Err(TetherError::InvalidApiKey(_)));
        assert_matches!(validate_api_key("ключ"), Err(TetherError::InvalidApiKey(_)));
    }

    #[tokio::test]
    async fn ensure_creates_directory_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
        // idempotent, does not truncate
        queue
            .append(&EventRecord::new("a", json!(1), Some(1)))
            .await
            .unwrap();
        queue.ensure().await.unwrap();
        assert_eq!(decoded_lines(&tokio::fs::read_to_string(queue.path()).await.unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn appends_keep_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;

        let first = EventRecord::new("ping", json!({"n": 1}), Some(1000));
        let second = EventRecord::new("ping", json!({"n": 2}), Some(1001));
        queue.append(&first).await.unwrap();
        queue.append(&second).await.unwrap();

        let content = tokio::fs::read_to_string(queue.path()).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(decoded_lines(&content), vec![first, second]);
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let a = Arc::new(QueueFile::open(&ctx, "k").unwrap());
        let b = Arc::new(QueueFile::open(&ctx, "k").unwrap());
        a.ensure().await.unwrap();

        let big = "x".repeat(64 * 1024);
        let ra = EventRecord::new("a", json!(big.clone()), Some(1));
        let rb = EventRecord::new("b", json!(big), Some(2));
        let (left, right) = tokio::join!(a.append(&ra), b.append(&rb));
        left.unwrap();
        right.unwrap();

        let content = tokio::fs::read_to_string(a.path()).await.unwrap();
        let mut events: Vec<String> = decoded_lines(&content).into_iter().map(|r| r.event).collect();
        events.sort();
        assert_eq!(events, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn append_reuses_registry_handle() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = QueueFile::open(&ctx, "k").unwrap();
        queue.ensure().await.unwrap();

        queue.append(&EventRecord::new("a", json!(null), Some(1))).await.unwrap();
        assert!(ctx.registry.is_open(queue.path()));
        queue.append(&EventRecord::new("b", json!(null), Some(2))).await.unwrap();
        assert_eq!(ctx.registry.len(), 1);
    }

    #[tokio::test]
    async fn append_fails_cleanly_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;

        let _held = QueueLock::acquire(queue.path(), &LockOptions::default()).await.unwrap();
        let err = queue
            .append(&EventRecord::new("a", json!(null), Some(1)))
            .await
            .unwrap_err();
        assert_matches!(err, TetherError::LockTimeout { .. });
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn drain_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueFile::open(&context(dir.path()), "k").unwrap();

        let mut calls = 0;
        let report = queue
            .drain(|_| {
                calls += 1;
                async { ReplayOutcome::Delivered }
            })
            .await
            .unwrap();
        assert_eq!(report, ReplayReport::default());
        assert_eq!(calls, 0);
        assert!(!queue.path().exists());
    }

    #[tokio::test]
    async fn drain_empty_file_leaves_it_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;

        let report = queue.drain(|_| async { ReplayOutcome::Delivered }).await.unwrap();
        assert_eq!(report, ReplayReport::default());
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn drain_forwards_in_order_and_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        for n in 0..5 {
            queue
                .append(&EventRecord::new("tick", json!({"n": n}), Some(n)))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let report = queue
            .drain(|record| {
                seen.push(record.timestamp);
                async { ReplayOutcome::Delivered }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.retained(), 0);
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn drain_keeps_malformed_line_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let good = encode_record(&EventRecord::new("ok", json!(1), Some(1))).unwrap();
        let bad = encode(br#"{"event": 42, "timestamp": "soon"}"#);
        tokio::fs::write(queue.path(), format!("{good}\n{bad}\n")).await.unwrap();

        let mut forwarded = Vec::new();
        let report = queue
            .drain(|record| {
                forwarded.push(record);
                async { ReplayOutcome::Delivered }
            })
            .await
            .unwrap();

        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].event, "ok");
        assert_eq!(report.malformed, 1);
        assert_eq!(
            tokio::fs::read_to_string(queue.path()).await.unwrap(),
            format!("{bad}\n")
        );
    }

    #[tokio::test]
    async fn drain_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let good = encode_record(&EventRecord::new("ok", json!(1), Some(1))).unwrap();
        tokio::fs::write(queue.path(), format!("\n\n{good}\n  \n")).await.unwrap();

        let report = queue.drain(|_| async { ReplayOutcome::Delivered }).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.malformed, 0);
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn drain_halt_keeps_remainder_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        for n in 0..4 {
            queue
                .append(&EventRecord::new("tick", json!(n), Some(n)))
                .await
                .unwrap();
        }

        let mut calls = 0;
        let report = queue
            .drain(|record| {
                calls += 1;
                let outcome = if record.timestamp < 2 {
                    ReplayOutcome::Delivered
                } else {
                    ReplayOutcome::Halt
                };
                async move { outcome }
            })
            .await
            .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.deferred, 2);
        let left: Vec<i64> = decoded_lines(&tokio::fs::read_to_string(queue.path()).await.unwrap())
            .into_iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(left, vec![2, 3]);
    }

    #[tokio::test]
    async fn drain_dropped_records_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        queue.append(&EventRecord::new("a", json!(null), Some(1))).await.unwrap();

        let report = queue.drain(|_| async { ReplayOutcome::Dropped }).await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn append_after_drain_lands_in_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let queue = QueueFile::open(&ctx, "k").unwrap();
        queue.ensure().await.unwrap();
        queue.append(&EventRecord::new("old", json!(null), Some(1))).await.unwrap();

        let _ = queue.drain(|_| async { ReplayOutcome::Delivered }).await.unwrap();
        assert!(!ctx.registry.is_open(queue.path()));

        let fresh = EventRecord::new("new", json!(null), Some(2));
        queue.append(&fresh).await.unwrap();
        let content = tokio::fs::read_to_string(queue.path()).await.unwrap();
        assert_eq!(decoded_lines(&content), vec![fresh]);
    }

    #[tokio::test]
    async fn drain_times_out_without_touching_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        queue.append(&EventRecord::new("a", json!(null), Some(1))).await.unwrap();
        let before = tokio::fs::read_to_string(queue.path()).await.unwrap();

        let _held = QueueLock::acquire(queue.path(), &LockOptions::default()).await.unwrap();
        let result = queue.drain(|_| async { ReplayOutcome::Delivered }).await;
        assert_matches!(result, Err(TetherError::LockTimeout { .. }));
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn inspect_reports_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        queue.append(&EventRecord::new("a", json!(1), Some(1))).await.unwrap();
        let mut f = tokio::fs::OpenOptions::new().append(true).open(queue.path()).await.unwrap();
        f.write_all(b"%%%garbage\n").await.unwrap();
        f.flush().await.unwrap();

        let entries = queue.inspect().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].line, 1);
        assert_eq!(entries[0].record.as_ref().unwrap().event, "a");
        assert_eq!(entries[1].raw, b"%%%garbage");
        assert_eq!(entries[1].raw_lossy(), "%%%garbage");
        assert_matches!(entries[1].record, Err(DecodeError::Encoding(_)));
    }

    #[tokio::test]
    async fn purge_malformed_only_keeps_valid_lines() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let good = encode_record(&EventRecord::new("ok", json!(1), Some(1))).unwrap();
        tokio::fs::write(queue.path(), format!("garbage\n{good}\n")).await.unwrap();

        assert_eq!(queue.purge(PurgeMode::MalformedOnly).await.unwrap(), 1);
        assert_eq!(
            tokio::fs::read_to_string(queue.path()).await.unwrap(),
            format!("{good}\n")
        );
        assert_eq!(queue.purge(PurgeMode::All).await.unwrap(), 1);
        assert_eq!(tokio::fs::read_to_string(queue.path()).await.unwrap(), "");
    }
    #[tokio::test]
    async fn drain_keeps_non_utf8_line_and_replays_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let good = encode_record(&EventRecord::new("ok", json!(1), Some(1))).unwrap();
        let later = encode_record(&EventRecord::new("later", json!(2), Some(2))).unwrap();
        let mut bytes = format!("{good}\n").into_bytes();
        bytes.extend_from_slice(b"\xff\xfe garbage\n");
        bytes.extend_from_slice(format!("{later}\n").as_bytes());
        tokio::fs::write(queue.path(), &bytes).await.unwrap();

        let mut forwarded = Vec::new();
        let report = queue
            .drain(|record| {
                forwarded.push(record.event);
                async { ReplayOutcome::Delivered }
            })
            .await
            .unwrap();

        assert_eq!(forwarded, vec!["ok", "later"]);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(
            tokio::fs::read(queue.path()).await.unwrap(),
            b"\xff\xfe garbage\n".to_vec()
        );
    }

    #[tokio::test]
    async fn non_utf8_line_is_inspectable_and_purgeable() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let good = encode_record(&EventRecord::new("ok", json!(1), Some(1))).unwrap();
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(format!("{good}\n").as_bytes());
        tokio::fs::write(queue.path(), &bytes).await.unwrap();

        let entries = queue.inspect().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_matches!(entries[0].record, Err(DecodeError::Line(_)));
        assert_eq!(entries[0].raw, b"\xff\xfe garbage".to_vec());

        assert_eq!(queue.purge(PurgeMode::MalformedOnly).await.unwrap(), 1);
        assert_eq!(
            tokio::fs::read_to_string(queue.path()).await.unwrap(),
            format!("{good}\n")
        );
    }

    #[tokio::test]
    async fn append_after_torn_tail_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let queue = ready_queue(dir.path(), "k").await;
        let torn = encode_record(&EventRecord::new("lost", json!(0), Some(0))).unwrap();
        tokio::fs::write(queue.path(), &torn[..10]).await.unwrap();

        let fresh = EventRecord::new("fresh", json!(2), Some(2));
        queue.append(&fresh).await.unwrap();
        queue
            .append(&EventRecord::new("next", json!(3), Some(3)))
            .await
            .unwrap();

        let mut forwarded = Vec::new();
        let report = queue
            .drain(|record| {
                forwarded.push(record.event);
                async { ReplayOutcome::Delivered }
            })
            .await
            .unwrap();

        assert_eq!(forwarded, vec!["fresh", "next"]);
        assert_eq!(report.malformed, 1);
        assert_eq!(
            tokio::fs::read_to_string(queue.path()).await.unwrap(),
            format!("{}\n", &torn[..10])
        );
    }
}
