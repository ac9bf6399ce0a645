//! Attachment downloads with atomic writes.
//!
//! Each submitted attachment runs as its own task:
//! - the destination directory is captured from the [`PathGuard`] at submit time
//! - bytes are streamed into `<name><suffix>` next to the final path
//! - a rename exposes the final name only once the stream completed
//! - jobs targeting the same final path run one after another
//!
//! Progress is reported through [`StatsTracker`] and as chat replies.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use protocol::{ChatId, FileRef, MessageId, OutboundMessage};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::guard::PathGuard;
use crate::stats::StatsTracker;

/// Default suffix appended to in-progress files.
pub const DEFAULT_TEMP_SUFFIX: &str = ".tmp";

/// Default number of pending downloads between progress replies.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 5;

/// Reply sent when the last pending download settles.
pub const ALL_DONE_TEXT: &str = "All downloads finished";

/// Remote file bytes as a stream of chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Errors that can occur while saving an attachment.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The filename is not a single plain path component.
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    /// The remote file could not be opened.
    #[error("failed to fetch file: {0}")]
    Fetch(String),

    /// Reading the byte stream failed part way.
    #[error("stream interrupted: {0}")]
    Stream(#[source] io::Error),

    /// Writing the temporary file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Promoting the temporary file failed.
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The manager is shutting down.
    #[error("download manager is shut down")]
    Shutdown,
}

impl DownloadError {
    /// Reply text naming the failed step.
    pub fn reply_text(&self) -> String {
        match self {
            DownloadError::Rename { .. } => format!("Error: Rename: {}", self),
            _ => format!("Error: Download: {}", self),
        }
    }
}

/// Provides the bytes behind a [`FileRef`].
pub trait FileSource: Send + Sync + 'static {
    /// Open the remote file as a byte stream.
    fn fetch(
        &self,
        file: &FileRef,
    ) -> impl Future<Output = Result<ByteStream, DownloadError>> + Send;
}

/// One attachment to save.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Chat that receives notifications.
    pub chat_id: ChatId,
    /// Message the notifications reply to.
    pub reply_to: Option<MessageId>,
    pub file: FileRef,
    /// Suggested filename, may be empty.
    pub file_name: String,
}

/// How a download settled.
#[derive(Debug)]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    Failed(DownloadError),
}

impl DownloadOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DownloadOutcome::Saved { .. })
    }
}

/// Runs attachment downloads concurrently.
pub struct DownloadManager<S: FileSource> {
    source: Arc<S>,
    guard: Arc<PathGuard>,
    stats: Arc<StatsTracker>,
    /// Outbound notifications.
    replies: mpsc::UnboundedSender<OutboundMessage>,
    tracker: TaskTracker,
    /// Bounds active transfers when set.
    limiter: Option<Arc<Semaphore>>,
    /// Final paths currently being written.
    claims: Arc<PathClaims>,
    temp_suffix: String,
    progress_interval: u64,
}

impl<S: FileSource> DownloadManager<S> {
    /// Create an unbounded manager with default settings.
    pub fn new(
        source: Arc<S>,
        guard: Arc<PathGuard>,
        stats: Arc<StatsTracker>,
        replies: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            source,
            guard,
            stats,
            replies,
            tracker: TaskTracker::new(),
            limiter: None,
            claims: Arc::new(PathClaims::default()),
            temp_suffix: DEFAULT_TEMP_SUFFIX.to_string(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the suffix of in-progress files.
    pub fn with_temp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temp_suffix = suffix.into();
        self
    }

    /// Set how many pending downloads separate progress replies.
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Limit concurrently active transfers. Zero means unbounded.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.limiter = (max > 0).then(|| Arc::new(Semaphore::new(max)));
        self
    }

    /// Start a download and return immediately.
    ///
    /// The request counts as pending from this call on, even while it waits
    /// for a transfer slot.
    pub fn submit(&self, request: DownloadRequest) -> JoinHandle<DownloadOutcome> {
        let dir = self.guard.current_dir();
        let file_name = if request.file_name.is_empty() {
            info!(unique_id = %request.file.unique_id, "Document without filename");
            request.file.unique_id.clone()
        } else {
            request.file_name.clone()
        };

        let pending = self.stats.increment_pending();
        info!(name = %file_name, dir = %dir.display(), pending, "Enqueued");

        let job = Job {
            source: Arc::clone(&self.source),
            stats: Arc::clone(&self.stats),
            replies: self.replies.clone(),
            limiter: self.limiter.clone(),
            claims: Arc::clone(&self.claims),
            temp_suffix: self.temp_suffix.clone(),
            progress_interval: self.progress_interval,
            dir,
            file_name,
            request,
        };

        self.tracker.spawn(job.run())
    }

    /// Downloads currently tracked, queued or active.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait up to `grace` for running downloads.
    ///
    /// Returns `true` if every download settled in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        if let Some(limiter) = &self.limiter {
            limiter.close();
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("All downloads settled");
                true
            }
            Err(_) => {
                warn!(
                    pending = self.stats.pending(),
                    "Shutdown grace period elapsed with downloads in flight"
                );
                false
            }
        }
    }
}

/// State moved into a download task.
struct Job<S: FileSource> {
    source: Arc<S>,
    stats: Arc<StatsTracker>,
    replies: mpsc::UnboundedSender<OutboundMessage>,
    limiter: Option<Arc<Semaphore>>,
    claims: Arc<PathClaims>,
    temp_suffix: String,
    progress_interval: u64,
    dir: PathBuf,
    file_name: String,
    request: DownloadRequest,
}

impl<S: FileSource> Job<S> {
    async fn run(self) -> DownloadOutcome {
        let outcome = match self.transfer().await {
            Ok((path, bytes)) => {
                self.stats.increment_succeeded();
                info!(path = %path.display(), bytes, "Download saved");
                DownloadOutcome::Saved { path, bytes }
            }
            Err(e) => {
                self.stats.increment_failed();
                let text = e.reply_text();
                warn!(name = %self.file_name, error = %e, "{}", text);
                self.notify(text);
                DownloadOutcome::Failed(e)
            }
        };

        let pending = self.stats.decrement_pending();
        if let Some(text) = progress_text(pending, self.progress_interval) {
            info!("{}", text);
            self.notify(text);
        }

        outcome
    }

    async fn transfer(&self) -> Result<(PathBuf, u64), DownloadError> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(
                Arc::clone(limiter)
                    .acquire_owned()
                    .await
                    .map_err(|_| DownloadError::Shutdown)?,
            ),
            None => None,
        };

        validate_filename(&self.file_name)?;
        let final_path = self.dir.join(&self.file_name);
        let temp_path = temp_path_for(&final_path, &self.temp_suffix);

        // Taken after the permit, so a claim holder never waits for a slot
        let _claim = PathClaims::claim(&self.claims, &final_path).await;

        let stream = self.source.fetch(&self.request.file).await?;
        let bytes = match write_stream(stream, &temp_path).await {
            Ok(n) => n,
            Err(e) => {
                remove_temp(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(source) = tokio::fs::rename(&temp_path, &final_path).await {
            remove_temp(&temp_path).await;
            return Err(DownloadError::Rename {
                from: temp_path,
                to: final_path,
                source,
            });
        }

        Ok((final_path, bytes))
    }

    fn notify(&self, text: String) {
        let msg = OutboundMessage {
            chat_id: self.request.chat_id,
            reply_to: self.request.reply_to,
            text,
        };
        // Receiver gone means the bot is stopping
        let _ = self.replies.send(msg);
    }
}

/// Per-path locks; the temp file of a final path has one writer at a time.
#[derive(Debug, Default)]
struct PathClaims {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathClaims {
    /// Wait until no other job holds `path`.
    async fn claim(claims: &Arc<Self>, path: &Path) -> PathClaim {
        let lock = {
            let mut locks = claims.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        if lock.try_lock().is_err() {
            debug!(path = %path.display(), "Waiting for a download of the same file");
        }
        let guard = lock.lock_owned().await;

        PathClaim {
            guard: Some(guard),
            claims: Arc::clone(claims),
            path: path.to_path_buf(),
        }
    }

    /// Forget `path` once nobody holds or waits for it.
    fn release(&self, path: &Path) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(path);
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// Exclusive hold on a final path, released on drop.
struct PathClaim {
    guard: Option<OwnedMutexGuard<()>>,
    claims: Arc<PathClaims>,
    path: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        // The guard owns a reference to the lock; drop it before counting
        self.guard.take();
        self.claims.release(&self.path);
    }
}

/// Progress reply for the pending count left after a download settled.
pub fn progress_text(pending: u64, interval: u64) -> Option<String> {
    if pending == 0 {
        Some(ALL_DONE_TEXT.to_string())
    } else if interval != 0 && pending % interval == 0 {
        Some(format!("Done. Pending downloads: {}", pending))
    } else {
        None
    }
}

/// Reject names that are not exactly one normal path component.
pub fn validate_filename(name: &str) -> Result<(), DownloadError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('\0')
        || name.chars().any(std::path::is_separator)
    {
        return Err(DownloadError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

fn temp_path_for(final_path: &Path, suffix: &str) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_stream(mut stream: ByteStream, temp_path: &Path) -> Result<u64, DownloadError> {
    let write_err = |source: io::Error| DownloadError::Write {
        path: temp_path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(temp_path).await.map_err(write_err)?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DownloadError::Stream)?;
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    debug!(path = %temp_path.display(), bytes = written, "Stream complete");

    Ok(written)
}

/// Only called while the path claim is held, so the temp file is this job's.
async fn remove_temp(temp_path: &Path) {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %temp_path.display(), error = %e, "Failed to cleanup temp file");
        }
    }
}
