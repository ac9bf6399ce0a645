//! Command router for dispatching chat events to the file subsystem.
//!
//! This module provides the `CommandRouter` struct that receives normalized
//! inbound events and routes them to the path guard, directory lister,
//! statistics or download manager, producing the replies to send back.

use std::sync::Arc;

use protocol::{Attachment, ChatId, Command, EventKind, InboundEvent, OutboundMessage};
use tracing::{debug, error, info, warn};

use crate::files::{
    DirectoryLister, DownloadManager, DownloadRequest, FileSource, ListError, PathError, PathGuard,
};
use crate::stats::StatsTracker;

/// Reply for a malformed `/cd`.
pub const CD_USAGE: &str = "Usage: /cd [-r] <path>";

/// Reply for a path outside the root.
pub const OUTSIDE_ROOT_TEXT: &str = "Path is not relative to initial working dir";

/// Result type for router operations.
pub type RouterResult = Result<Vec<OutboundMessage>, RouterError>;

/// Errors that can occur during event routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The chat is not whitelisted.
    #[error("chat {0} is not authorized")]
    Unauthorized(ChatId),

    /// Wrong command arguments.
    #[error("{0}")]
    Usage(&'static str),

    /// Path resolution or directory change failed.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Directory listing failed.
    #[error("list error: {0}")]
    List(#[from] ListError),

    /// A blocking task did not complete.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Text to reply with, or `None` when the event is dropped silently.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            RouterError::Unauthorized(_) => None,
            RouterError::Usage(usage) => Some(usage.to_string()),
            RouterError::Path(e) => Some(match e {
                PathError::OutsideRoot(_) => OUTSIDE_ROOT_TEXT.to_string(),
                PathError::CreateDir { source, .. } => format!("Error: MkdirAll: {}", source),
                PathError::ChangeDir { source, .. } => format!("Error: Chdir: {}", source),
                PathError::NotADirectory(path) => {
                    format!("Error: Chdir: not a directory: {}", path.display())
                }
                PathError::InvalidRoot { .. } => format!("Error: Chdir: {}", e),
            }),
            RouterError::List(e) => Some(format!("Error: Ls: {}", e)),
            RouterError::Internal(e) => Some(format!("Error: {}", e)),
        }
    }
}

/// Routes inbound events to the subsystem that handles them.
///
/// The router holds references to the path guard, directory lister,
/// statistics tracker and download manager shared with the orchestrator.
pub struct CommandRouter<S: FileSource> {
    guard: Arc<PathGuard>,
    lister: Arc<DirectoryLister>,
    stats: Arc<StatsTracker>,
    downloads: Arc<DownloadManager<S>>,
    /// Only this chat is served when set.
    authorized_chat: Option<ChatId>,
}

impl<S: FileSource> CommandRouter<S> {
    /// Create a new router with the given dependencies.
    pub fn new(
        guard: Arc<PathGuard>,
        lister: Arc<DirectoryLister>,
        stats: Arc<StatsTracker>,
        downloads: Arc<DownloadManager<S>>,
        authorized_chat: Option<ChatId>,
    ) -> Self {
        Self {
            guard,
            lister,
            stats,
            downloads,
            authorized_chat,
        }
    }

    /// Route an event and turn failures into replies.
    ///
    /// Every failure is logged. Unauthorized chats get no reply.
    pub async fn handle(&self, event: InboundEvent) -> Vec<OutboundMessage> {
        let chat_id = event.chat_id;
        let message_id = event.message_id;

        match self.route(event).await {
            Ok(replies) => replies,
            Err(e) => {
                let Some(text) = e.reply_text() else {
                    debug!(chat_id, error = %e, "Dropping event");
                    return Vec::new();
                };
                warn!(chat_id, error = %e, "{}", text);
                vec![OutboundMessage {
                    chat_id,
                    reply_to: Some(message_id),
                    text,
                }]
            }
        }
    }

    /// Route an event to the appropriate handler.
    ///
    /// Returns the replies to send, or `Err(error)` if handling failed.
    pub async fn route(&self, event: InboundEvent) -> RouterResult {
        self.require_authorized(event.chat_id)?;
        debug!(chat_id = event.chat_id, kind = ?event.kind, "Routing event");

        match &event.kind {
            EventKind::Command(command) => match command {
                Command::Help => Ok(self.handle_help(&event)),
                Command::Cd(args) => self.handle_cd(&event, args),
                Command::Pwd => Ok(self.handle_pwd(&event)),
                Command::Ls => self.handle_ls(&event).await,
                Command::Stats => Ok(self.handle_stats(&event)),
                Command::Unknown(name) => {
                    info!(command = %name, "Ignoring unknown command");
                    Ok(Vec::new())
                }
            },
            EventKind::Attachment(attachment) => Ok(self.handle_attachment(&event, attachment)),
            EventKind::Ignored => {
                debug!("Ignoring message without command or attachment");
                Ok(Vec::new())
            }
        }
    }

    fn require_authorized(&self, chat_id: ChatId) -> Result<(), RouterError> {
        match self.authorized_chat {
            Some(allowed) if allowed != chat_id => Err(RouterError::Unauthorized(chat_id)),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Command Handlers
    // =========================================================================

    fn handle_help(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        vec![OutboundMessage::to_chat(event.chat_id, help_text(event.chat_id))]
    }

    fn handle_cd(&self, event: &InboundEvent, args: &[String]) -> RouterResult {
        let [target] = args else {
            return Err(RouterError::Usage(CD_USAGE));
        };

        let current = self.guard.change_directory(target)?;
        info!(path = %current.display(), "Working directory changed");
        Ok(vec![OutboundMessage::reply(event, "done!")])
    }

    fn handle_pwd(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        let current = self.guard.current_dir();
        vec![OutboundMessage::reply(event, current.display().to_string())]
    }

    async fn handle_ls(&self, event: &InboundEvent) -> RouterResult {
        let dir = self.guard.current_dir();
        let lister = Arc::clone(&self.lister);

        let chunks = tokio::task::spawn_blocking(move || lister.report(&dir))
            .await
            .map_err(|e| {
                error!(error = %e, "Listing task failed");
                RouterError::Internal(e.to_string())
            })??;

        Ok(chunks
            .into_iter()
            .map(|text| OutboundMessage::reply(event, text))
            .collect())
    }

    fn handle_stats(&self, event: &InboundEvent) -> Vec<OutboundMessage> {
        let text = self.stats.snapshot().to_string();
        info!("{}", text);
        vec![OutboundMessage::reply(event, text)]
    }

    // =========================================================================
    // Attachment Handler
    // =========================================================================

    fn handle_attachment(
        &self,
        event: &InboundEvent,
        attachment: &Attachment,
    ) -> Vec<OutboundMessage> {
        let mut replies = Vec::new();

        if let Some(mime) = attachment.unexpected_video_mime() {
            let text = format!("Unsupported video format: {}, wants 'video/mp4'", mime);
            warn!("{}", text);
            replies.push(OutboundMessage::reply(event, text));
        }

        debug!(kind = attachment.kind(), "Submitting download");
        // Detached; the manager reports through the reply channel
        let _ = self.downloads.submit(DownloadRequest {
            chat_id: event.chat_id,
            reply_to: Some(event.message_id),
            file: attachment.file().clone(),
            file_name: attachment.suggested_name(),
        });

        replies
    }
}

/// Static help text, including the chat id for whitelisting.
pub fn help_text(chat_id: ChatId) -> String {
    let mut msg = String::from("This is a bot for downloading attachments.\n");
    msg.push_str(&format!("Chat ID: {}\nCommands:\n", chat_id));
    msg.push_str("/help - show this help\n");
    msg.push_str(
        "/cd [-r] <path> - change working directory (-r: reset to initial working dir)\n",
    );
    msg.push_str("/pwd - print working directory\n");
    msg.push_str("/ls - list files in current working directory\n");
    msg.push_str("/stats - print statistics\n");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{ByteStream, DownloadError};
    use bytes::Bytes;
    use futures_util::stream;
    use protocol::FileRef;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Serves the file id as content.
    struct EchoSource;

    impl FileSource for EchoSource {
        async fn fetch(&self, file: &FileRef) -> Result<ByteStream, DownloadError> {
            let data = Bytes::from(file.file_id.clone().into_bytes());
            Ok(Box::pin(stream::iter(vec![Ok::<_, std::io::Error>(data)])))
        }
    }

    struct Harness {
        root: TempDir,
        router: CommandRouter<EchoSource>,
        guard: Arc<PathGuard>,
        downloads: Arc<DownloadManager<EchoSource>>,
        stats: Arc<StatsTracker>,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    fn harness(authorized: Option<ChatId>) -> Harness {
        let root = TempDir::new().unwrap();
        let guard = Arc::new(PathGuard::new(root.path()).unwrap());
        let stats = Arc::new(StatsTracker::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let downloads = Arc::new(DownloadManager::new(
            Arc::new(EchoSource),
            Arc::clone(&guard),
            Arc::clone(&stats),
            tx,
        ));
        let router = CommandRouter::new(
            Arc::clone(&guard),
            Arc::new(DirectoryLister::new()),
            Arc::clone(&stats),
            Arc::clone(&downloads),
            authorized,
        );
        Harness {
            root,
            router,
            guard,
            downloads,
            stats,
            rx,
        }
    }

    fn command(chat_id: ChatId, cmd: Command) -> InboundEvent {
        InboundEvent::new(chat_id, 7, EventKind::Command(cmd))
    }

    fn cd(path: &str) -> InboundEvent {
        command(1, Command::Cd(vec![path.to_string()]))
    }

    fn texts(replies: &[OutboundMessage]) -> Vec<&str> {
        replies.iter().map(|r| r.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_help_contains_chat_id() {
        let h = harness(None);
        let replies = h.router.handle(command(4242, Command::Help)).await;

        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("Chat ID: 4242"));
        assert!(replies[0].text.contains("/cd [-r] <path>"));
        assert_eq!(replies[0].reply_to, None);
    }

    #[tokio::test]
    async fn test_unauthorized_chat_is_dropped() {
        let h = harness(Some(1));
        let replies = h.router.handle(command(2, Command::Pwd)).await;
        assert!(replies.is_empty());

        let result = h.router.route(command(2, Command::Pwd)).await;
        assert!(matches!(result, Err(RouterError::Unauthorized(2))));
    }

    #[tokio::test]
    async fn test_authorized_chat_is_served() {
        let h = harness(Some(1));
        let replies = h.router.handle(command(1, Command::Pwd)).await;
        assert_eq!(texts(&replies), vec![h.guard.root().display().to_string()]);
        assert_eq!(replies[0].reply_to, Some(7));
    }

    #[tokio::test]
    async fn test_cd_usage() {
        let h = harness(None);
        let replies = h.router.handle(command(1, Command::Cd(vec![]))).await;
        assert_eq!(texts(&replies), vec![CD_USAGE]);

        let two = Command::Cd(vec!["a".to_string(), "b".to_string()]);
        let replies = h.router.handle(command(1, two)).await;
        assert_eq!(texts(&replies), vec![CD_USAGE]);
    }

    #[tokio::test]
    async fn test_cd_relative_creates_directory() {
        let h = harness(None);
        let replies = h.router.handle(cd("relative/sub")).await;

        assert_eq!(texts(&replies), vec!["done!"]);
        let expected = h.guard.root().join("relative").join("sub");
        assert!(expected.is_dir());
        assert_eq!(h.guard.current_dir(), expected);
    }

    #[tokio::test]
    async fn test_cd_outside_root() {
        let h = harness(None);
        let before = h.guard.current_dir();

        let replies = h.router.handle(cd("/etc")).await;

        assert_eq!(texts(&replies), vec![OUTSIDE_ROOT_TEXT]);
        assert_eq!(h.guard.current_dir(), before);
    }

    #[tokio::test]
    async fn test_cd_reset() {
        let h = harness(None);
        h.router.handle(cd("a/b")).await;
        let replies = h.router.handle(cd("-r")).await;

        assert_eq!(texts(&replies), vec!["done!"]);
        assert_eq!(h.guard.current_dir(), h.guard.root());
    }

    #[tokio::test]
    async fn test_cd_onto_file_reports_mkdir_error() {
        let h = harness(None);
        fs::write(h.root.path().join("plain"), b"x").unwrap();

        let replies = h.router.handle(cd("plain")).await;

        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.starts_with("Error: "));
        assert_eq!(h.guard.current_dir(), h.guard.root());
    }

    #[tokio::test]
    async fn test_ls_lists_current_directory() {
        let h = harness(None);
        fs::write(h.root.path().join("a.txt"), vec![0u8; 2048]).unwrap();
        fs::create_dir(h.root.path().join("sub")).unwrap();

        let replies = h.router.handle(command(1, Command::Ls)).await;

        assert_eq!(replies.len(), 1);
        let text = &replies[0].text;
        assert!(text.starts_with(&format!("Files in {}:\n", h.guard.root().display())));
        assert!(text.contains("- a.txt"));
        assert!(text.contains(": 2 KB\n"));
        assert!(text.contains("d sub"));
    }

    #[tokio::test]
    async fn test_ls_chunks_long_listing() {
        let h = harness(None);
        for i in 0..30 {
            fs::write(h.root.path().join(format!("file_{:02}.dat", i)), b"").unwrap();
        }

        let replies = h.router.handle(command(1, Command::Ls)).await;

        assert!(replies.len() > 1);
        assert!(replies.iter().all(|r| r.text.len() < 400));
        let total_lines: usize = replies.iter().map(|r| r.text.lines().count()).sum();
        assert_eq!(total_lines, 31);
    }

    #[tokio::test]
    async fn test_stats_reply() {
        let h = harness(None);
        h.stats.increment_succeeded();
        h.stats.increment_failed();

        let replies = h.router.handle(command(1, Command::Stats)).await;

        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.starts_with("Stats:\nUptime: "));
        assert!(replies[0].text.ends_with("Downloads : 1/2 (pending: 0)"));
    }

    #[tokio::test]
    async fn test_unknown_command_is_ignored() {
        let h = harness(None);
        let replies = h
            .router
            .handle(command(1, Command::Unknown("rm".to_string())))
            .await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_photo_is_downloaded_into_current_dir() {
        let mut h = harness(None);
        h.router.handle(cd("pics")).await;

        let event = InboundEvent::new(
            1,
            9,
            EventKind::Attachment(Attachment::Photo {
                file: FileRef {
                    file_id: "photo-bytes".to_string(),
                    unique_id: "AQAD".to_string(),
                    size: None,
                },
            }),
        );
        let replies = h.router.handle(event).await;
        assert!(replies.is_empty());

        assert!(h.downloads.shutdown(Duration::from_secs(5)).await);
        let saved: PathBuf = h.guard.root().join("pics").join("AQAD.jpg");
        assert_eq!(fs::read(&saved).unwrap(), b"photo-bytes");

        let done = h.rx.try_recv().unwrap();
        assert_eq!(done.text, "All downloads finished");
        assert_eq!(done.reply_to, Some(9));
    }

    #[tokio::test]
    async fn test_unexpected_video_mime_warns_and_downloads() {
        let h = harness(None);
        let event = InboundEvent::new(
            1,
            3,
            EventKind::Attachment(Attachment::Video {
                file: FileRef {
                    file_id: "v".to_string(),
                    unique_id: "BAAD".to_string(),
                    size: None,
                },
                mime_type: Some("video/quicktime".to_string()),
            }),
        );

        let replies = h.router.handle(event).await;

        assert_eq!(
            texts(&replies),
            vec!["Unsupported video format: video/quicktime, wants 'video/mp4'"]
        );
        assert!(h.downloads.shutdown(Duration::from_secs(5)).await);
        assert!(h.guard.root().join("BAAD.mp4").exists());
    }

    #[test]
    fn test_error_reply_texts() {
        let outside = RouterError::Path(PathError::OutsideRoot(PathBuf::from("/etc")));
        assert_eq!(outside.reply_text().as_deref(), Some(OUTSIDE_ROOT_TEXT));

        let mkdir = RouterError::Path(PathError::CreateDir {
            path: PathBuf::from("/data/x"),
            source: std::io::Error::other("read-only file system"),
        });
        assert_eq!(
            mkdir.reply_text().as_deref(),
            Some("Error: MkdirAll: read-only file system")
        );

        let chdir = RouterError::Path(PathError::ChangeDir {
            path: PathBuf::from("/data/x"),
            source: std::io::Error::other("permission denied"),
        });
        assert_eq!(
            chdir.reply_text().as_deref(),
            Some("Error: Chdir: permission denied")
        );

        assert_eq!(RouterError::Unauthorized(5).reply_text(), None);
    }
}
