//! Bot orchestrator for wiring together all components.
//!
//! This module provides the `BotOrchestrator` that builds every subsystem
//! once from the configuration (path guard, statistics, downloads, listing,
//! routing, Bot API client) and runs the polling and reply loops.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::wire::Update;
use protocol::{InboundEvent, OutboundMessage};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::files::{DirectoryLister, DownloadManager, FileSource, PathGuard};
use crate::network::BotApi;
use crate::router::CommandRouter;
use crate::stats::StatsTracker;

/// Reconnection backoff for failed polls.
const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Time allowed for the loops to exit after shutdown.
const LOOP_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, spawning loops.
    Starting,
    /// Polling for updates.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// An update was handled.
    UpdateHandled { update_id: i64 },
    /// Polling failed; it will be retried.
    PollFailed { message: String },
}

/// Bot orchestrator that owns all subsystems.
pub struct BotOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Bot API client, also the download source.
    api: Arc<BotApi>,
    /// Root confinement and current directory.
    guard: Arc<PathGuard>,
    /// Download counters.
    stats: Arc<StatsTracker>,
    /// Attachment downloads.
    downloads: Arc<DownloadManager<BotApi>>,
    /// Command router.
    router: Arc<CommandRouter<BotApi>>,
    /// Reply sink shared with the downloads.
    replies_tx: mpsc::UnboundedSender<OutboundMessage>,
    /// Taken by the reply loop on start.
    replies_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundMessage>>>,
    /// Poll and reply loops.
    loops: TaskTracker,
    /// Stops polling.
    shutdown_token: CancellationToken,
    /// Stops the reply loop once downloads settled.
    outbound_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl BotOrchestrator {
    /// Creates a new orchestrator from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let root = config.root_dir()?;
        let guard = Arc::new(
            PathGuard::new(&root)
                .with_context(|| format!("Failed to open root directory {}", root.display()))?,
        );
        info!("Working directory: {}", guard.root().display());

        let token = config.bot.token.clone().unwrap_or_default();
        let api = Arc::new(
            BotApi::new(
                &config.bot.api_url,
                token,
                Duration::from_secs(config.bot.poll_timeout_secs),
            )
            .context("Failed to create Bot API client")?,
        );

        let stats = Arc::new(StatsTracker::new());
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();

        let downloads = Arc::new(
            DownloadManager::new(
                Arc::clone(&api),
                Arc::clone(&guard),
                Arc::clone(&stats),
                replies_tx.clone(),
            )
            .with_temp_suffix(config.storage.temp_suffix.clone())
            .with_progress_interval(config.download.progress_interval)
            .with_max_concurrent(config.download.max_concurrent),
        );

        if let Some(chat_id) = config.bot.authorized_chat_id {
            info!("Whitelisted chat ID: {}", chat_id);
        }

        let router = Arc::new(CommandRouter::new(
            Arc::clone(&guard),
            Arc::new(DirectoryLister::new().include_hidden(config.storage.list_hidden)),
            Arc::clone(&stats),
            Arc::clone(&downloads),
            config.bot.authorized_chat_id,
        ));

        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            api,
            guard,
            stats,
            downloads,
            router,
            replies_tx,
            replies_rx: Mutex::new(Some(replies_rx)),
            loops: TaskTracker::new(),
            shutdown_token: CancellationToken::new(),
            outbound_token: CancellationToken::new(),
            event_tx,
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Starts polling and the reply loop.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting bot orchestrator...");

        let replies_rx = self
            .replies_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .context("Orchestrator cannot be restarted")?;

        self.loops.spawn(reply_loop(
            Arc::clone(&self.api),
            replies_rx,
            self.outbound_token.clone(),
        ));
        debug!("Started reply loop");

        self.loops.spawn(poll_loop(
            Arc::clone(&self.api),
            Arc::clone(&self.router),
            self.replies_tx.clone(),
            self.event_tx.clone(),
            self.shutdown_token.clone(),
        ));
        debug!("Started poll loop");

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(root = %self.guard.root().display(), "Bot orchestrator started successfully");
        Ok(())
    }

    /// Stops the orchestrator gracefully.
    ///
    /// Polling stops first, then in-flight downloads get the configured grace
    /// period, then queued replies are flushed.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping bot orchestrator...");

        // Signal shutdown to the poll loop
        self.shutdown_token.cancel();

        let grace = Duration::from_secs(self.config.download.shutdown_grace_secs);
        if !self.downloads.shutdown(grace).await {
            warn!(
                pending = self.stats.pending(),
                "Stopping with unfinished downloads"
            );
        }

        self.outbound_token.cancel();
        self.loops.close();
        if tokio::time::timeout(LOOP_EXIT_TIMEOUT, self.loops.wait())
            .await
            .is_err()
        {
            warn!("Timed out waiting for bot loops to exit");
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Bot orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the download statistics.
    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }
}

/// Route the message carried by an update, if any.
pub async fn process_update<S: FileSource>(
    router: &CommandRouter<S>,
    update: Update,
) -> Vec<OutboundMessage> {
    match update.message {
        Some(message) => router.handle(InboundEvent::from_message(message)).await,
        None => {
            debug!(update_id = update.update_id, "Update without message");
            Vec::new()
        }
    }
}

/// Long-poll for updates until cancelled.
async fn poll_loop(
    api: Arc<BotApi>,
    router: Arc<CommandRouter<BotApi>>,
    replies: mpsc::UnboundedSender<OutboundMessage>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
    shutdown_token: CancellationToken,
) {
    let mut offset = 0i64;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        let result = tokio::select! {
            _ = shutdown_token.cancelled() => {
                info!("Poll loop received shutdown signal");
                break;
            }
            result = api.get_updates(offset) => result,
        };

        match result {
            Ok(updates) => {
                backoff_ms = INITIAL_BACKOFF_MS;
                for update in updates {
                    let update_id = update.update_id;
                    offset = update_id + 1;

                    for reply in process_update(&router, update).await {
                        let _ = replies.send(reply);
                    }
                    let _ = event_tx.send(OrchestratorEvent::UpdateHandled { update_id });
                }
            }
            Err(e) => {
                error!(error = %e, retry_ms = backoff_ms, "Failed to poll updates");
                let _ = event_tx.send(OrchestratorEvent::PollFailed {
                    message: e.to_string(),
                });

                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                }
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

/// Send replies until cancelled, then flush what is queued.
async fn reply_loop(
    api: Arc<BotApi>,
    mut replies: mpsc::UnboundedReceiver<OutboundMessage>,
    outbound_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = outbound_token.cancelled() => break,
            reply = replies.recv() => match reply {
                Some(reply) => send_reply(&api, reply).await,
                None => return,
            },
        }
    }

    while let Ok(reply) = replies.try_recv() {
        send_reply(&api, reply).await;
    }
    debug!("Reply loop exited");
}

async fn send_reply(api: &BotApi, reply: OutboundMessage) {
    let chat_id = reply.chat_id;
    if let Err(e) = api.send_message(reply).await {
        warn!(chat_id, error = %e, "Failed to send reply");
    }
}
