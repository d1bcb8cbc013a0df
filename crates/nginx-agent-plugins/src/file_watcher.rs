//! Watches the allowed directories for changes made outside the agent.
//!
//! Every relevant change is reported on [`topics::DATAPLANE_FILES_CHANGED`].
//! The nginx plugin switches the watcher off with
//! [`topics::FILE_WATCHER_ENABLED`] while it writes a configuration, so the
//! agent's own writes are not reported. Switching it back on reports a change
//! unconditionally, since files may have moved while nobody was looking.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nginx_agent_core::{Info, Message, MessagePipe, Payload, Plugin, async_trait, topics};
use notify::event::{MetadataKind, ModifyKind};
use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, trace, warn};

pub const FILE_WATCHER_PLUGIN_NAME: &str = "file-watcher";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Editor leftovers that never count as a change.
const IGNORED_SUFFIXES: [&str; 3] = [".swp", ".swx", "~"];

pub struct FileWatcher {
    directories: Vec<PathBuf>,
    poll_interval: Duration,
    enabled: Arc<AtomicBool>,
    pipe: OnceLock<MessagePipe>,
    watcher: Mutex<Option<PollWatcher>>,
}

impl FileWatcher {
    pub fn new(directories: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            enabled: Arc::new(AtomicBool::new(true)),
            pipe: OnceLock::new(),
            watcher: Mutex::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn start_watching(&self) -> notify::Result<UnboundedReceiver<notify::Result<Event>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = PollWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        for dir in &self.directories {
            if !dir.exists() {
                debug!(dir = %dir.display(), "skipping missing directory");
                continue;
            }
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => debug!(dir = %dir.display(), "watching directory"),
                Err(err) => error!(dir = %dir.display(), error = %err, "unable to watch directory"),
            }
        }

        *self.watcher.lock() = Some(watcher);
        Ok(rx)
    }
}

#[async_trait]
impl Plugin for FileWatcher {
    async fn init(&self, pipe: MessagePipe) {
        info!(directories = ?self.directories, "file watcher initializing");
        if self.pipe.set(pipe.clone()).is_err() {
            warn!("file watcher initialized twice");
            return;
        }

        let mut events = match self.start_watching() {
            Ok(events) => events,
            Err(err) => {
                error!(error = %err, "unable to create file watcher");
                return;
            }
        };

        let enabled = self.enabled.clone();
        let shutdown = pipe.context();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                match event {
                    Ok(event) if enabled.load(Ordering::SeqCst) && is_relevant(&event) => {
                        trace!(kind = ?event.kind, paths = ?event.paths, "files changed");
                        pipe.process([Message::empty(topics::DATAPLANE_FILES_CHANGED)])
                            .await;
                    }
                    Ok(event) => trace!(kind = ?event.kind, "skipping file event"),
                    Err(err) => warn!(error = %err, "file watcher error"),
                }
            }
            debug!("file watcher loop finished");
        });
    }

    async fn process(&self, message: &Message) {
        let (topics::FILE_WATCHER_ENABLED, Payload::Flag(enabled)) =
            (message.topic(), message.data())
        else {
            warn!(topic = message.topic(), data = ?message.data(), "invalid message received");
            return;
        };

        self.enabled.store(*enabled, Ordering::SeqCst);
        debug!(enabled, "file watcher toggled");
        if *enabled && let Some(pipe) = self.pipe.get() {
            pipe.process([Message::empty(topics::DATAPLANE_FILES_CHANGED)])
                .await;
        }
    }

    async fn close(&self) {
        info!("file watcher is wrapping up");
        self.enabled.store(false, Ordering::SeqCst);
        self.watcher.lock().take();
    }

    fn info(&self) -> Info {
        Info::new(FILE_WATCHER_PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![topics::FILE_WATCHER_ENABLED.to_string()]
    }
}

/// Content, creation, removal and rename events count. Permission and
/// ownership changes do not.
fn is_relevant(event: &Event) -> bool {
    let kind = match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(metadata)) => {
            matches!(metadata, MetadataKind::WriteTime | MetadataKind::Any)
        }
        EventKind::Modify(_) => true,
        _ => false,
    };
    kind && event.paths.iter().any(|path| !is_ignored(path))
}

fn is_ignored(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.is_empty() || IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}
