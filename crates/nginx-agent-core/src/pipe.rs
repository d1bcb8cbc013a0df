//! The message pipe: bounded queue, plugin registry and dispatch loop.
//!
//! [`MessagePipe`] is a cheap, cloneable handle. Producers call
//! [`process`](MessagePipe::process) from any task; exactly one task drives
//! [`run`](MessagePipe::run), which drains the queue and publishes each
//! message on the [`MessageBus`] while holding the registry lock.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──run──▶ Running ──cancel──▶ Cancelling ──▶ Stopped
//! ```
//!
//! - `run` initializes every registered plugin, in registration order,
//!   before the first dispatch.
//! - On cancellation the in-flight dispatch finishes, every plugin is closed
//!   in registration order, the queue is closed and `run` returns.
//! - Messages enqueued after cancellation are dropped without error.
//!
//! # Example
//!
//! ```rust,ignore
//! let root = CancellationToken::new();
//! let pipe = MessagePipe::new(&root, DEFAULT_QUEUE_SIZE);
//! pipe.register(DEFAULT_BUS_SIZE, vec![Arc::new(MyPlugin::new())]).await?;
//!
//! let runner = tokio::spawn({
//!     let pipe = pipe.clone();
//!     async move { pipe.run().await }
//! });
//! pipe.process([Message::empty(topics::AGENT_STARTED)]).await;
//!
//! root.cancel();
//! runner.await??;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::bus::MessageBus;
use crate::error::{PipeError, PipeResult};
use crate::message::Message;
use crate::plugin::BoxedPlugin;

/// Default depth of the inbound queue.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Default number of subscriptions the bus accepts.
pub const DEFAULT_BUS_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Created,
    Running,
    Cancelling,
    Stopped,
}

/// Handle to the plugin pipeline. Clones share the same pipe.
#[derive(Clone)]
pub struct MessagePipe {
    inner: Arc<Inner>,
}

struct Inner {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Serializes register, deregister and the move to `Running`.
    registration: AsyncMutex<()>,
    /// Held while the plugin list or bus changes and for every publish.
    registry: AsyncMutex<Registry>,
    /// Copy of `registry.plugins` readable without the async lock.
    snapshot: RwLock<Vec<BoxedPlugin>>,
    state: Mutex<PipeState>,
    token: CancellationToken,
}

struct Registry {
    plugins: Vec<BoxedPlugin>,
    /// Subscriptions by plugin name, read once when the plugin registers.
    subscriptions: HashMap<String, Vec<String>>,
    bus: MessageBus,
}

impl MessagePipe {
    /// Creates a pipe whose lifetime is bounded by `parent`.
    ///
    /// A `queue_size` of zero is raised to one.
    pub fn new(parent: &CancellationToken, queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                receiver: Mutex::new(Some(receiver)),
                registration: AsyncMutex::new(()),
                registry: AsyncMutex::new(Registry {
                    plugins: Vec::new(),
                    subscriptions: HashMap::new(),
                    bus: MessageBus::new(0),
                }),
                snapshot: RwLock::new(Vec::new()),
                state: Mutex::new(PipeState::Created),
                token: parent.child_token(),
            }),
        }
    }

    // ===== Registration =====

    /// Appends `plugins` and rewires the bus with room for `bus_size`
    /// subscriptions.
    ///
    /// The call is atomic: when any subscription does not fit, the previous
    /// plugin list and bus stay in place and the error is returned. A plugin
    /// whose name is already registered is skipped.
    ///
    /// Plugins added while the pipe is running are initialized before their
    /// subscriptions are wired, so none of them sees a message before its
    /// `init` returns. If the pipe is cancelled meanwhile they are closed
    /// again and [`PipeError::Stopped`] is returned.
    pub async fn register(&self, bus_size: usize, plugins: Vec<BoxedPlugin>) -> PipeResult<()> {
        let _registration = self.inner.registration.lock().await;

        let (state, added, all, subscriptions, bus) = {
            let registry = self.inner.registry.lock().await;
            let state = self.state();
            if matches!(state, PipeState::Cancelling | PipeState::Stopped) {
                return Err(PipeError::Stopped);
            }

            let mut added: Vec<BoxedPlugin> = Vec::new();
            let mut subscriptions = registry.subscriptions.clone();
            for plugin in plugins {
                let name = plugin.info().name;
                if registry
                    .plugins
                    .iter()
                    .chain(&added)
                    .any(|p| p.info().name == name)
                {
                    warn!(plugin = %name, "Plugin already registered, skipping");
                    continue;
                }
                subscriptions.insert(name, plugin.subscriptions());
                added.push(plugin);
            }

            let mut all = registry.plugins.clone();
            all.extend(added.iter().cloned());
            let bus = build_bus(bus_size, &all, &subscriptions)?;
            (state, added, all, subscriptions, bus)
        };

        if state == PipeState::Running {
            for plugin in &added {
                debug!(plugin = %plugin.info(), "Initializing plugin");
                plugin.init(self.clone()).await;
            }
        }

        let mut registry = self.inner.registry.lock().await;
        if matches!(self.state(), PipeState::Cancelling | PipeState::Stopped) {
            drop(registry);
            for plugin in &added {
                debug!(plugin = %plugin.info(), "Pipe stopped during registration, closing plugin");
                plugin.close().await;
            }
            return Err(PipeError::Stopped);
        }

        registry.plugins = all;
        registry.subscriptions = subscriptions;
        registry.bus = bus;
        *self.inner.snapshot.write() = registry.plugins.clone();
        info!(
            plugins = ?plugin_names(&registry.plugins),
            subscriptions = registry.bus.len(),
            "Finished registering plugins"
        );
        Ok(())
    }

    /// Removes the named plugins, unwires their subscriptions and closes them.
    ///
    /// Unknown names are ignored.
    pub async fn deregister(&self, names: &[&str]) -> PipeResult<()> {
        let _registration = self.inner.registration.lock().await;
        let mut registry = self.inner.registry.lock().await;
        if self.state() == PipeState::Stopped {
            return Err(PipeError::Stopped);
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut registry.plugins)
            .into_iter()
            .partition(|plugin| names.contains(&plugin.info().name.as_str()));
        registry.plugins = kept;
        for plugin in &removed {
            let name = plugin.info().name;
            registry.bus.unsubscribe_all(&name);
            registry.subscriptions.remove(&name);
        }
        *self.inner.snapshot.write() = registry.plugins.clone();
        drop(registry);

        for plugin in &removed {
            info!(plugin = %plugin.info(), "Deregistering plugin");
            plugin.close().await;
        }
        Ok(())
    }

    // ===== Messaging =====

    /// Enqueues `messages` in order.
    ///
    /// Waits while the queue is full. Once the pipe is cancelled the
    /// remaining messages are dropped.
    pub async fn process<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        for message in messages {
            tokio::select! {
                biased;
                () = self.inner.token.cancelled() => {
                    trace!("Pipe cancelled, dropping messages");
                    return;
                }
                sent = self.inner.sender.send(message) => {
                    if let Err(err) = sent {
                        trace!(topic = err.0.topic(), "Queue closed, dropping message");
                        return;
                    }
                }
            }
        }
    }

    /// Runs the dispatch loop until the pipe is cancelled.
    ///
    /// Only the first call runs; later calls return
    /// [`PipeError::AlreadyRunning`].
    pub async fn run(&self) -> PipeResult<()> {
        let mut receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .ok_or(PipeError::AlreadyRunning)?;

        let plugins = {
            let _registration = self.inner.registration.lock().await;
            let registry = self.inner.registry.lock().await;
            *self.inner.state.lock() = PipeState::Running;
            registry.plugins.clone()
        };

        info!(plugins = ?plugin_names(&plugins), "Message pipe starting");
        for plugin in &plugins {
            debug!(plugin = %plugin.info(), "Initializing plugin");
            plugin.init(self.clone()).await;
        }

        loop {
            tokio::select! {
                biased;
                () = self.inner.token.cancelled() => break,
                message = receiver.recv() => {
                    let Some(message) = message else { break };
                    let registry = self.inner.registry.lock().await;
                    trace!(topic = message.topic(), "Dispatching message");
                    registry.bus.publish(&message).await;
                }
            }
        }

        self.shutdown(receiver).await;
        Ok(())
    }

    async fn shutdown(&self, mut receiver: mpsc::Receiver<Message>) {
        let plugins = {
            let mut registry = self.inner.registry.lock().await;
            *self.inner.state.lock() = PipeState::Cancelling;
            registry.bus = MessageBus::new(0);
            registry.subscriptions.clear();
            std::mem::take(&mut registry.plugins)
        };
        self.inner.snapshot.write().clear();

        info!("Message pipe cancelled, closing plugins");
        for plugin in &plugins {
            debug!(plugin = %plugin.info(), "Closing plugin");
            plugin.close().await;
        }

        receiver.close();
        let mut dropped = 0usize;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Dropped undelivered messages");
        }

        *self.inner.state.lock() = PipeState::Stopped;
        info!("Message pipe stopped");
    }

    // ===== Introspection =====

    /// A token that is cancelled when the pipe is.
    ///
    /// Cancelling the returned token does not cancel the pipe.
    pub fn context(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn state(&self) -> PipeState {
        *self.inner.state.lock()
    }

    /// Registered plugins, in registration order. Empty once stopped.
    ///
    /// Safe to call from inside [`Plugin::process`](crate::Plugin::process).
    pub fn plugins(&self) -> Vec<BoxedPlugin> {
        self.inner.snapshot.read().clone()
    }

    pub fn is_plugin_registered(&self, name: &str) -> bool {
        self.inner
            .snapshot
            .read()
            .iter()
            .any(|plugin| plugin.info().name == name)
    }
}

impl fmt::Debug for MessagePipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePipe")
            .field("state", &self.state())
            .field("plugins", &plugin_names(&self.inner.snapshot.read()))
            .finish()
    }
}

fn build_bus(
    capacity: usize,
    plugins: &[BoxedPlugin],
    subscriptions: &HashMap<String, Vec<String>>,
) -> PipeResult<MessageBus> {
    let mut bus = MessageBus::new(capacity);
    for plugin in plugins {
        let topics = subscriptions.get(&plugin.info().name).into_iter().flatten();
        for topic in topics {
            bus.subscribe(topic.clone(), plugin.clone())?;
        }
    }
    Ok(bus)
}

fn plugin_names(plugins: &[BoxedPlugin]) -> Vec<String> {
    plugins.iter().map(|plugin| plugin.info().name).collect()
}
