//! The plugin capability interface.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::Message;
use crate::pipe::MessagePipe;

/// Name and version of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Info {
    pub name: String,
    pub version: String,
}

impl Info {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A unit of behaviour wired to the [`MessagePipe`].
///
/// The pipe calls [`init`](Plugin::init) once before dispatching anything,
/// [`process`](Plugin::process) for every message on a subscribed topic and
/// [`close`](Plugin::close) once on shutdown or deregistration.
///
/// `process` runs on the single dispatch task: while it is awaited no other
/// plugin sees a message. Long work belongs on a spawned task that reports
/// back through [`MessagePipe::process`].
///
/// # Example
///
/// ```rust,ignore
/// struct Echo { pipe: OnceLock<MessagePipe> }
///
/// #[async_trait]
/// impl Plugin for Echo {
///     async fn init(&self, pipe: MessagePipe) { let _ = self.pipe.set(pipe); }
///     async fn process(&self, message: &Message) { info!(topic = message.topic(), "echo"); }
///     async fn close(&self) {}
///     fn info(&self) -> Info { Info::new("echo", "v1") }
///     fn subscriptions(&self) -> Vec<String> { vec!["test.echo".into()] }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    async fn init(&self, pipe: MessagePipe);

    async fn process(&self, message: &Message);

    async fn close(&self);

    fn info(&self) -> Info;

    /// Topics this plugin receives. Read once, at registration.
    fn subscriptions(&self) -> Vec<String>;
}

/// Shared handle to a plugin.
pub type BoxedPlugin = Arc<dyn Plugin>;
