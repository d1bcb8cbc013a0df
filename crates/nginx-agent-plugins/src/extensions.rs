//! Registers optional plugins on demand.
//!
//! A message on [`topics::ENABLE_EXTENSION`] names an extension; if it is
//! known and not yet registered, its factory builds the plugin and the pipe
//! registers it. Registration runs on a spawned task: `process` is called
//! with the dispatch lock held and [`MessagePipe::register`] needs it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use nginx_agent_core::{
    BoxedPlugin, Info, Message, MessagePipe, Payload, Plugin, async_trait, topics,
};
use tracing::{debug, info, warn};

pub const EXTENSIONS_PLUGIN_NAME: &str = "extensions";

/// Builds a fresh extension plugin.
///
/// The plugin's [`Info::name`] should equal the extension name it is
/// registered under; that name is how duplicates are detected.
pub type ExtensionFactory = Arc<dyn Fn() -> BoxedPlugin + Send + Sync>;

pub struct Extensions {
    factories: BTreeMap<String, ExtensionFactory>,
    bus_size: usize,
    pipe: OnceLock<MessagePipe>,
}

impl Extensions {
    /// `bus_size` is passed to [`MessagePipe::register`].
    pub fn new(bus_size: usize) -> Self {
        Self {
            factories: BTreeMap::new(),
            bus_size,
            pipe: OnceLock::new(),
        }
    }

    pub fn with_extension<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> BoxedPlugin + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Names of the extensions this plugin can enable.
    pub fn available(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    fn enable(&self, pipe: &MessagePipe, name: &str) {
        if pipe.is_plugin_registered(name) {
            debug!(extension = name, "extension already registered");
            return;
        }
        let Some(factory) = self.factories.get(name) else {
            warn!(extension = name, "unknown extension");
            return;
        };

        let plugin = factory();
        let plugin_name = plugin.info().name;
        if plugin_name != name {
            warn!(extension = name, plugin = %plugin_name, "extension plugin name differs from extension");
        }

        let pipe = pipe.clone();
        let bus_size = self.bus_size;
        let extension = name.to_string();
        tokio::spawn(async move {
            match pipe.register(bus_size, vec![plugin]).await {
                Ok(()) => info!(extension = %extension, "extension registered"),
                Err(err) => warn!(extension = %extension, error = %err, "unable to register extension"),
            }
        });
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("available", &self.available().collect::<Vec<_>>())
            .field("bus_size", &self.bus_size)
            .finish()
    }
}

#[async_trait]
impl Plugin for Extensions {
    async fn init(&self, pipe: MessagePipe) {
        info!(available = ?self.available().collect::<Vec<_>>(), "extensions plugin initializing");
        if self.pipe.set(pipe).is_err() {
            warn!("extensions plugin initialized twice");
        }
    }

    async fn process(&self, message: &Message) {
        let (topics::ENABLE_EXTENSION, Payload::Text(name)) = (message.topic(), message.data())
        else {
            warn!(topic = message.topic(), data = ?message.data(), "invalid message received");
            return;
        };
        if let Some(pipe) = self.pipe.get() {
            self.enable(pipe, name);
        }
    }

    async fn close(&self) {
        info!("extensions plugin is wrapping up");
    }

    fn info(&self) -> Info {
        Info::new(EXTENSIONS_PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![topics::ENABLE_EXTENSION.to_string()]
    }
}
