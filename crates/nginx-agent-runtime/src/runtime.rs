//! Agent runtime: wires the core plugins to a message pipe and drives it.
//!
//! ```rust,ignore
//! use nginx_agent_runtime::AgentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AgentRuntime::builder()
//!         .config_file("/etc/nginx-agent/nginx-agent.toml")
//!         .build()?;
//!
//!     // Runs until Ctrl+C or SIGTERM.
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Startup order:
//!
//! 1. the `nginx`, `activity-events`, `extensions` and `file-watcher`
//!    plugins and any plugins added with [`RuntimeBuilder::plugin`] are
//!    registered;
//! 2. the dispatch loop starts on its own task;
//! 3. `agent.started` is published, then one `extension.enable` message per
//!    configured extension.
//!
//! On shutdown the root token is cancelled and the dispatch task is awaited,
//! so every plugin has been closed when [`AgentRuntime::run`] returns.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use nginx_agent_core::{BoxedPlugin, CancellationToken, Message, MessagePipe, topics};
use nginx_agent_plugins::{
    CommandRunner, Events, ExtensionFactory, Extensions, FileWatcher, Nginx, NginxBinary,
    NginxCommand, Signaller, SystemCommandRunner, SystemSignaller,
};
use nginx_agent_sdk::AllowedDirectories;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ConfigLoader};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// A configured agent, ready to run once.
pub struct AgentRuntime {
    config: AgentConfig,
    token: CancellationToken,
    pipe: MessagePipe,
    plugins: Vec<BoxedPlugin>,
}

impl AgentRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds a runtime with the default plugins and host command runner.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(config: AgentConfig) -> Self {
        RuntimeBuilder::new().into_runtime(config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Handle to the pipe, for publishing messages from outside a plugin.
    pub fn pipe(&self) -> MessagePipe {
        self.pipe.clone()
    }

    /// Root token. Cancelling it stops the runtime.
    pub fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        let signals = shutdown_signal()?;
        info!("NGINX agent is running. Press Ctrl+C to stop.");
        self.run_until(signals).await
    }

    /// Runs until `shutdown` completes or the root token is cancelled.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            token,
            pipe,
            plugins,
        } = self;

        pipe.register(config.pipe.bus_size, plugins).await?;

        let mut dispatch = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.run().await }
        });

        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        info!(version = %version, "NGINX agent started");
        pipe.process([Message::new(topics::AGENT_STARTED, version)])
            .await;
        pipe.process(
            config
                .extensions
                .iter()
                .map(|name| Message::new(topics::ENABLE_EXTENSION, name.as_str())),
        )
        .await;

        let early_exit = tokio::select! {
            () = shutdown => None,
            () = token.cancelled() => None,
            result = &mut dispatch => Some(result),
        };

        let result = match early_exit {
            Some(result) => {
                warn!("Dispatch task exited before shutdown");
                result
            }
            None => {
                info!("Shutting down NGINX agent");
                token.cancel();
                dispatch.await
            }
        };
        token.cancel();

        result??;
        info!("NGINX agent stopped");
        Ok(())
    }
}

/// Resolves on the first Ctrl+C or SIGTERM.
fn shutdown_signal() -> RuntimeResult<impl Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(RuntimeError::Signal)?;

    Ok(async move {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(err) => warn!(error = %err, "Unable to listen for Ctrl+C"),
            }
        }
    })
}

fn system_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string(Path::new("/etc/hostname"))
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`AgentRuntime`].
///
/// ```rust,ignore
/// let runtime = AgentRuntime::builder()
///     .config_file("nginx-agent.toml")
///     .extension("metrics", || Arc::new(Metrics::new()))
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    runner: Arc<dyn CommandRunner>,
    signaller: Arc<dyn Signaller>,
    plugins: Vec<BoxedPlugin>,
    extensions: Vec<(String, ExtensionFactory)>,
    init_logging: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            runner: Arc::new(SystemCommandRunner),
            signaller: Arc::new(SystemSignaller),
            plugins: Vec::new(),
            extensions: Vec::new(),
            init_logging: true,
        }
    }

    /// Loads this file instead of searching for one.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Replaces the whole loader.
    pub fn config_loader(mut self, loader: ConfigLoader) -> Self {
        self.config_loader = loader;
        self
    }

    /// Runs `nginx -t` through `runner` instead of the host.
    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sends reload signals through `signaller` instead of `kill(2)`.
    pub fn signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Registers `plugin` next to the core plugins.
    pub fn plugin(mut self, plugin: BoxedPlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Makes an extension available to `extension.enable`.
    pub fn extension<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> BoxedPlugin + Send + Sync + 'static,
    {
        self.extensions.push((name.into(), Arc::new(factory)));
        self
    }

    /// Leaves the global tracing subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(mut self) -> RuntimeResult<AgentRuntime> {
        let loader = std::mem::take(&mut self.config_loader);
        let config = loader.load()?;
        Ok(self.into_runtime(config))
    }

    fn into_runtime(self, config: AgentConfig) -> AgentRuntime {
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let binary = NginxCommand::new(
            self.runner,
            AllowedDirectories::new(&config.nginx.allowed_directories),
        )
        .with_signaller(self.signaller)
        .with_treat_warnings_as_errors(config.nginx.treat_warnings_as_errors);
        let instances = config.nginx.instance_details();
        debug!(count = instances.len(), "Configured NGINX instances");
        binary.update_details(instances);

        let nginx =
            Nginx::new(Arc::new(binary)).with_validation_timeout(config.nginx.validation_timeout());

        let hostname = config.hostname.clone().unwrap_or_else(system_hostname);
        let events = Events::new(hostname);

        let extensions = self
            .extensions
            .into_iter()
            .fold(Extensions::new(config.pipe.bus_size), |ext, (name, factory)| {
                ext.with_extension(name, move || factory())
            });

        let file_watcher = FileWatcher::new(config.nginx.allowed_directories.iter().cloned());

        let mut plugins: Vec<BoxedPlugin> = vec![
            Arc::new(nginx),
            Arc::new(events),
            Arc::new(extensions),
            Arc::new(file_watcher),
        ];
        plugins.extend(self.plugins);

        let token = CancellationToken::new();
        let pipe = MessagePipe::new(&token, config.pipe.queue_size);

        info!(
            log_level = %config.logging.level,
            queue_size = config.pipe.queue_size,
            bus_size = config.pipe.bus_size,
            "Runtime initialized from configuration"
        );

        AgentRuntime {
            config,
            token,
            pipe,
            plugins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use parking_lot::Mutex;

    use nginx_agent_core::{
        ActivityState, ConfigApplyRequest, Info, Payload, Plugin, PipeState, async_trait,
    };
    use nginx_agent_plugins::{CommandOutput, NginxResult};
    use nginx_agent_sdk::{ConfigFile, NginxConfig};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::config::InstanceConfig;

    const WAIT: Duration = Duration::from_secs(30);

    /// Succeeds at everything and remembers the programs it ran.
    #[derive(Default)]
    struct OkRunner {
        programs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for OkRunner {
        async fn run(&self, program: &str, _args: &[String]) -> NginxResult<CommandOutput> {
            self.programs.lock().push(program.to_string());
            Ok(CommandOutput::success("", ""))
        }
    }

    impl Signaller for OkRunner {
        fn hangup(&self, pid: u32) -> NginxResult<()> {
            self.programs.lock().push(format!("SIGHUP {pid}"));
            Ok(())
        }
    }

    /// Forwards every message on its topics to a channel.
    struct Tap {
        name: &'static str,
        topics: Vec<String>,
        sender: mpsc::UnboundedSender<Message>,
    }

    impl Tap {
        fn new(name: &'static str, topics: &[&str]) -> (BoxedPlugin, mpsc::UnboundedReceiver<Message>) {
            let (sender, receiver) = mpsc::unbounded_channel();
            let tap = Self {
                name,
                topics: topics.iter().map(|t| t.to_string()).collect(),
                sender,
            };
            (Arc::new(tap), receiver)
        }
    }

    #[async_trait]
    impl Plugin for Tap {
        async fn init(&self, _pipe: MessagePipe) {}

        async fn process(&self, message: &Message) {
            let _ = self.sender.send(message.clone());
        }

        async fn close(&self) {}

        fn info(&self) -> Info {
            Info::new(self.name, "v0.0.1")
        }

        fn subscriptions(&self) -> Vec<String> {
            self.topics.clone()
        }
    }

    fn builder(runner: Arc<OkRunner>) -> RuntimeBuilder {
        RuntimeBuilder::new()
            .without_logging()
            .command_runner(runner.clone())
            .signaller(runner)
    }

    async fn next_on(receiver: &mut mpsc::UnboundedReceiver<Message>, topic: &str) -> Message {
        timeout(WAIT, async {
            loop {
                match receiver.recv().await {
                    Some(message) if message.exact(topic) => return message,
                    Some(_) => continue,
                    None => panic!("tap closed before {topic}"),
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_agent_started_event() {
        let (tap, mut events) = Tap::new("tap", &[topics::EVENTS]);
        let config = AgentConfig {
            hostname: Some("edge-1".into()),
            ..Default::default()
        };
        let runtime = builder(Arc::default()).plugin(tap).into_runtime(config);
        let pipe = runtime.pipe();

        runtime
            .run_until(async move {
                let message = next_on(&mut events, topics::EVENTS).await;
                let event = message.data().as_event().unwrap();
                assert!(event.message.starts_with("nginx-agent v"));
                assert!(event.message.contains("started on edge-1"));
            })
            .await
            .unwrap();

        assert_eq!(pipe.state(), PipeState::Stopped);
        assert!(pipe.plugins().is_empty());
    }

    #[tokio::test]
    async fn configured_extensions_are_enabled() {
        let config = AgentConfig {
            extensions: vec!["echo".into()],
            ..Default::default()
        };
        let runtime = builder(Arc::default())
            .extension("echo", || Tap::new("echo", &[]).0)
            .into_runtime(config);
        let pipe = runtime.pipe();

        runtime
            .run_until({
                let pipe = pipe.clone();
                async move {
                    timeout(WAIT, async {
                        while !pipe.is_plugin_registered("echo") {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                    })
                    .await
                    .unwrap();
                }
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn applies_config_end_to_end() {
        let dir = TempDir::new().unwrap();
        let conf_path = dir.path().join("nginx.conf");
        fs::write(&conf_path, "events {}\n").unwrap();

        let instance = InstanceConfig {
            process_id: 4242,
            process_path: "/usr/sbin/nginx".into(),
            conf_path: conf_path.clone(),
            prefix: dir.path().to_path_buf(),
            version: "1.25.3".into(),
        };
        let nginx_id = instance.nginx_id();
        let mut config = AgentConfig::default();
        config.nginx.allowed_directories = vec![dir.path().to_path_buf()];
        config.nginx.instances = vec![instance];

        let runner = Arc::new(OkRunner::default());
        let (tap, mut outcomes) = Tap::new("tap", &[topics::NGINX_CONFIG_APPLY_SUCCEEDED]);
        let runtime = builder(runner.clone()).plugin(tap).into_runtime(config);
        let pipe = runtime.pipe();

        let request = ConfigApplyRequest::new(
            "corr-1",
            NginxConfig {
                nginx_id: nginx_id.clone(),
                files: vec![ConfigFile::new("nginx.conf", "events {}\nhttp {}\n")],
                ..Default::default()
            },
        );

        runtime
            .run_until(async move {
                pipe.process([Message::new(topics::NGINX_CONFIG_APPLY, request)])
                    .await;
                let message = next_on(&mut outcomes, topics::NGINX_CONFIG_APPLY_SUCCEEDED).await;
                match message.data() {
                    Payload::Activity(status) => {
                        assert_eq!(status.correlation_id, "corr-1");
                        assert_eq!(status.nginx_id, nginx_id);
                        assert_eq!(status.state, ActivityState::Ok);
                    }
                    other => panic!("unexpected payload: {other:?}"),
                }
            })
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(&conf_path).unwrap(),
            "events {}\nhttp {}\n"
        );
        assert_eq!(
            *runner.programs.lock(),
            vec!["/usr/sbin/nginx".to_string(), "SIGHUP 4242".to_string()]
        );
    }

    #[tokio::test]
    async fn cancelling_the_context_stops_the_runtime() {
        let runtime = builder(Arc::default()).into_runtime(AgentConfig::default());
        let token = runtime.context();
        let pipe = runtime.pipe();

        token.cancel();
        runtime.run_until(std::future::pending()).await.unwrap();

        assert_eq!(pipe.state(), PipeState::Stopped);
    }
}
