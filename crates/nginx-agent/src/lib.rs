//! # NGINX Agent
//!
//! A host agent that receives NGINX configuration, writes it inside a
//! transaction, validates it with `nginx -t` and reloads the instance, rolling
//! back to the previous files when anything fails.
//!
//! ## Architecture
//!
//! Every component is a plugin on a single message pipe:
//!
//! ```text
//! ┌──────────────┐  process  ┌───────────────┐  publish  ┌──────────────────────┐
//! │ producers    │──────────▶│ bounded queue │──────────▶│ MessageBus           │
//! │ (any task)   │           │ (MessagePipe) │           │  topic → [plugins]   │
//! └──────────────┘           └───────────────┘           └──────────────────────┘
//!                                                          │ nginx            │
//!                                                          │ activity-events  │
//!                                                          │ extensions       │
//! ```
//!
//! - **Core**: messages, topics, the bus and the pipe
//! - **SDK**: config payload model and the config-apply transaction
//! - **Plugins**: the NGINX config-apply, events and extensions plugins
//! - **Runtime**: configuration, logging and the [`AgentRuntime`](prelude::AgentRuntime)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nginx_agent::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AgentRuntime::builder()
//!         .config_file("/etc/nginx-agent/nginx-agent.toml")
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub mod cli;

pub use nginx_agent_core as core;
pub use nginx_agent_plugins as plugins;
pub use nginx_agent_runtime as runtime;
pub use nginx_agent_sdk as sdk;

/// Commonly used types for embedding the agent or writing plugins.
///
/// ```rust,ignore
/// use nginx_agent::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use nginx_agent_runtime::{AgentConfig, AgentRuntime, ConfigLoader, RuntimeBuilder};

    // Plugin system
    pub use nginx_agent_core::{
        BoxedPlugin, CancellationToken, Info, Message, MessagePipe, Payload, Plugin, async_trait,
        topics,
    };

    // Payloads
    pub use nginx_agent_core::{ActivityState, ActivityStatus, AgentEvent, ConfigApplyRequest};
    pub use nginx_agent_sdk::{ConfigFile, Directory, FileEntry, NginxConfig, NginxDetails};
}
