//! NGINX Agent Runtime - configuration, logging and orchestration.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`ConfigLoader`])
//! - Logging setup ([`LoggingBuilder`])
//! - The [`AgentRuntime`] that registers the core plugins on a message pipe
//!   and drives it until shutdown
//!
//! ```ignore
//! use nginx_agent_runtime::AgentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AgentRuntime::builder().build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{AgentConfig, ConfigError, ConfigLoader, ConfigResult, LogLevel};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{AgentRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Commonly used logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
