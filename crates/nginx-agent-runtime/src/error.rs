//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while starting or running the agent.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Registering plugins on the pipe failed.
    #[error("Plugin registration failed: {0}")]
    Pipe(#[from] nginx_agent_core::PipeError),

    /// The dispatch task panicked or was aborted.
    #[error("Dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Installing a shutdown signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
