//! Error types for NGINX operations.

use std::io;
use std::path::PathBuf;

use nginx_agent_sdk::{ConfigAction, ConfigApplyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NginxError {
    /// The request does not name an instance.
    #[error("no NGINX id in config request")]
    MissingNginxId,

    /// No instance with this id is known.
    #[error("no NGINX instance found for {nginx_id}")]
    UnknownInstance { nginx_id: String },

    /// The instance has no usable master process id.
    #[error("invalid process id {process_id} for NGINX instance {nginx_id}")]
    InvalidProcessId { nginx_id: String, process_id: u32 },

    /// A command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// A signal could not be delivered.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// The request asks for something other than an apply.
    #[error("config action {action:?} is not handled by the nginx plugin")]
    UnsupportedAction { action: ConfigAction },

    /// `nginx -t` rejected the configuration.
    #[error("error running nginx -t -c {}:\n{output}", conf_path.display())]
    ValidationFailed { conf_path: PathBuf, output: String },

    /// `nginx -t` did not finish in time.
    #[error("validation of {} did not finish within {seconds}s", conf_path.display())]
    ValidationTimeout { conf_path: PathBuf, seconds: u64 },

    #[error(transparent)]
    ConfigApply(#[from] ConfigApplyError),
}

impl NginxError {
    pub fn spawn(command: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    pub fn signal(pid: u32, source: io::Error) -> Self {
        Self::Signal { pid, source }
    }
}

/// Result type for NGINX operations.
pub type NginxResult<T> = Result<T, NginxError>;
