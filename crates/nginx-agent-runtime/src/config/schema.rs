//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nginx_agent_core::{DEFAULT_BUS_SIZE, DEFAULT_QUEUE_SIZE};
use nginx_agent_sdk::{NginxDetails, generate_id};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name reported on activity events. Defaults to the system hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipe: PipeConfig,

    #[serde(default)]
    pub nginx: NginxSettings,

    /// Extensions to enable once the agent has started.
    #[serde(default)]
    pub extensions: Vec<String>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [Self; 5] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "warning" => Ok(Self::Warn),
            other => Self::ALL
                .into_iter()
                .find(|level| level.as_str() == other)
                .ok_or_else(|| ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Newline-delimited JSON. Needs the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Appends to `logging.file_path`.
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output` is `file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `nginx_agent_core = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file name and line number.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,
}

// =============================================================================
// Pipe
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Depth of the inbound message queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum number of (topic, plugin) subscriptions.
    #[serde(default = "default_bus_size")]
    pub bus_size: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            bus_size: default_bus_size(),
        }
    }
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_bus_size() -> usize {
    DEFAULT_BUS_SIZE
}

// =============================================================================
// NGINX
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NginxSettings {
    /// Absolute directories the agent may write to or delete from.
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,

    /// Upper bound on one `nginx -t` run.
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,

    /// Fail validation when `nginx -t` prints warnings.
    #[serde(default)]
    pub treat_warnings_as_errors: bool,

    /// Instances managed by this agent.
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            allowed_directories: Vec::new(),
            validation_timeout_secs: default_validation_timeout_secs(),
            treat_warnings_as_errors: false,
            instances: Vec::new(),
        }
    }
}

impl NginxSettings {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn instance_details(&self) -> Vec<NginxDetails> {
        self.instances.iter().map(InstanceConfig::details).collect()
    }
}

fn default_validation_timeout_secs() -> u64 {
    30
}

/// A statically configured NGINX instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Master process id, the target of reload signals.
    pub process_id: u32,

    #[serde(default = "default_process_path")]
    pub process_path: PathBuf,

    #[serde(default = "default_conf_path")]
    pub conf_path: PathBuf,

    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,

    #[serde(default)]
    pub version: String,
}

impl InstanceConfig {
    /// Instance id derived from binary, config and prefix paths.
    pub fn nginx_id(&self) -> String {
        let process_path = self.process_path.to_string_lossy();
        let conf_path = self.conf_path.to_string_lossy();
        let prefix = self.prefix.to_string_lossy();
        generate_id("%s_%s_%s", &[&*process_path, &*conf_path, &*prefix])
    }

    pub fn details(&self) -> NginxDetails {
        NginxDetails {
            nginx_id: self.nginx_id(),
            process_id: self.process_id,
            process_path: self.process_path.clone(),
            conf_path: self.conf_path.clone(),
            prefix: self.prefix.clone(),
            version: self.version.clone(),
        }
    }
}

fn default_process_path() -> PathBuf {
    PathBuf::from("/usr/sbin/nginx")
}

fn default_conf_path() -> PathBuf {
    PathBuf::from("/etc/nginx/nginx.conf")
}

fn default_prefix() -> PathBuf {
    PathBuf::from("/etc/nginx")
}
