//! Typed message payloads.
//!
//! Every topic family carries its own [`Payload`] variant, so subscribers
//! pattern-match on the data instead of downcasting it.
//!
//! # Example
//!
//! ```rust,ignore
//! use nginx_agent_core::{Message, Payload, topics};
//!
//! match message.data() {
//!     Payload::ConfigApply(request) => apply(request).await,
//!     Payload::Flag(enabled) => toggle(*enabled),
//!     _ => {}
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nginx_agent_sdk::{ConfigApply, NginxConfig, NginxDetails};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ===== Payload =====

/// Data carried by a [`Message`](crate::Message).
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Flag(bool),
    Text(String),
    Json(serde_json::Value),
    /// Request to apply a configuration to an instance.
    ConfigApply(Arc<ConfigApplyRequest>),
    /// Result of `nginx -t`, carrying the open transaction.
    Validation(Arc<ValidationOutcome>),
    Rollback(RollbackOutcome),
    Reload(ReloadOutcome),
    Activity(ActivityStatus),
    Event(AgentEvent),
    Instances(Arc<Vec<NginxDetails>>),
}

impl Payload {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&AgentEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl From<bool> for Payload {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<ConfigApplyRequest> for Payload {
    fn from(request: ConfigApplyRequest) -> Self {
        Self::ConfigApply(Arc::new(request))
    }
}

impl From<ValidationOutcome> for Payload {
    fn from(outcome: ValidationOutcome) -> Self {
        Self::Validation(Arc::new(outcome))
    }
}

impl From<RollbackOutcome> for Payload {
    fn from(outcome: RollbackOutcome) -> Self {
        Self::Rollback(outcome)
    }
}

impl From<ReloadOutcome> for Payload {
    fn from(outcome: ReloadOutcome) -> Self {
        Self::Reload(outcome)
    }
}

impl From<ActivityStatus> for Payload {
    fn from(status: ActivityStatus) -> Self {
        Self::Activity(status)
    }
}

impl From<AgentEvent> for Payload {
    fn from(event: AgentEvent) -> Self {
        Self::Event(event)
    }
}

// ===== Config apply =====

/// A configuration pushed by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigApplyRequest {
    pub correlation_id: String,
    pub config: NginxConfig,
}

impl ConfigApplyRequest {
    pub fn new(correlation_id: impl Into<String>, config: NginxConfig) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            config,
        }
    }
}

/// Outcome of validating a written configuration.
///
/// The transaction that wrote the files travels with the outcome; exactly
/// one subscriber takes it with [`take_apply`](Self::take_apply) and
/// terminates it.
#[derive(Debug)]
pub struct ValidationOutcome {
    pub correlation_id: String,
    pub details: NginxDetails,
    pub elapsed: Duration,
    /// `None` when validation passed.
    pub error: Option<String>,
    apply: Mutex<Option<ConfigApply>>,
}

impl ValidationOutcome {
    pub fn new(
        correlation_id: impl Into<String>,
        details: NginxDetails,
        apply: ConfigApply,
        elapsed: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            details,
            elapsed,
            error,
            apply: Mutex::new(Some(apply)),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Takes the transaction out. Later calls return `None`.
    pub fn take_apply(&self) -> Option<ConfigApply> {
        self.apply.lock().take()
    }
}

/// Whether a rollback put the previous configuration back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub correlation_id: String,
    pub details: NginxDetails,
    pub succeeded: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RollbackOutcome {
    pub fn new(
        correlation_id: impl Into<String>,
        details: NginxDetails,
        succeeded: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            details,
            succeeded,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Whether NGINX accepted the reload signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub correlation_id: String,
    pub details: NginxDetails,
    pub succeeded: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ReloadOutcome {
    pub fn new(
        correlation_id: impl Into<String>,
        details: NginxDetails,
        succeeded: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            details,
            succeeded,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// ===== Activity =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Pending,
    Ok,
    Error,
}

/// Progress report for a config apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatus {
    pub correlation_id: String,
    pub nginx_id: String,
    pub state: ActivityState,
    pub message: String,
}

impl ActivityStatus {
    pub fn new(
        correlation_id: impl Into<String>,
        nginx_id: impl Into<String>,
        state: ActivityState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            nginx_id: nginx_id.into(),
            state,
            message: message.into(),
        }
    }
}

// ===== Events =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(level)
    }
}

/// An event reported to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub level: EventLevel,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(level: EventLevel, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            category: category.into(),
            message: message.into(),
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.correlation_id = (!id.is_empty()).then_some(id);
        self
    }
}
