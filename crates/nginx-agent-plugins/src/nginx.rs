//! The config-apply plugin.
//!
//! Drives a [`ConfigApply`] transaction across the pipe:
//!
//! ```text
//! nginx.config.apply
//!   ├─ nginx.config.validation.pending
//!   ├─ anything but an apply action ──▶ nginx.config.apply.failed
//!   ├─ file.watcher.enabled = false
//!   ├─ write files ── error ──▶ rollback, config.rollback.response, nginx.config.apply.failed
//!   └─ spawn `nginx -t`
//!        ├─ nginx.config.validation.succeeded ──▶ complete, spawn reload,
//!        │                                         nginx.reload.complete, nginx.config.apply.succeeded
//!        └─ nginx.config.validation.failed    ──▶ rollback, config.rollback.response,
//!                                                  nginx.config.apply.failed
//! ```
//!
//! The file watcher is switched back on whichever way an apply ends.

use std::fmt::Display;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nginx_agent_core::{
    ActivityState, ActivityStatus, ConfigApplyRequest, Info, Message, MessagePipe, Payload, Plugin,
    ReloadOutcome, RollbackOutcome, ValidationOutcome, async_trait, topics,
};
use nginx_agent_sdk::{ConfigAction, ConfigApply, NginxDetails};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::binary::NginxBinary;
use crate::error::NginxError;

pub const NGINX_PLUGIN_NAME: &str = "nginx";

/// Default bound on a single `nginx -t` run.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

const CONFIG_APPLIED: &str = "config applied successfully";

pub struct Nginx {
    binary: Arc<dyn NginxBinary>,
    validation_timeout: Duration,
    pipe: OnceLock<MessagePipe>,
}

impl Nginx {
    pub fn new(binary: Arc<dyn NginxBinary>) -> Self {
        Self {
            binary,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            pipe: OnceLock::new(),
        }
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    async fn emit(&self, messages: Vec<Message>) {
        match self.pipe.get() {
            Some(pipe) => pipe.process(messages).await,
            None => warn!("nginx plugin used before init, dropping messages"),
        }
    }

    async fn set_file_watcher(&self, enabled: bool) {
        debug!(enabled, "toggling file watcher");
        self.emit(vec![Message::new(topics::FILE_WATCHER_ENABLED, enabled)])
            .await;
    }

    async fn apply_failed(&self, correlation_id: &str, nginx_id: &str, message: String) {
        error!(correlation_id, nginx_id, "{message}");
        let status = ActivityStatus::new(correlation_id, nginx_id, ActivityState::Error, message);
        self.emit(vec![Message::new(topics::NGINX_CONFIG_APPLY_FAILED, status)])
            .await;
    }

    async fn apply_config(&self, request: &ConfigApplyRequest) {
        let correlation_id = request.correlation_id.as_str();
        let nginx_id = request.config.nginx_id.as_str();
        info!(correlation_id, nginx_id, "applying config");

        let pending = ActivityStatus::new(
            correlation_id,
            nginx_id,
            ActivityState::Pending,
            "config apply pending",
        );
        self.emit(vec![Message::new(
            topics::NGINX_CONFIG_VALIDATION_PENDING,
            pending,
        )])
        .await;

        if request.config.action != ConfigAction::Apply {
            let err = NginxError::UnsupportedAction {
                action: request.config.action,
            };
            self.apply_failed(correlation_id, nginx_id, failure("preflight", &err))
                .await;
            return;
        }

        if nginx_id.is_empty() {
            let message = failure("preflight", &NginxError::MissingNginxId);
            self.apply_failed(correlation_id, nginx_id, message).await;
            return;
        }

        self.set_file_watcher(false).await;

        let Some(details) = self.binary.details(nginx_id) else {
            let err = NginxError::UnknownInstance {
                nginx_id: nginx_id.to_string(),
            };
            self.apply_failed(correlation_id, nginx_id, failure("preflight", &err))
                .await;
            self.set_file_watcher(true).await;
            return;
        };

        let mut apply = ConfigApply::new();
        if let Err(err) = self
            .binary
            .write_config(&mut apply, &request.config, &details)
        {
            let rollback = roll_back(apply, &err, correlation_id, &details);
            self.emit(vec![Message::new(topics::CONFIG_ROLLBACK_RESPONSE, rollback)])
                .await;
            self.apply_failed(correlation_id, nginx_id, failure("write", &err))
                .await;
            self.set_file_watcher(true).await;
            return;
        }

        let Some(pipe) = self.pipe.get().cloned() else {
            return;
        };
        tokio::spawn(validate(
            self.binary.clone(),
            pipe,
            details,
            correlation_id.to_string(),
            apply,
            self.validation_timeout,
        ));
    }

    async fn complete_config_apply(&self, outcome: &ValidationOutcome) {
        let mut status_message = CONFIG_APPLIED.to_string();
        if let Some(apply) = outcome.take_apply()
            && let Err(err) = apply.complete()
        {
            status_message = format!("Config complete failed: {err}");
            error!(correlation_id = %outcome.correlation_id, "{status_message}");
        }

        self.set_file_watcher(true).await;

        let Some(pipe) = self.pipe.get().cloned() else {
            return;
        };
        tokio::spawn(reload(
            self.binary.clone(),
            pipe,
            outcome.details.clone(),
            outcome.correlation_id.clone(),
            status_message,
        ));
    }

    async fn rollback_config_apply(&self, outcome: &ValidationOutcome) {
        let cause = outcome.error.as_deref().unwrap_or("validation failed");
        let nginx_id = outcome.details.nginx_id.as_str();

        if let Some(apply) = outcome.take_apply() {
            let rollback = roll_back(apply, &cause, &outcome.correlation_id, &outcome.details);
            self.emit(vec![Message::new(topics::CONFIG_ROLLBACK_RESPONSE, rollback)])
                .await;
            self.apply_failed(
                &outcome.correlation_id,
                nginx_id,
                failure("validation", &cause),
            )
            .await;
        }

        self.set_file_watcher(true).await;
    }
}

#[async_trait]
impl Plugin for Nginx {
    async fn init(&self, pipe: MessagePipe) {
        info!("nginx plugin initializing");
        let instances = self.binary.instances();
        pipe.process([Message::new(
            topics::NGINX_INSTANCES_FOUND,
            Payload::Instances(Arc::new(instances)),
        )])
        .await;
        if self.pipe.set(pipe).is_err() {
            warn!("nginx plugin initialized twice");
        }
    }

    async fn process(&self, message: &Message) {
        match (message.topic(), message.data()) {
            (topics::NGINX_CONFIG_APPLY, Payload::ConfigApply(request)) => {
                self.apply_config(request).await;
            }
            (topics::NGINX_CONFIG_VALIDATION_SUCCEEDED, Payload::Validation(outcome)) => {
                self.complete_config_apply(outcome).await;
            }
            (topics::NGINX_CONFIG_VALIDATION_FAILED, Payload::Validation(outcome)) => {
                self.rollback_config_apply(outcome).await;
            }
            (topics::NGINX_DETAILS_UPDATE, Payload::Instances(instances)) => {
                self.binary.update_details(instances.as_ref().clone());
            }
            (topic, data) => warn!(topic, ?data, "invalid message received"),
        }
    }

    async fn close(&self) {
        info!("nginx plugin is wrapping up");
    }

    fn info(&self) -> Info {
        Info::new(NGINX_PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    fn subscriptions(&self) -> Vec<String> {
        [
            topics::NGINX_CONFIG_APPLY,
            topics::NGINX_CONFIG_VALIDATION_SUCCEEDED,
            topics::NGINX_CONFIG_VALIDATION_FAILED,
            topics::NGINX_DETAILS_UPDATE,
        ]
        .map(String::from)
        .to_vec()
    }
}

fn failure(stage: &str, err: &dyn Display) -> String {
    format!("Config apply failed ({stage}): {err}")
}

fn roll_back(
    apply: ConfigApply,
    cause: &dyn Display,
    correlation_id: &str,
    details: &NginxDetails,
) -> RollbackOutcome {
    match apply.rollback(cause) {
        Ok(()) => RollbackOutcome::new(correlation_id, details.clone(), true, "config rolled back"),
        Err(err) => {
            error!(correlation_id, error = %err, "config rollback failed");
            RollbackOutcome::new(
                correlation_id,
                details.clone(),
                false,
                format!("Config rollback failed: {err}"),
            )
        }
    }
}

/// Runs `nginx -t` off the dispatch task and reports the outcome.
async fn validate(
    binary: Arc<dyn NginxBinary>,
    pipe: MessagePipe,
    details: NginxDetails,
    correlation_id: String,
    apply: ConfigApply,
    timeout: Duration,
) {
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, binary.validate_config(&details)).await {
        Ok(result) => result.map(drop),
        Err(_) => Err(NginxError::ValidationTimeout {
            conf_path: details.conf_path.clone(),
            seconds: timeout.as_secs(),
        }),
    };
    let elapsed = start.elapsed();
    trace!(?elapsed, "nginx config validation finished");

    let (topic, error) = match result {
        Ok(()) => (topics::NGINX_CONFIG_VALIDATION_SUCCEEDED, None),
        Err(err) => (topics::NGINX_CONFIG_VALIDATION_FAILED, Some(err.to_string())),
    };
    let outcome = ValidationOutcome::new(correlation_id, details, apply, elapsed, error);
    pipe.process([Message::new(topic, outcome)]).await;
}

/// Reloads NGINX off the dispatch task and reports the outcome.
async fn reload(
    binary: Arc<dyn NginxBinary>,
    pipe: MessagePipe,
    details: NginxDetails,
    correlation_id: String,
    status_message: String,
) {
    let (succeeded, state, message) = match binary.reload(&details).await {
        Ok(()) => (true, ActivityState::Ok, status_message),
        Err(err) => {
            let message = failure("reload", &err);
            error!(correlation_id, "{message}");
            (false, ActivityState::Error, message)
        }
    };

    let nginx_id = details.nginx_id.clone();
    let reloaded = ReloadOutcome::new(&correlation_id, details, succeeded, message.clone());
    let status = ActivityStatus::new(&correlation_id, nginx_id, state, message);
    pipe.process([
        Message::new(topics::NGINX_RELOAD_COMPLETE, reloaded),
        Message::new(topics::NGINX_CONFIG_APPLY_SUCCEEDED, status),
    ])
    .await;
}
