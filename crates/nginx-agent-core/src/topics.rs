//! Well-known topics.
//!
//! Subscriptions use exact topics. Because [`Message::matches`] is a literal
//! prefix, `NGINX_CONFIG_APPLY` also matches `NGINX_CONFIG_APPLY_SUCCEEDED`.
//!
//! [`Message::matches`]: crate::Message::matches

// ===== Agent =====

pub const AGENT_STARTED: &str = "agent.started";

// ===== NGINX config apply =====

/// Request to apply a configuration. Payload: [`Payload::ConfigApply`].
///
/// [`Payload::ConfigApply`]: crate::Payload::ConfigApply
pub const NGINX_CONFIG_APPLY: &str = "nginx.config.apply";
pub const NGINX_CONFIG_VALIDATION_PENDING: &str = "nginx.config.validation.pending";
pub const NGINX_CONFIG_VALIDATION_SUCCEEDED: &str = "nginx.config.validation.succeeded";
pub const NGINX_CONFIG_VALIDATION_FAILED: &str = "nginx.config.validation.failed";
pub const NGINX_CONFIG_APPLY_SUCCEEDED: &str = "nginx.config.apply.succeeded";
pub const NGINX_CONFIG_APPLY_FAILED: &str = "nginx.config.apply.failed";
pub const CONFIG_ROLLBACK_RESPONSE: &str = "config.rollback.response";
pub const NGINX_RELOAD_COMPLETE: &str = "nginx.reload.complete";

// ===== NGINX instances =====

/// Instances known to the agent. Payload: [`Payload::Instances`].
///
/// [`Payload::Instances`]: crate::Payload::Instances
pub const NGINX_INSTANCES_FOUND: &str = "nginx.instances.found";
/// Replaces the known instances. Payload: [`Payload::Instances`].
///
/// [`Payload::Instances`]: crate::Payload::Instances
pub const NGINX_DETAILS_UPDATE: &str = "nginx.details.update";

// ===== Misc =====

/// Turns the file watcher on or off. Payload: [`Payload::Flag`].
///
/// [`Payload::Flag`]: crate::Payload::Flag
pub const FILE_WATCHER_ENABLED: &str = "file.watcher.enabled";

/// Files under a watched directory changed on disk. Payload: [`Payload::None`].
///
/// [`Payload::None`]: crate::Payload::None
pub const DATAPLANE_FILES_CHANGED: &str = "data.plane.files.changed";

/// Asks the extensions plugin to register an extension. Payload: [`Payload::Text`].
///
/// [`Payload::Text`]: crate::Payload::Text
pub const ENABLE_EXTENSION: &str = "extension.enable";

/// Agent events for the control plane. Payload: [`Payload::Event`].
///
/// [`Payload::Event`]: crate::Payload::Event
pub const EVENTS: &str = "events";
