//! Turns activity on the pipe into [`AgentEvent`]s for the control plane.

use std::sync::OnceLock;

use nginx_agent_core::{
    ActivityState, ActivityStatus, AgentEvent, EventLevel, Info, Message, MessagePipe, Payload,
    Plugin, ReloadOutcome, RollbackOutcome, async_trait, topics,
};
use nginx_agent_sdk::{NginxDetails, format_template};
use tracing::{debug, info, warn};

pub const EVENTS_PLUGIN_NAME: &str = "activity-events";

pub const STATUS_CATEGORY: &str = "STATUS";
pub const CONFIG_CATEGORY: &str = "CONFIG";

const AGENT_START_MESSAGE: &str = "nginx-agent %s started on %s with pid %s";
const NGINX_FOUND_MESSAGE: &str = "nginx-v%s master process was found with a pid %s";
const NGINX_RELOAD_SUCCESS_MESSAGE: &str = "nginx-v%s master process (pid: %s) reloaded successfully";
const NGINX_RELOAD_FAILED_MESSAGE: &str = "nginx-v%s master process (pid: %s) failed to reload";
const CONFIG_APPLY_SUCCESS_MESSAGE: &str = "successfully applied config on %s";
const CONFIG_APPLY_FAILURE_MESSAGE: &str = "failed to apply nginx config on %s";
const CONFIG_ROLLBACK_SUCCESS_MESSAGE: &str = "nginx config was rolled back on %s";
const CONFIG_ROLLBACK_FAILURE_MESSAGE: &str = "failed to rollback nginx config on %s";

pub struct Events {
    hostname: String,
    pipe: OnceLock<MessagePipe>,
}

impl Events {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            pipe: OnceLock::new(),
        }
    }

    fn agent_started(&self, version: &str) -> AgentEvent {
        let pid = std::process::id().to_string();
        AgentEvent::new(
            EventLevel::Info,
            STATUS_CATEGORY,
            format_template(AGENT_START_MESSAGE, &[version, &self.hostname, &pid]),
        )
    }

    fn config_applied(&self, status: &ActivityStatus) -> AgentEvent {
        let (level, template) = match status.state {
            ActivityState::Error => (EventLevel::Error, CONFIG_APPLY_FAILURE_MESSAGE),
            ActivityState::Ok | ActivityState::Pending => {
                (EventLevel::Info, CONFIG_APPLY_SUCCESS_MESSAGE)
            }
        };
        AgentEvent::new(
            level,
            CONFIG_CATEGORY,
            format_template(template, &[&self.hostname]),
        )
        .with_correlation_id(&status.correlation_id)
    }

    fn rolled_back(&self, outcome: &RollbackOutcome) -> AgentEvent {
        let (level, template) = if outcome.succeeded {
            (EventLevel::Warn, CONFIG_ROLLBACK_SUCCESS_MESSAGE)
        } else {
            (EventLevel::Error, CONFIG_ROLLBACK_FAILURE_MESSAGE)
        };
        let mut event = AgentEvent::new(
            level,
            CONFIG_CATEGORY,
            format_template(template, &[&self.hostname]),
        )
        .with_correlation_id(&outcome.correlation_id);
        event.timestamp = outcome.timestamp;
        event
    }

    fn events_for(&self, message: &Message) -> Option<Vec<AgentEvent>> {
        let events = match (message.topic(), message.data()) {
            (topics::AGENT_STARTED, Payload::Text(version)) => vec![self.agent_started(version)],
            (topics::NGINX_INSTANCES_FOUND, Payload::Instances(instances)) => {
                instances.iter().map(nginx_found).collect()
            }
            (topics::NGINX_RELOAD_COMPLETE, Payload::Reload(outcome)) => vec![reloaded(outcome)],
            (
                topics::NGINX_CONFIG_APPLY_SUCCEEDED | topics::NGINX_CONFIG_APPLY_FAILED,
                Payload::Activity(status),
            ) => vec![self.config_applied(status)],
            (topics::CONFIG_ROLLBACK_RESPONSE, Payload::Rollback(outcome)) => {
                vec![self.rolled_back(outcome)]
            }
            _ => return None,
        };
        Some(events)
    }
}

fn nginx_found(details: &NginxDetails) -> AgentEvent {
    let pid = details.process_id.to_string();
    AgentEvent::new(
        EventLevel::Info,
        STATUS_CATEGORY,
        format_template(NGINX_FOUND_MESSAGE, &[&details.version, &pid]),
    )
}

fn reloaded(outcome: &ReloadOutcome) -> AgentEvent {
    // A successful reload is reported at warn level.
    let (level, template) = if outcome.succeeded {
        (EventLevel::Warn, NGINX_RELOAD_SUCCESS_MESSAGE)
    } else {
        (EventLevel::Error, NGINX_RELOAD_FAILED_MESSAGE)
    };
    let pid = outcome.details.process_id.to_string();
    let mut event = AgentEvent::new(
        level,
        STATUS_CATEGORY,
        format_template(template, &[&outcome.details.version, &pid]),
    )
    .with_correlation_id(&outcome.correlation_id);
    event.timestamp = outcome.timestamp;
    event
}

#[async_trait]
impl Plugin for Events {
    async fn init(&self, pipe: MessagePipe) {
        info!("events plugin initializing");
        if self.pipe.set(pipe).is_err() {
            warn!("events plugin initialized twice");
        }
    }

    async fn process(&self, message: &Message) {
        let Some(events) = self.events_for(message) else {
            warn!(topic = message.topic(), data = ?message.data(), "invalid message received");
            return;
        };
        let Some(pipe) = self.pipe.get() else {
            return;
        };
        for event in &events {
            debug!(level = %event.level, category = %event.category, message = %event.message, "created event");
        }
        pipe.process(events.into_iter().map(|e| Message::new(topics::EVENTS, e)))
            .await;
    }

    async fn close(&self) {
        info!("events plugin is wrapping up");
    }

    fn info(&self) -> Info {
        Info::new(EVENTS_PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    fn subscriptions(&self) -> Vec<String> {
        [
            topics::AGENT_STARTED,
            topics::NGINX_INSTANCES_FOUND,
            topics::NGINX_RELOAD_COMPLETE,
            topics::NGINX_CONFIG_APPLY_SUCCEEDED,
            topics::NGINX_CONFIG_APPLY_FAILED,
            topics::CONFIG_ROLLBACK_RESPONSE,
        ]
        .map(String::from)
        .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;
    use nginx_agent_core::{BoxedPlugin, CancellationToken};
    use std::sync::Arc;

    fn details() -> NginxDetails {
        NginxDetails {
            nginx_id: "nginx-1".into(),
            process_id: 1234,
            version: "1.25.3".into(),
            ..Default::default()
        }
    }

    async fn events_for(messages: Vec<Message>, expected: usize) -> Vec<AgentEvent> {
        let root = CancellationToken::new();
        let pipe = MessagePipe::new(&root, 10);
        let recorder = Recorder::new("recorder", &[topics::EVENTS]);
        let plugins: Vec<BoxedPlugin> = vec![Arc::new(Events::new("web-01")), recorder.clone()];
        pipe.register(10, plugins).await.unwrap();
        let runner = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.run().await }
        });

        pipe.process(messages).await;
        recorder.expect(expected).await;
        root.cancel();
        runner.await.unwrap().unwrap();
        recorder.events()
    }

    #[tokio::test]
    async fn agent_start_event() {
        let events = events_for(vec![Message::new(topics::AGENT_STARTED, "v2.1.0")], 1).await;

        assert_eq!(events[0].level, EventLevel::Info);
        assert_eq!(events[0].category, STATUS_CATEGORY);
        assert_eq!(
            events[0].message,
            format!("nginx-agent v2.1.0 started on web-01 with pid {}", std::process::id())
        );
    }

    #[tokio::test]
    async fn one_event_per_instance_found() {
        let mut second = details();
        second.process_id = 99;
        let found = Message::new(
            topics::NGINX_INSTANCES_FOUND,
            Payload::Instances(Arc::new(vec![details(), second])),
        );

        let events = events_for(vec![found], 2).await;
        assert_eq!(
            events[0].message,
            "nginx-v1.25.3 master process was found with a pid 1234"
        );
        assert_eq!(
            events[1].message,
            "nginx-v1.25.3 master process was found with a pid 99"
        );
    }

    #[tokio::test]
    async fn reload_levels() {
        let events = events_for(
            vec![
                Message::new(
                    topics::NGINX_RELOAD_COMPLETE,
                    ReloadOutcome::new("c1", details(), true, "ok"),
                ),
                Message::new(
                    topics::NGINX_RELOAD_COMPLETE,
                    ReloadOutcome::new("c2", details(), false, "boom"),
                ),
            ],
            2,
        )
        .await;

        assert_eq!(events[0].level, EventLevel::Warn);
        assert_eq!(
            events[0].message,
            "nginx-v1.25.3 master process (pid: 1234) reloaded successfully"
        );
        assert_eq!(events[0].correlation_id.as_deref(), Some("c1"));
        assert_eq!(events[1].level, EventLevel::Error);
        assert_eq!(
            events[1].message,
            "nginx-v1.25.3 master process (pid: 1234) failed to reload"
        );
    }

    #[tokio::test]
    async fn config_apply_and_rollback_events() {
        let events = events_for(
            vec![
                Message::new(
                    topics::NGINX_CONFIG_APPLY_SUCCEEDED,
                    ActivityStatus::new("c1", "nginx-1", ActivityState::Ok, "applied"),
                ),
                Message::new(
                    topics::NGINX_CONFIG_APPLY_FAILED,
                    ActivityStatus::new("c2", "nginx-1", ActivityState::Error, "failed"),
                ),
                Message::new(
                    topics::CONFIG_ROLLBACK_RESPONSE,
                    RollbackOutcome::new("c2", details(), true, "rolled back"),
                ),
                Message::new(
                    topics::CONFIG_ROLLBACK_RESPONSE,
                    RollbackOutcome::new("c3", details(), false, "stuck"),
                ),
            ],
            4,
        )
        .await;

        let summary: Vec<_> = events
            .iter()
            .map(|e| (e.level, e.category.as_str(), e.message.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                (EventLevel::Info, CONFIG_CATEGORY, "successfully applied config on web-01"),
                (EventLevel::Error, CONFIG_CATEGORY, "failed to apply nginx config on web-01"),
                (EventLevel::Warn, CONFIG_CATEGORY, "nginx config was rolled back on web-01"),
                (EventLevel::Error, CONFIG_CATEGORY, "failed to rollback nginx config on web-01"),
            ]
        );
    }

    #[tokio::test]
    async fn unexpected_payload_is_ignored() {
        let events = events_for(
            vec![
                Message::new(topics::AGENT_STARTED, true),
                Message::new(topics::AGENT_STARTED, "v1"),
            ],
            1,
        )
        .await;
        assert_eq!(events.len(), 1);
    }
}
