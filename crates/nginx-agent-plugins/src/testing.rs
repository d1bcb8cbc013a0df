//! Test helpers shared by the plugin tests.

use std::sync::Arc;
use std::time::Duration;

use nginx_agent_core::{
    ActivityStatus, AgentEvent, Info, Message, MessagePipe, Payload, Plugin, async_trait,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::error::{NginxError, NginxResult};
use crate::signal::Signaller;

/// Records every message on its topics.
///
/// Flags render as `topic=value`, everything else as the bare topic.
pub(crate) struct Recorder {
    name: &'static str,
    topics: Vec<String>,
    messages: Mutex<Vec<Message>>,
    seen_tx: UnboundedSender<String>,
    seen: tokio::sync::Mutex<UnboundedReceiver<String>>,
}

impl Recorder {
    pub fn new(name: &'static str, topics: &[&str]) -> Arc<Self> {
        let (seen_tx, seen) = unbounded_channel();
        Arc::new(Self {
            name,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            messages: Mutex::default(),
            seen_tx,
            seen: tokio::sync::Mutex::new(seen),
        })
    }

    /// Waits for the next `count` messages.
    pub async fn expect(&self, count: usize) -> Vec<String> {
        let mut seen = self.seen.lock().await;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let next = tokio::time::timeout(Duration::from_secs(60), seen.recv())
                .await
                .expect("timed out waiting for message")
                .expect("recorder channel closed");
            out.push(next);
        }
        out
    }

    pub fn last_activity(&self) -> Option<ActivityStatus> {
        self.messages.lock().iter().rev().find_map(|m| match m.data() {
            Payload::Activity(status) => Some(status.clone()),
            _ => None,
        })
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.messages
            .lock()
            .iter()
            .filter_map(|m| m.data().as_event().cloned())
            .collect()
    }
}

#[async_trait]
impl Plugin for Recorder {
    async fn init(&self, _pipe: MessagePipe) {}

    async fn process(&self, message: &Message) {
        let entry = match message.data().as_flag() {
            Some(flag) => format!("{}={flag}", message.topic()),
            None => message.topic().to_string(),
        };
        self.messages.lock().push(message.clone());
        let _ = self.seen_tx.send(entry);
    }

    async fn close(&self) {}

    fn info(&self) -> Info {
        Info::new(self.name, "test")
    }

    fn subscriptions(&self) -> Vec<String> {
        self.topics.clone()
    }
}

/// Records reload signals instead of delivering them.
#[derive(Default)]
pub(crate) struct RecordingSignaller {
    pub pids: Mutex<Vec<u32>>,
    fail: bool,
}

impl RecordingSignaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails every signal as if the process were gone.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            pids: Mutex::default(),
            fail: true,
        })
    }
}

impl Signaller for RecordingSignaller {
    fn hangup(&self, pid: u32) -> NginxResult<()> {
        self.pids.lock().push(pid);
        if self.fail {
            return Err(NginxError::signal(
                pid,
                std::io::Error::new(std::io::ErrorKind::NotFound, "No such process"),
            ));
        }
        Ok(())
    }
}
