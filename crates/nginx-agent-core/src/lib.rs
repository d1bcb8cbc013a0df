//! # NGINX Agent Core
//!
//! The in-process plugin pipeline of the agent.
//!
//! - [`Message`]: an immutable topic plus a typed [`Payload`].
//! - [`Plugin`]: the capability interface every plugin implements.
//! - [`MessageBus`]: exact-topic fan-out to subscribers, in subscription order.
//! - [`MessagePipe`]: the bounded queue, plugin registry and single dispatch
//!   loop tying them together.
//!
//! Plugins never share mutable state. They talk by publishing messages
//! through [`MessagePipe::process`] and observe shutdown through
//! [`MessagePipe::context`].

pub mod bus;
pub mod error;
pub mod message;
pub mod payload;
pub mod pipe;
pub mod plugin;
pub mod topics;

pub use bus::MessageBus;
pub use error::{PipeError, PipeResult};
pub use message::Message;
pub use payload::{
    ActivityState, ActivityStatus, AgentEvent, ConfigApplyRequest, EventLevel, Payload,
    ReloadOutcome, RollbackOutcome, ValidationOutcome,
};
pub use pipe::{DEFAULT_BUS_SIZE, DEFAULT_QUEUE_SIZE, MessagePipe, PipeState};
pub use plugin::{BoxedPlugin, Info, Plugin};

// Re-exported so plugins need not depend on these crates directly.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
