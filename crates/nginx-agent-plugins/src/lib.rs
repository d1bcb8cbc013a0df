//! # NGINX Agent Plugins
//!
//! The built-in plugins wired to the
//! [`MessagePipe`](nginx_agent_core::MessagePipe):
//!
//! - [`Nginx`]: applies configurations inside a
//!   [`ConfigApply`](nginx_agent_sdk::ConfigApply) transaction, validates
//!   them with `nginx -t`, reloads or rolls back.
//! - [`Events`]: turns pipeline activity into agent events.
//! - [`Extensions`]: registers optional plugins on demand.
//! - [`FileWatcher`]: reports changes made under the allowed directories.
//!
//! NGINX itself is reached only through the [`NginxBinary`],
//! [`CommandRunner`] and [`Signaller`] seams, all injected at construction.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nginx_agent_plugins::{Nginx, NginxCommand, SystemCommandRunner};
//!
//! let binary = NginxCommand::new(Arc::new(SystemCommandRunner), allowed);
//! let nginx = Nginx::new(Arc::new(binary));
//! pipe.register(DEFAULT_BUS_SIZE, vec![Arc::new(nginx)]).await?;
//! ```

pub mod binary;
pub mod command;
pub mod error;
pub mod events;
pub mod extensions;
pub mod file_watcher;
pub mod nginx;
pub mod signal;

#[cfg(test)]
mod testing;

pub use binary::{NginxBinary, NginxCommand};
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use error::{NginxError, NginxResult};
pub use events::{EVENTS_PLUGIN_NAME, Events};
pub use extensions::{EXTENSIONS_PLUGIN_NAME, ExtensionFactory, Extensions};
pub use file_watcher::{DEFAULT_POLL_INTERVAL, FILE_WATCHER_PLUGIN_NAME, FileWatcher};
pub use nginx::{DEFAULT_VALIDATION_TIMEOUT, NGINX_PLUGIN_NAME, Nginx};
pub use signal::{Signaller, SystemSignaller};
