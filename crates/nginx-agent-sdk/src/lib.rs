//! # NGINX Agent SDK
//!
//! Shared building blocks for the agent and its plugins:
//!
//! - **Model**: the configuration payload sent by the control plane
//!   ([`NginxConfig`], [`ConfigFile`], [`Directory`]) and the details of a
//!   discovered instance ([`NginxDetails`]).
//! - **Config apply**: the [`ConfigApply`] transaction that backs up every
//!   file before it is written or deleted, and either keeps the new state
//!   ([`ConfigApply::complete`]) or restores the old one
//!   ([`ConfigApply::rollback`]).
//! - **Writers**: [`write_config`] and the file helpers it is built from,
//!   guarded by [`AllowedDirectories`].
//! - **IDs**: [`generate_id`] for stable instance identifiers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nginx_agent_sdk::{ConfigApply, write_config};
//!
//! let mut apply = ConfigApply::new();
//! match write_config(&mut apply, &config, &details, &current, &allowed) {
//!     Ok(_) => apply.complete()?,
//!     Err(e) => apply.rollback(&e)?,
//! }
//! ```

pub mod checksum;
pub mod config_apply;
pub mod directory_map;
pub mod error;
pub mod files;
pub mod model;
pub mod writer;

pub use checksum::{format_template, generate_id};
pub use config_apply::ConfigApply;
pub use directory_map::{deletions_from_directory_map, directory_map_diff};
pub use error::{ConfigApplyError, ConfigApplyResult};
pub use files::{
    AllowedDirectories, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, allowed_files, delete_file, file_mode,
    list_directory, scan_directory, write_file, write_files,
};
pub use model::{
    AuxFiles, ConfigAction, ConfigFile, Directory, FileAction, FileEntry, NginxConfig,
    NginxDetails,
};
pub use writer::write_config;
