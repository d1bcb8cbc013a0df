//! Error types for config-apply operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing, deleting or rolling back configuration files.
#[derive(Debug, Error)]
pub enum ConfigApplyError {
    /// A target path is outside every allowed directory.
    ///
    /// Raised by the pre-flight guard, before any file has been touched.
    #[error("write prohibited for: {}", path.display())]
    WriteProhibited {
        /// The rejected path.
        path: PathBuf,
    },

    /// The NGINX config directory itself is not allowed.
    #[error("config directory {} not allowed", path.display())]
    DirectoryNotAllowed {
        /// The rejected directory.
        path: PathBuf,
    },

    /// The incoming payload would remove the main NGINX config file.
    #[error("should not delete {}", path.display())]
    MissingConfFile {
        /// The main config file of the instance.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Short name of the failed operation (`backup`, `write`, ...).
        op: &'static str,
        /// The path the operation was applied to.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// One or more paths could not be restored during rollback.
    ///
    /// Every path is still attempted; this error reports the first failure
    /// and how many paths failed in total.
    #[error(
        "rollback after '{cause}' failed for {failures} path(s), first {}: {source}",
        path.display()
    )]
    RollbackFailed {
        /// The error that triggered the rollback.
        cause: String,
        /// First path whose restore failed.
        path: PathBuf,
        /// Error of the first failed restore.
        #[source]
        source: io::Error,
        /// Number of paths that failed to restore.
        failures: usize,
    },
}

impl ConfigApplyError {
    /// Wraps an I/O error with the operation and path it came from.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors raised before anything was written.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::WriteProhibited { .. }
                | Self::DirectoryNotAllowed { .. }
                | Self::MissingConfFile { .. }
        )
    }
}

/// Result type for config-apply operations.
pub type ConfigApplyResult<T> = Result<T, ConfigApplyError>;
