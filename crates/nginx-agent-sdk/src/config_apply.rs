//! All-or-nothing application of a multi-file configuration.
//!
//! [`ConfigApply`] is a transaction over the filesystem. Every write or delete
//! made during an apply first calls [`mark_and_save`](ConfigApply::mark_and_save):
//!
//! - a path that exists has its bytes and permissions captured, so it can be
//!   restored verbatim;
//! - a path that does not exist is recorded as new, together with the first
//!   missing parent directory, so rollback deletes rather than restores.
//!
//! The transaction ends with exactly one of [`complete`](ConfigApply::complete)
//! or [`rollback`](ConfigApply::rollback). Both consume it.
//!
//! Backups live in memory only. A crash halfway through an apply loses the
//! ability to roll back.
//!
//! ```text
//! new() ──► mark_and_save()* ──┬──► complete()         (keep new files)
//!                              └──► rollback(cause)    (restore old files)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs::{self, Permissions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::error::{ConfigApplyError, ConfigApplyResult};

/// Saved state of a file that existed before the apply touched it.
#[derive(Debug, Clone)]
struct Backup {
    contents: Vec<u8>,
    permissions: Permissions,
}

/// Backup/rollback bookkeeping for one configuration apply.
///
/// Not designed for concurrent use: one apply owns one transaction.
#[derive(Debug, Default)]
pub struct ConfigApply {
    existing: BTreeMap<PathBuf, Backup>,
    not_exists: BTreeSet<PathBuf>,
    not_exist_dirs: BTreeSet<PathBuf>,
}

impl ConfigApply {
    /// Starts an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current state of `path` before it is overwritten or removed.
    ///
    /// Calling this more than once for the same path keeps the first record,
    /// which is the state before the apply started.
    pub fn mark_and_save(&mut self, path: impl AsRef<Path>) -> ConfigApplyResult<()> {
        let path = path.as_ref();
        if self.existing.contains_key(path) || self.not_exists.contains(path) {
            return Ok(());
        }

        match fs::metadata(path) {
            Ok(metadata) => {
                let contents =
                    fs::read(path).map_err(|e| ConfigApplyError::io("backup", path, e))?;
                trace!(
                    path = %path.display(),
                    bytes = contents.len(),
                    "backup: saved file"
                );
                self.existing.insert(
                    path.to_path_buf(),
                    Backup {
                        contents,
                        permissions: metadata.permissions(),
                    },
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "backup: file does not exist");
                self.not_exists.insert(path.to_path_buf());
                self.mark_missing_parent(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "backup: stat failed");
                Err(ConfigApplyError::io("backup", path, e))
            }
        }
    }

    /// Records the top-most parent directory of `path` that does not exist yet.
    fn mark_missing_parent(&mut self, path: &Path) -> ConfigApplyResult<()> {
        if self.not_exist_dirs.iter().any(|dir| path.starts_with(dir)) {
            return Ok(());
        }

        let mut parents: Vec<&Path> = path.ancestors().skip(1).collect();
        parents.reverse();

        for dir in parents {
            if dir.as_os_str().is_empty() {
                continue;
            }
            match fs::metadata(dir) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(dir = %dir.display(), "backup: directory does not exist");
                    self.not_exist_dirs.insert(dir.to_path_buf());
                    return Ok(());
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "backup: directory stat failed");
                    return Err(ConfigApplyError::io("backup", dir, e));
                }
            }
        }
        Ok(())
    }

    /// Forgets that `path` was expected to be created.
    ///
    /// Used when the write that would have created it failed before anything
    /// reached the disk, so rollback does not delete a file that never was.
    pub fn remove_from_not_exists(&mut self, path: impl AsRef<Path>) {
        self.not_exists.remove(path.as_ref());
    }

    /// Ends the transaction keeping the new filesystem state.
    pub fn complete(self) -> ConfigApplyResult<()> {
        debug!(
            backups = self.existing.len(),
            created = self.not_exists.len(),
            "config_apply: complete, discarding backups"
        );
        Ok(())
    }

    /// Ends the transaction restoring the state from before the apply.
    ///
    /// New files are deleted, new directories removed and saved files written
    /// back with their original permissions. Every path is attempted even when
    /// some fail; the failures are aggregated into one
    /// [`ConfigApplyError::RollbackFailed`] reporting the first of them.
    pub fn rollback(self, cause: impl Display) -> ConfigApplyResult<()> {
        let cause = cause.to_string();
        warn!(cause = %cause, "config_apply: rollback");

        let mut failures: Vec<(PathBuf, io::Error)> = Vec::new();

        for path in &self.not_exists {
            match fs::remove_file(path) {
                Ok(()) => trace!(path = %path.display(), "config_apply: rollback removed file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error during rollback (remove)");
                    failures.push((path.clone(), e));
                }
            }
        }

        for dir in &self.not_exist_dirs {
            match fs::remove_dir_all(dir) {
                Ok(()) => trace!(dir = %dir.display(), "config_apply: rollback removed dir"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "error during rollback (remove dir)");
                    failures.push((dir.clone(), e));
                }
            }
        }

        for (path, backup) in &self.existing {
            match restore(path, backup) {
                Ok(()) => trace!(path = %path.display(), "config_apply: rollback wrote file"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "error during rollback (restore)");
                    failures.push((path.clone(), e));
                }
            }
        }

        let count = failures.len();
        match failures.into_iter().next() {
            None => {
                info!("config_apply: rollback complete");
                Ok(())
            }
            Some((path, source)) => Err(ConfigApplyError::RollbackFailed {
                cause,
                path,
                source,
                failures: count,
            }),
        }
    }

    /// Paths whose original contents are held for restore.
    pub fn existing(&self) -> impl Iterator<Item = &Path> {
        self.existing.keys().map(PathBuf::as_path)
    }

    /// Paths the apply is creating.
    pub fn not_exists(&self) -> impl Iterator<Item = &Path> {
        self.not_exists.iter().map(PathBuf::as_path)
    }

    /// Directories the apply is creating.
    pub fn not_exist_dirs(&self) -> impl Iterator<Item = &Path> {
        self.not_exist_dirs.iter().map(PathBuf::as_path)
    }

    /// Returns true when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.existing.is_empty() && self.not_exists.is_empty() && self.not_exist_dirs.is_empty()
    }
}

fn restore(path: &Path, backup: &Backup) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &backup.contents)?;
    fs::set_permissions(path, backup.permissions.clone())
}
