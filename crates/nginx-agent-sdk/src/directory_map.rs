//! Working out which files a configuration removes.
//!
//! A file can leave the instance in two ways: an explicit `Delete` action on
//! its directory-map entry, or by omission, when a full listing no longer
//! mentions it.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::files::AllowedDirectories;
use crate::model::{Directory, FileAction};

/// Paths listed in `current` but absent from `incoming`.
///
/// These are files removed by omission; they still go through backup and
/// rollback like any explicit delete.
pub fn directory_map_diff(current: &[Directory], incoming: &[Directory]) -> Vec<PathBuf> {
    let incoming: HashSet<PathBuf> = incoming
        .iter()
        .flat_map(|dir| dir.files.iter().map(move |file| dir.file_path(file)))
        .collect();

    current
        .iter()
        .flat_map(|dir| dir.files.iter().map(move |file| dir.file_path(file)))
        .filter(|path| !incoming.contains(path))
        .collect()
}

/// Paths carrying an explicit `Delete` action.
///
/// Returns `None` when no entry in the map has any action set, which tells
/// the caller to fall back to [`directory_map_diff`]. Relative paths and paths
/// outside `allowed` are skipped.
pub fn deletions_from_directory_map(
    map: &[Directory],
    allowed: &AllowedDirectories,
) -> Option<Vec<PathBuf>> {
    let mut action_set = false;
    let mut deletions = Vec::new();

    for dir in map {
        for file in &dir.files {
            if file.action == FileAction::Unset {
                continue;
            }
            action_set = true;
            if file.action != FileAction::Delete {
                continue;
            }
            let path = dir.file_path(file);
            if !path.is_absolute() || !allowed.permits(&path) {
                continue;
            }
            deletions.push(path);
        }
    }

    action_set.then_some(deletions)
}
