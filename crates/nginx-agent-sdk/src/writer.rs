//! Writing a complete NGINX configuration inside a [`ConfigApply`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config_apply::ConfigApply;
use crate::directory_map::{deletions_from_directory_map, directory_map_diff};
use crate::error::{ConfigApplyError, ConfigApplyResult};
use crate::files::{AllowedDirectories, allowed_files, delete_file, write_files};
use crate::model::{Directory, NginxConfig, NginxDetails};

/// Writes `config` for the instance described by `details`.
///
/// All guards run before the first write:
///
/// - the config directory of the instance must be allowed;
/// - the payload must still contain the main config file;
/// - every config and aux file must pass the allowed-directory guard.
///
/// Then config files are written relative to the config directory, aux files
/// relative to their root, and removed files are deleted. Removed files come
/// from explicit `Delete` actions when the directory map sets any action,
/// otherwise from the diff between `current` and the incoming directory map.
/// A payload without a directory map deletes nothing by omission.
///
/// Returns the deleted paths. On error the caller owns the rollback.
pub fn write_config(
    apply: &mut ConfigApply,
    config: &NginxConfig,
    details: &NginxDetails,
    current: &[Directory],
    allowed: &AllowedDirectories,
) -> ConfigApplyResult<Vec<PathBuf>> {
    let conf_dir = details.conf_dir();
    preflight(config, details, allowed)?;

    info!(nginx_id = %config.nginx_id, "updating NGINX config");
    write_files(apply, &config.files, conf_dir, allowed)?;

    if let Some(aux) = &config.aux
        && !aux.files.is_empty()
    {
        write_files(apply, &aux.files, Path::new(&aux.root_directory), allowed)?;
    }

    let to_delete = match deletions_from_directory_map(&config.directory_map, allowed) {
        Some(explicit) => {
            debug!(files = ?explicit, "using explicit delete actions");
            explicit
        }
        None if config.directory_map.is_empty() => Vec::new(),
        None => directory_map_diff(current, &config.directory_map)
            .into_iter()
            .filter(|path| allowed.permits(path))
            .collect(),
    };

    let mut deleted = Vec::new();
    let mut seen = HashSet::new();
    for path in to_delete {
        if !seen.insert(path.clone()) {
            continue;
        }
        if path == details.conf_path {
            return Err(ConfigApplyError::MissingConfFile { path });
        }
        info!(path = %path.display(), "deleting file");
        delete_file(apply, &path)?;
        deleted.push(path);
    }

    Ok(deleted)
}

fn preflight(
    config: &NginxConfig,
    details: &NginxDetails,
    allowed: &AllowedDirectories,
) -> ConfigApplyResult<()> {
    let conf_dir = details.conf_dir();
    if !allowed.permits(conf_dir) {
        return Err(ConfigApplyError::DirectoryNotAllowed {
            path: conf_dir.to_path_buf(),
        });
    }

    if !config
        .files
        .iter()
        .any(|file| file.resolve(conf_dir) == details.conf_path)
    {
        return Err(ConfigApplyError::MissingConfFile {
            path: details.conf_path.clone(),
        });
    }

    allowed_files(&config.files, allowed)?;

    if let Some(aux) = &config.aux
        && !aux.files.is_empty()
    {
        if !allowed.permits(&aux.root_directory) {
            return Err(ConfigApplyError::WriteProhibited {
                path: PathBuf::from(&aux.root_directory),
            });
        }
        allowed_files(&aux.files, allowed)?;
    }

    Ok(())
}
