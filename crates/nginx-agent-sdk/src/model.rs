//! Configuration payload model.
//!
//! These types describe an incoming NGINX configuration as the control plane
//! sends it: the files with their contents, an optional set of auxiliary
//! files rooted elsewhere, and a directory listing that says which files the
//! instance should end up with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Per-file action carried by an incoming configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// No explicit action; the file is written.
    #[default]
    Unset,
    /// The file is already in place and must not be rewritten.
    Unchanged,
    /// The file is new.
    Add,
    /// The file replaces an existing one.
    Update,
    /// The file must be removed.
    Delete,
}

/// Action requested for a whole configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigAction {
    /// Write, validate and reload.
    #[default]
    Apply,
    /// Only read the current configuration back.
    Upload,
}

/// A file with contents to place on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Absolute path, or a path relative to the root the file is written under.
    pub name: String,
    /// Raw file contents.
    #[serde(default)]
    pub contents: Vec<u8>,
    /// Octal permission text such as `"0644"`.
    #[serde(default)]
    pub permissions: String,
    /// What to do with the file.
    #[serde(default)]
    pub action: FileAction,
}

impl ConfigFile {
    /// Creates a file to be written with default permissions.
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            ..Default::default()
        }
    }

    /// Sets the octal permission text.
    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    /// Sets the file action.
    pub fn with_action(mut self, action: FileAction) -> Self {
        self.action = action;
        self
    }

    /// Resolves the file name against `root` when it is relative.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        resolve_path(root, &self.name)
    }
}

/// A file entry inside a [`Directory`] listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name, relative to the directory unless absolute.
    pub name: String,
    /// Explicit action for the file.
    #[serde(default)]
    pub action: FileAction,
}

impl FileEntry {
    /// Creates an entry without an explicit action.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: FileAction::Unset,
        }
    }

    /// Creates an entry with an explicit action.
    pub fn with_action(name: impl Into<String>, action: FileAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

/// One directory of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Directory path.
    pub name: String,
    /// Files in the directory.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Directory {
    /// Creates a directory listing.
    pub fn new(name: impl Into<String>, files: Vec<FileEntry>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }

    /// Full path of a file entry of this directory.
    pub fn file_path(&self, entry: &FileEntry) -> PathBuf {
        resolve_path(Path::new(&self.name), &entry.name)
    }
}

/// Auxiliary files written under their own root directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxFiles {
    /// Root the relative aux file names are resolved against.
    pub root_directory: String,
    /// The files.
    #[serde(default)]
    pub files: Vec<ConfigFile>,
}

/// A complete configuration for one NGINX instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NginxConfig {
    /// Requested action.
    #[serde(default)]
    pub action: ConfigAction,
    /// Identifier of the target instance.
    pub nginx_id: String,
    /// Config files, relative names resolve against the config directory.
    #[serde(default)]
    pub files: Vec<ConfigFile>,
    /// Auxiliary files.
    #[serde(default)]
    pub aux: Option<AuxFiles>,
    /// Complete listing of the files the instance should end up with.
    #[serde(default)]
    pub directory_map: Vec<Directory>,
}

/// Runtime details of one discovered NGINX instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NginxDetails {
    /// Stable instance identifier, see [`generate_id`](crate::generate_id).
    pub nginx_id: String,
    /// Master process id.
    pub process_id: u32,
    /// Path of the NGINX binary.
    pub process_path: PathBuf,
    /// Main config file.
    pub conf_path: PathBuf,
    /// Install prefix.
    #[serde(default)]
    pub prefix: PathBuf,
    /// Version string as reported by the binary.
    #[serde(default)]
    pub version: String,
}

impl NginxDetails {
    /// Directory containing the main config file.
    pub fn conf_dir(&self) -> &Path {
        self.conf_path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

pub(crate) fn resolve_path(root: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_resolve_under_root() {
        let file = ConfigFile::new("conf.d/default.conf", "server {}");
        assert_eq!(
            file.resolve(Path::new("/etc/nginx")),
            PathBuf::from("/etc/nginx/conf.d/default.conf")
        );
    }

    #[test]
    fn absolute_names_are_kept() {
        let file = ConfigFile::new("/var/www/index.html", "");
        assert_eq!(
            file.resolve(Path::new("/etc/nginx")),
            PathBuf::from("/var/www/index.html")
        );
    }

    #[test]
    fn file_action_uses_snake_case() {
        let json = serde_json::to_string(&FileAction::Unchanged).unwrap();
        assert_eq!(json, "\"unchanged\"");
        let action: FileAction = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(action, FileAction::Delete);
    }

    #[test]
    fn conf_dir_is_parent_of_conf_path() {
        let details = NginxDetails {
            conf_path: PathBuf::from("/etc/nginx/nginx.conf"),
            ..Default::default()
        };
        assert_eq!(details.conf_dir(), Path::new("/etc/nginx"));
    }
}
