//! File writers used by a config apply, plus the allowed-directory guard.
//!
//! Every writer here takes the [`ConfigApply`] of the running apply and calls
//! [`ConfigApply::mark_and_save`] before it touches a path.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config_apply::ConfigApply;
use crate::error::{ConfigApplyError, ConfigApplyResult};
use crate::model::{ConfigFile, Directory, FileAction, FileEntry};

/// Mode used when a file carries no (or unparsable) permission text.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Mode used for directories created on the way to a new file.
pub const DEFAULT_DIR_MODE: u32 = 0o750;

/// Parses octal permission text such as `"0644"` or `"755"`.
///
/// Falls back to [`DEFAULT_FILE_MODE`] for empty or invalid input.
pub fn file_mode(permissions: &str) -> u32 {
    u32::from_str_radix(permissions.trim(), 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .unwrap_or(DEFAULT_FILE_MODE)
}

/// Absolute directory prefixes under which writes are permitted.
///
/// Matching is a literal string prefix test, the same way the directories are
/// written in the agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedDirectories(Vec<String>);

impl AllowedDirectories {
    /// Builds the set from any list of directories.
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self(
            dirs.into_iter()
                .map(|d| d.as_ref().to_string_lossy().into_owned())
                .collect(),
        )
    }

    /// Returns true when `path` may be written.
    ///
    /// Relative paths are always permitted: they are resolved against the
    /// config root chosen by the caller.
    pub fn permits(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !path.is_absolute() {
            return true;
        }
        let path = path.to_string_lossy();
        self.0.iter().any(|dir| path.starts_with(dir.as_str()))
    }

    /// The configured directories.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns true when no directory is allowed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pre-flight check: fails on the first file outside the allowed directories.
pub fn allowed_files(files: &[ConfigFile], allowed: &AllowedDirectories) -> ConfigApplyResult<()> {
    match files.iter().find(|f| !allowed.permits(&f.name)) {
        Some(file) => Err(ConfigApplyError::WriteProhibited {
            path: PathBuf::from(&file.name),
        }),
        None => Ok(()),
    }
}

/// Writes a batch of files under `root`.
///
/// The whole batch is checked against `allowed` first; a violation returns
/// before anything is backed up or written. `Unchanged` files are skipped and
/// `Delete` files are removed.
pub fn write_files(
    apply: &mut ConfigApply,
    files: &[ConfigFile],
    root: &Path,
    allowed: &AllowedDirectories,
) -> ConfigApplyResult<()> {
    allowed_files(files, allowed)?;

    for file in files {
        match file.action {
            FileAction::Unchanged => {
                debug!(file = %file.name, "skipping unchanged file");
            }
            FileAction::Delete => delete_file(apply, file.resolve(root))?,
            _ => write_file(apply, file, root)?,
        }
    }
    Ok(())
}

/// Writes one file, relative names resolve against `root`.
///
/// Missing parent directories are created with [`DEFAULT_DIR_MODE`].
pub fn write_file(apply: &mut ConfigApply, file: &ConfigFile, root: &Path) -> ConfigApplyResult<()> {
    let path = file.resolve(root);
    apply.mark_and_save(&path)?;

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        debug!(dir = %parent.display(), "creating directory with permissions 750");
        create_dir_all(parent).map_err(|e| ConfigApplyError::io("create dir", parent, e))?;
    }

    if let Err(e) = write_with_mode(&path, &file.contents, file_mode(&file.permissions)) {
        if !path.exists() {
            apply.remove_from_not_exists(&path);
        }
        return Err(ConfigApplyError::io("write", path, e));
    }

    debug!(path = %path.display(), "wrote file");
    Ok(())
}

/// Deletes one file, backing it up first.
///
/// A missing file is not an error.
pub fn delete_file(apply: &mut ConfigApply, path: impl AsRef<Path>) -> ConfigApplyResult<()> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "skip delete for non-existing file");
            return Ok(());
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "file exists check failed");
            return Err(ConfigApplyError::io("stat", path, e));
        }
    }

    apply.mark_and_save(path)?;
    fs::remove_file(path).map_err(|e| ConfigApplyError::io("delete", path, e))?;
    debug!(path = %path.display(), "deleted file");
    Ok(())
}

/// Lists the regular files directly inside `dir`, sorted by name.
///
/// Subdirectories are not descended into.
pub fn list_directory(dir: impl AsRef<Path>) -> ConfigApplyResult<Directory> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ConfigApplyError::io("read dir", dir, e))? {
        let entry = entry.map_err(|e| ConfigApplyError::io("read dir", dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| ConfigApplyError::io("stat", entry.path(), e))?;
        if file_type.is_file() {
            files.push(FileEntry::new(entry.file_name().to_string_lossy()));
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Directory::new(dir.to_string_lossy(), files))
}

/// Lists every regular file under `root`, grouped by directory.
///
/// Directories come out sorted by path, files sorted by name.
pub fn scan_directory(root: impl AsRef<Path>) -> ConfigApplyResult<Vec<Directory>> {
    let mut directories = Vec::new();
    let mut pending = vec![root.as_ref().to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| ConfigApplyError::io("read dir", &dir, e))?;
        let mut files = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| ConfigApplyError::io("read dir", &dir, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| ConfigApplyError::io("stat", entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(FileEntry::new(entry.file_name().to_string_lossy()));
            }
        }

        if !files.is_empty() {
            files.sort_by(|a, b| a.name.cmp(&b.name));
            directories.push(Directory::new(dir.to_string_lossy(), files));
        }
    }

    directories.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(directories)
}

#[cfg(unix)]
fn create_dir_all(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DEFAULT_DIR_MODE)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir_all(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents)?;
    // `mode` only applies on creation; existing files get it explicitly.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &[u8], _mode: u32) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("0644", 0o644)]
    #[case("0600", 0o600)]
    #[case("755", 0o755)]
    #[case(" 0640 ", 0o640)]
    #[case("", DEFAULT_FILE_MODE)]
    #[case("rw-r--r--", DEFAULT_FILE_MODE)]
    #[case("0999", DEFAULT_FILE_MODE)]
    #[case("77777", DEFAULT_FILE_MODE)]
    fn parses_permission_text(#[case] text: &str, #[case] expected: u32) {
        assert_eq!(file_mode(text), expected);
    }

    #[rstest]
    #[case("/etc/nginx/nginx.conf", true)]
    #[case("/usr/share/nginx/html/index.html", true)]
    #[case("conf.d/default.conf", true)]
    #[case("/etc/passwd", false)]
    #[case("/tmp/nginx.conf", false)]
    fn permits_by_literal_prefix(#[case] path: &str, #[case] expected: bool) {
        let allowed = AllowedDirectories::new(["/etc/nginx", "/usr/share/nginx"]);
        assert_eq!(allowed.permits(path), expected);
    }

    #[test]
    fn write_prohibited_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let allowed_root = dir.path().join("allowed");
        let outside = dir.path().join("outside/evil.conf");
        let inside = allowed_root.join("ok.conf");
        let allowed = AllowedDirectories::new([&allowed_root]);

        let files = vec![
            ConfigFile::new(inside.to_string_lossy(), "ok"),
            ConfigFile::new(outside.to_string_lossy(), "evil"),
        ];

        let mut apply = ConfigApply::new();
        let err = write_files(&mut apply, &files, dir.path(), &allowed).unwrap_err();

        assert!(matches!(err, ConfigApplyError::WriteProhibited { .. }));
        assert!(err.is_preflight());
        assert!(!inside.exists());
        assert!(!outside.exists());
        assert!(apply.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn write_file_creates_parents_and_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let file = ConfigFile::new("conf.d/site.conf", "server {}").with_permissions("0600");

        let mut apply = ConfigApply::new();
        write_file(&mut apply, &file, dir.path()).unwrap();

        let path = dir.path().join("conf.d/site.conf");
        assert_eq!(fs::read_to_string(&path).unwrap(), "server {}");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(apply.not_exists().collect::<Vec<_>>(), vec![path.as_path()]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_create_is_not_deleted_on_rollback() {
        let dir = TempDir::new().unwrap();
        // A dangling link: stat reports the target missing and the write
        // cannot create it because the link points into a missing directory.
        let link = dir.path().join("site.conf");
        std::os::unix::fs::symlink(dir.path().join("missing/site.conf"), &link).unwrap();
        let file = ConfigFile::new("site.conf", "server {}");

        let mut apply = ConfigApply::new();
        let err = write_file(&mut apply, &file, dir.path()).unwrap_err();

        assert!(matches!(err, ConfigApplyError::Io { op: "write", .. }));
        assert_eq!(apply.not_exists().count(), 0);

        apply.rollback(err).unwrap();
        assert!(fs::symlink_metadata(&link).is_ok());
    }

    #[test]
    fn write_files_honours_actions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.conf"), "keep").unwrap();
        fs::write(dir.path().join("drop.conf"), "drop").unwrap();

        let files = vec![
            ConfigFile::new("keep.conf", "ignored").with_action(FileAction::Unchanged),
            ConfigFile::new("drop.conf", "").with_action(FileAction::Delete),
            ConfigFile::new("add.conf", "add").with_action(FileAction::Add),
        ];

        let mut apply = ConfigApply::new();
        write_files(&mut apply, &files, dir.path(), &AllowedDirectories::default()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("keep.conf")).unwrap(), "keep");
        assert!(!dir.path().join("drop.conf").exists());
        assert_eq!(fs::read_to_string(dir.path().join("add.conf")).unwrap(), "add");

        apply.rollback("undo").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("drop.conf")).unwrap(), "drop");
        assert!(!dir.path().join("add.conf").exists());
    }

    #[test]
    fn delete_missing_file_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut apply = ConfigApply::new();
        delete_file(&mut apply, dir.path().join("missing.conf")).unwrap();
        assert!(apply.is_empty());
    }

    #[test]
    fn scan_directory_groups_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("conf.d")).unwrap();
        fs::write(dir.path().join("nginx.conf"), "").unwrap();
        fs::write(dir.path().join("mime.types"), "").unwrap();
        fs::write(dir.path().join("conf.d/default.conf"), "").unwrap();

        let listing = scan_directory(dir.path()).unwrap();

        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, dir.path().to_string_lossy());
        assert_eq!(
            listing[0].files,
            vec![FileEntry::new("mime.types"), FileEntry::new("nginx.conf")]
        );
        assert_eq!(listing[1].files, vec![FileEntry::new("default.conf")]);
    }

    #[test]
    fn list_directory_does_not_descend() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("conf.d")).unwrap();
        fs::write(dir.path().join("nginx.conf"), "").unwrap();
        fs::write(dir.path().join("conf.d/default.conf"), "").unwrap();

        let listing = list_directory(dir.path()).unwrap();
        assert_eq!(listing.files, vec![FileEntry::new("nginx.conf")]);
    }
}
