//! Layered agent configuration.
//!
//! Sources, lowest to highest precedence:
//!
//! 1. built-in defaults;
//! 2. `nginx-agent.<profile>.toml` next to the main file, when a profile is
//!    set with [`ConfigLoader::profile`] or `NGINX_AGENT_PROFILE`;
//! 3. the main file: the one given to [`ConfigLoader::file`], or else the
//!    first `nginx-agent.toml` (`.yaml`/`.yml` with `yaml-config`) found in
//!    the current directory, `~/.config/nginx-agent` or `/etc/nginx-agent`;
//! 4. `NGINX_AGENT_*` environment variables, `__` separating sections
//!    (`NGINX_AGENT_NGINX__TREAT_WARNINGS_AS_ERRORS=true`);
//! 5. single values given to [`ConfigLoader::set`], which is how command-line
//!    flags win.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .file("/etc/nginx-agent/nginx-agent.toml")
//!     .set("logging.level", LogLevel::Debug)
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::AgentConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "NGINX_AGENT_";
const PROFILE_ENV: &str = "NGINX_AGENT_PROFILE";
const CONFIG_DIR_NAME: &str = "nginx-agent";
const SYSTEM_CONFIG_DIR: &str = "/etc/nginx-agent";
const CONFIG_STEM: &str = "nginx-agent";

/// Extensions tried for the main file, in order.
const CONFIG_EXTENSIONS: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "toml",
    #[cfg(feature = "yaml-config")]
    "yaml",
    #[cfg(feature = "yaml-config")]
    "yml",
];

pub struct ConfigLoader {
    overrides: Figment,
    profile: Option<String>,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: std::env::var(PROFILE_ENV)
                .ok()
                .filter(|profile| !profile.trim().is_empty()),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Also loads `nginx-agent.<profile>.<ext>`, below the main file.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into().to_lowercase());
        self
    }

    /// Searches `path` for the main file. Replaces the default search paths.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file; search paths are ignored.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Overrides one value on top of every other source.
    ///
    /// `key` is a dotted path such as `"nginx.allowed_directories"`.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<AgentConfig> {
        let profile = self.profile.clone();
        let config: AgentConfig = self.build_figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            profile = profile.as_deref().unwrap_or("none"),
            logging_level = %config.logging.level,
            allowed_directories = ?config.nginx.allowed_directories,
            instances = config.nginx.instances.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));

        let main_file = match &self.config_file {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => self.find_main_file(),
        };

        match main_file {
            Some(path) => {
                if let Some(profile_file) = self.profile_file(&path) {
                    debug!(path = %profile_file.display(), "Loading profile configuration");
                    figment = merge_file(figment, &profile_file)?;
                }
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, &path)?;
            }
            None => warn!("No configuration file found, using defaults"),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn find_main_file(&self) -> Option<PathBuf> {
        let search_paths = if self.search_paths.is_empty() {
            default_search_paths()
        } else {
            self.search_paths.clone()
        };

        search_paths.iter().find_map(|dir| {
            CONFIG_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{CONFIG_STEM}.{ext}")))
                .find(|path| path.exists())
        })
    }

    /// `<dir>/<stem>.<profile>.<ext>` beside `main`, if it exists.
    fn profile_file(&self, main: &Path) -> Option<PathBuf> {
        let profile = self.profile.as_deref()?;
        let stem = main.file_stem()?.to_str()?;
        let ext = main.extension()?.to_str()?;
        let path = main.with_file_name(format!("{stem}.{profile}.{ext}"));
        path.exists().then_some(path)
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(CONFIG_DIR_NAME));
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG_DIR));
    paths
}

/// Merges one file, choosing the format by extension.
fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{LogFormat, LogLevel};
    use figment::Jail;

    const AGENT_TOML: &str = r#"
        extensions = ["metrics"]

        [logging]
        level = "debug"
        format = "pretty"

        [pipe]
        queue_size = 250

        [nginx]
        allowed_directories = ["/etc/nginx", "/usr/share/nginx"]
        treat_warnings_as_errors = true

        [[nginx.instances]]
        process_id = 1234
    "#;

    fn isolated(jail: &Jail) -> ConfigLoader {
        ConfigLoader::new().search_path(jail.directory())
    }

    #[test]
    fn defaults_without_any_source() {
        Jail::expect_with(|jail| {
            let config = isolated(jail).without_env().load().unwrap();

            assert_eq!(config, AgentConfig::default());
            assert_eq!(config.logging.level.as_str(), "info");
            Ok(())
        });
    }

    #[test]
    fn config_file_is_found_in_search_path() {
        Jail::expect_with(|jail| {
            jail.create_file("nginx-agent.toml", AGENT_TOML)?;
            let config = isolated(jail).without_env().load().unwrap();

            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.logging.format, LogFormat::Pretty);
            assert_eq!(config.pipe.queue_size, 250);
            assert_eq!(config.pipe.bus_size, 100);
            assert!(config.nginx.treat_warnings_as_errors);
            assert_eq!(config.nginx.allowed_directories.len(), 2);
            assert_eq!(config.nginx.instances[0].process_id, 1234);
            assert_eq!(
                config.nginx.instances[0].conf_path,
                PathBuf::from("/etc/nginx/nginx.conf")
            );
            assert_eq!(config.extensions, vec!["metrics".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("nginx-agent.toml", AGENT_TOML)?;
            jail.set_env("NGINX_AGENT_LOGGING__LEVEL", "warn");
            jail.set_env("NGINX_AGENT_PIPE__BUS_SIZE", "42");

            let config = isolated(jail).load().unwrap();

            assert_eq!(config.logging.level, LogLevel::Warn);
            assert_eq!(config.pipe.bus_size, 42);
            assert_eq!(config.pipe.queue_size, 250);
            Ok(())
        });
    }

    #[test]
    fn set_overrides_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("NGINX_AGENT_LOGGING__LEVEL", "warn");

            let config = isolated(jail)
                .set("logging.level", LogLevel::Trace)
                .set("nginx.allowed_directories", vec!["/srv/www"])
                .load()
                .unwrap();

            assert_eq!(config.logging.level, LogLevel::Trace);
            assert_eq!(
                config.nginx.allowed_directories,
                vec![PathBuf::from("/srv/www")]
            );
            Ok(())
        });
    }

    #[test]
    fn profile_file_is_merged_below_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nginx-agent.production.toml",
                "hostname = \"edge-1\"\n[pipe]\nqueue_size = 5\n",
            )?;
            jail.create_file("nginx-agent.toml", "[pipe]\nqueue_size = 6\n")?;

            let config = isolated(jail)
                .profile("Production")
                .without_env()
                .load()
                .unwrap();

            assert_eq!(config.hostname.as_deref(), Some("edge-1"));
            assert_eq!(config.pipe.queue_size, 6);
            Ok(())
        });
    }

    #[test]
    fn explicit_file_must_exist() {
        Jail::expect_with(|jail| {
            let missing = jail.directory().join("missing.toml");
            let err = ConfigLoader::new().file(&missing).load().unwrap_err();

            assert!(matches!(err, ConfigError::FileNotFound(path) if path == missing));
            Ok(())
        });
    }

    #[test]
    fn unknown_extension_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("agent.ini", "")?;
            let err = ConfigLoader::new()
                .file(jail.directory().join("agent.ini"))
                .load()
                .unwrap_err();

            assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "ini"));
            Ok(())
        });
    }

    #[test]
    fn unknown_log_level_fails_to_parse() {
        Jail::expect_with(|jail| {
            jail.create_file("nginx-agent.toml", "[logging]\nlevel = \"verbose\"\n")?;
            let err = isolated(jail).without_env().load().unwrap_err();

            assert!(matches!(err, ConfigError::ParseError(_)));
            Ok(())
        });
    }

    #[test]
    fn loaded_config_is_validated() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "nginx-agent.toml",
                "[nginx]\nallowed_directories = [\"relative/dir\"]\n",
            )?;
            let err = isolated(jail).without_env().load().unwrap_err();

            assert!(matches!(err, ConfigError::RelativeDirectory(_)));
            Ok(())
        });
    }

    #[test]
    fn profile_comes_from_environment() {
        Jail::expect_with(|jail| {
            jail.create_file("nginx-agent.staging.toml", "hostname = \"stage-1\"\n")?;
            jail.create_file("nginx-agent.toml", "")?;
            jail.set_env("NGINX_AGENT_PROFILE", "staging");

            let config = isolated(jail).load().unwrap();

            assert_eq!(config.hostname.as_deref(), Some("stage-1"));
            Ok(())
        });
    }

    #[test]
    fn profile_file_alone_is_ignored() {
        Jail::expect_with(|jail| {
            jail.create_file("nginx-agent.production.toml", "hostname = \"edge-1\"\n")?;

            let config = isolated(jail)
                .profile("production")
                .without_env()
                .load()
                .unwrap();

            assert_eq!(config.hostname, None);
            Ok(())
        });
    }

    #[test]
    fn profile_applies_to_explicit_file() {
        Jail::expect_with(|jail| {
            jail.create_file("agent.toml", "[pipe]\nbus_size = 11\n")?;
            jail.create_file("agent.edge.toml", "[pipe]\nbus_size = 3\nqueue_size = 4\n")?;

            let config = ConfigLoader::new()
                .file(jail.directory().join("agent.toml"))
                .profile("edge")
                .without_env()
                .load()
                .unwrap();

            assert_eq!(config.pipe.bus_size, 11);
            assert_eq!(config.pipe.queue_size, 4);
            Ok(())
        });
    }
}
