//! Command-line interface of the `nginx-agent` binary.

use std::path::PathBuf;

use clap::Parser;
use nginx_agent_runtime::config::{ConfigLoader, ConfigResult, LogLevel};

/// NGINX host agent.
#[derive(Parser, Debug)]
#[command(name = "nginx-agent", version, about)]
pub struct Cli {
    /// Configuration file. Skips the search for `nginx-agent.toml`.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Directory the agent may write to. Replaces the configured list.
    #[arg(long = "allowed-dir", value_name = "DIR")]
    pub allowed_dirs: Vec<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,
}

impl Cli {
    /// A loader with the command-line values on top of every other source.
    pub fn loader(&self) -> ConfigResult<ConfigLoader> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.file(path);
        }
        if let Some(profile) = &self.profile {
            loader = loader.profile(profile);
        }
        if let Some(level) = &self.log_level {
            loader = loader.set("logging.level", level.parse::<LogLevel>()?);
        }
        if !self.allowed_dirs.is_empty() {
            loader = loader.set("nginx.allowed_directories", &self.allowed_dirs);
        }
        Ok(loader)
    }
}
