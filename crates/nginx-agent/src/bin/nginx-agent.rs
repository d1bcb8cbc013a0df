//! The `nginx-agent` binary.
//!
//! ```bash
//! nginx-agent --config /etc/nginx-agent/nginx-agent.toml --allowed-dir /etc/nginx
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use nginx_agent::cli::Cli;
use nginx_agent::runtime::AgentRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = cli.loader().context("invalid command-line arguments")?;
    let runtime = AgentRuntime::builder()
        .config_loader(loader)
        .build()
        .context("failed to load agent configuration")?;

    tracing::info!(
        allowed_directories = ?runtime.config().nginx.allowed_directories,
        instances = runtime.config().nginx.instances.len(),
        "Starting NGINX agent"
    );

    runtime.run().await.context("agent runtime failed")?;
    Ok(())
}
