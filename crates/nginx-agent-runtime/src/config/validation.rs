//! Configuration validation.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{AgentConfig, LogOutput, LoggingConfig, NginxSettings, PipeConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &AgentConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_pipe_config(&config.pipe)?;
    validate_nginx_config(&config.nginx)?;

    if config.extensions.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::validation("Extension names must not be empty"));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "Log filter module names must not be empty",
        ));
    }

    Ok(())
}

fn validate_pipe_config(pipe: &PipeConfig) -> ConfigResult<()> {
    if pipe.queue_size == 0 {
        return Err(ConfigError::validation(
            "pipe.queue_size must be greater than 0",
        ));
    }

    if pipe.bus_size == 0 {
        return Err(ConfigError::validation(
            "pipe.bus_size must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_nginx_config(nginx: &NginxSettings) -> ConfigResult<()> {
    if let Some(dir) = nginx
        .allowed_directories
        .iter()
        .find(|dir| !dir.is_absolute())
    {
        return Err(ConfigError::RelativeDirectory(dir.clone()));
    }

    if nginx.validation_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "nginx.validation_timeout_secs must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for instance in &nginx.instances {
        if !instance.conf_path.is_absolute() {
            return Err(ConfigError::validation(format!(
                "Instance config path must be absolute: {}",
                instance.conf_path.display()
            )));
        }
        if !seen.insert(instance.nginx_id()) {
            return Err(ConfigError::validation(format!(
                "Duplicate NGINX instance: {}",
                instance.conf_path.display()
            )));
        }
    }

    Ok(())
}
