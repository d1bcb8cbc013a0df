//! Agent configuration: schema, layered loading and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, InstanceConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, NginxSettings,
    PipeConfig, SpanEventConfig,
};
pub use validation::validate_config;
