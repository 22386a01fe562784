//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ReliabilityConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value `{value}` for {var}")]
    Env { var: &'static str, value: String },
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<ReliabilityConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content, |var| std::env::var(var).ok())
}

/// Parse and validate configuration text with an explicit env lookup.
pub fn load_config_str<F>(content: &str, env: F) -> Result<ReliabilityConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: ReliabilityConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

/// Environment variables override file values.
pub fn apply_env_overrides<F>(config: &mut ReliabilityConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env("SERVICE_NAME") {
        config.service.name = value;
    }
    if let Some(value) = env("LOG_LEVEL") {
        config.observability.log_level = value.to_lowercase();
    }
    if let Some(value) = env("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold =
            parse_var("CIRCUIT_BREAKER_FAILURE_THRESHOLD", value)?;
    }
    if let Some(value) = env("CIRCUIT_BREAKER_RECOVERY_TIMEOUT") {
        config.circuit_breaker.recovery_timeout_secs =
            parse_var("CIRCUIT_BREAKER_RECOVERY_TIMEOUT", value)?;
    }
    if let Some(value) = env("RATE_LIMIT_REQUESTS_PER_MINUTE") {
        config.rate_limit.limit = parse_var("RATE_LIMIT_REQUESTS_PER_MINUTE", value)?;
        config.rate_limit.window_secs = 60;
    }
    Ok(())
}
