//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::MeshConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {key}: {message}")]
    Env { key: &'static str, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: TOML file (optional), then process environment, then validate.
pub fn load_config(path: Option<&Path>) -> Result<MeshConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => MeshConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply the mesh's environment variables on top of a parsed config.
///
/// `lookup` abstracts the environment so overrides can be tested without
/// mutating process state.
pub fn apply_env_overrides<F>(mut config: MeshConfig, lookup: F) -> Result<MeshConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(role) = get("SERVICE_ROLE") {
        config.service.role = role
            .parse()
            .map_err(|message| ConfigError::Env { key: "SERVICE_ROLE", message })?;
    }
    if let Some(endpoint) = get("JAEGER_ENDPOINT") {
        config.exporter.endpoint = endpoint;
    }
    if let Some(url) = get("USER_SERVICE_URL") {
        config.downstream.user_service_url = url;
    }
    if let Some(url) = get("ORDER_SERVICE_URL") {
        config.downstream.order_service_url = url;
    }
    if let Some(url) = get("NOTIFICATION_SERVICE_URL") {
        config.downstream.notification_service_url = url;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.observability.log_level = level.to_ascii_lowercase();
    }
    if let Some(format) = get("LOG_FORMAT") {
        config.observability.log_format = format
            .parse()
            .map_err(|message| ConfigError::Env { key: "LOG_FORMAT", message })?;
    }
    if let Some(file) = get("LOG_FILE") {
        config.observability.log_file = Some(file);
    }

    Ok(config)
}
