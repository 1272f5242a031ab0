//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable that overrides `upstream.base_url`.
pub const BASE_URL_ENV: &str = "TEMPLATE_SERVICE_URL";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Load from `path` when given, otherwise start from defaults. Environment
/// overrides are applied in both cases.
pub fn load_or_default(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = ClientConfig::default();
            apply_env_overrides(&mut config);
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Parse, apply environment overrides and validate.
pub fn parse_config(content: &str) -> Result<ClientConfig, ConfigError> {
    let mut config: ClientConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut ClientConfig) {
    if let Ok(url) = std::env::var(BASE_URL_ENV) {
        if !url.trim().is_empty() {
            tracing::debug!(base_url = %url, "Upstream base URL taken from environment");
            config.upstream.base_url = url.trim().to_string();
        }
    }
}
