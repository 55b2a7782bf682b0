//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file does not exist.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// `${VAR}` referenced a variable that is not set.
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}
