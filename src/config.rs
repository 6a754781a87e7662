//! Configuration parsing and structures

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::env::substitute_env_vars;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Exported directory
    pub export: RawExportConfig,
}

/// Raw export section before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawExportConfig {
    /// Directory to expose
    pub root: PathBuf,

    /// Highest handle the allocator may hand out
    pub max_handle: Option<u64>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Listener configuration
    pub server: ServerConfig,

    /// Export configuration (fully resolved)
    pub export: ExportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:2049".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Export configuration (resolved)
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory to expose
    pub root: PathBuf,

    /// Highest handle the allocator may hand out
    pub max_handle: u64,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, filling in defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            server,
            export,
        } = self;

        Ok(Config {
            logging,
            server,
            export: ExportConfig {
                root: export.root,
                max_handle: export.max_handle.unwrap_or(u64::MAX),
            },
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// `${VAR}` references are substituted before parsing.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "export.root cannot be empty".to_string(),
            ));
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "server.bind is not a socket address: {:?}",
                self.server.bind
            )));
        }

        // Handle 1 is the root, so at least one more must be available
        if self.export.max_handle < 2 {
            return Err(ConfigError::ValidationError(format!(
                "export.max_handle must be at least 2, got {}",
                self.export.max_handle
            )));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
