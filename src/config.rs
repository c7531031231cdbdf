use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Top-level configuration loaded from .pr-tracker.toml.
///
/// Organization and project are required; credentials may come from the
/// config file or from the ADO_USER / ADO_PAT environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Azure DevOps connection settings
    #[serde(default)]
    pub ado: AdoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoConfig {
    /// Basic-auth user name. If None, falls back to ADO_USER env var.
    pub user: Option<String>,
    /// Personal access token. If None, falls back to ADO_PAT env var.
    pub pat: Option<String>,
    /// Organization name (path segment after the service root)
    #[serde(default)]
    pub organization: String,
    /// Project name
    #[serde(default)]
    pub project: String,
    /// Service root URL, with trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// api-version query parameter sent on every request
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_base_url() -> String {
    "https://dev.azure.com/".to_string()
}

fn default_api_version() -> String {
    "7.0".to_string()
}

impl Default for AdoConfig {
    fn default() -> Self {
        AdoConfig {
            user: None,
            pat: None,
            organization: String::new(),
            project: String::new(),
            base_url: default_base_url(),
            api_version: default_api_version(),
        }
    }
}

impl Config {
    /// Load configuration from .pr-tracker.toml in the current directory,
    /// then apply environment overrides and validate required settings.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(".pr-tracker.toml");
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if config.ado.user.is_none() {
            if let Ok(user) = std::env::var("ADO_USER") {
                config.ado.user = Some(user);
            }
        }
        if config.ado.pat.is_none() {
            if let Ok(pat) = std::env::var("ADO_PAT") {
                config.ado.pat = Some(pat);
            }
        }

        if config.ado.organization.is_empty() {
            return Err(ConfigError::Missing("ado.organization"));
        }
        if config.ado.project.is_empty() {
            return Err(ConfigError::Missing("ado.project"));
        }

        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}
