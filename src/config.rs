//! Session configuration, persisted as TOML.
//!
//! ```toml
//! validate_on_register = true
//!
//! [endpoint]
//! query_url = "http://localhost:7878/query"
//! update_url = "http://localhost:7878/update"
//! timeout_secs = 30
//!
//! [analysis]
//! max_paths = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisOptions;
use crate::error::{ConfigError, ConfigResult};

/// Where and how to reach the SPARQL endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_query_url")]
    pub query_url: String,
    /// Defaults to the query URL for stores serving both on one path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_query_url() -> String {
    "http://localhost:7878/query".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_validate_on_register() -> bool {
    true
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            query_url: default_query_url(),
            update_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Everything a [`Session`](crate::runtime::Session) is configured with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub analysis: AnalysisOptions,
    /// Run integrity checks when a class is registered; violations abort.
    #[serde(default = "default_validate_on_register")]
    pub validate_on_register: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            analysis: AnalysisOptions::default(),
            validate_on_register: default_validate_on_register(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}
