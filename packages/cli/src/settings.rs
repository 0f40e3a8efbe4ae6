//! CLI Settings
//!
//! Tool settings stored in ~/.maplink/config.toml. Every field has a
//! default, so a missing file or a partial one is fine.

use anyhow::{Context, Result};
use maplink_agent::retry::{PollPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub endpoints: Endpoints,

    #[serde(default)]
    pub poll: PollPolicy,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Message sent by `test-query` and `deploy --smoke`
    #[serde(default = "default_smoke_query")]
    pub smoke_query: String,

    /// Log filter used when neither RUST_LOG nor --verbose is given
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// API base URL overrides; unset fields use the public Google endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub vertex: Option<String>,
    pub storage: Option<String>,
    pub discovery: Option<String>,
    pub console: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_smoke_query() -> String {
    "How long does it take to drive from Mountain View to San Francisco?".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            smoke_query: default_smoke_query(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Default settings path (~/.maplink/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".maplink").join("config.toml"))
    }

    /// Load from `path`, or from the default path when none is given.
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                Self::read(&path)
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
