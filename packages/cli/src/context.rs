//! Command Context
//!
//! Wires settings, the env file and access tokens into the platform clients
//! each command needs.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use maplink_agent::auth::TokenSource;
use maplink_agent::connection::discovery::DiscoveryConfig;
use maplink_agent::runtime::vertex::VertexConfig;
use maplink_agent::{DeploymentClient, DiscoveryEngineClient, EnvStore, IntegrationManager, VertexAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::settings::Settings;

pub struct AppContext {
    pub settings: Settings,
    pub env_file: PathBuf,
    tokens: Arc<TokenSource>,
}

impl AppContext {
    pub fn new(settings: Settings, env_file: PathBuf) -> Self {
        Self {
            settings,
            env_file,
            tokens: Arc::new(TokenSource::from_env()),
        }
    }

    /// Current contents of the env file; missing file = empty record
    pub fn store(&self) -> Result<EnvStore> {
        Ok(EnvStore::load(&self.env_file)?)
    }

    /// Deployment client for the Vertex AI project named in `store`
    pub fn deployments(&self, store: &EnvStore) -> Result<DeploymentClient<VertexAdapter>> {
        let endpoints = &self.settings.endpoints;
        let mut config = VertexConfig::from_store(store)?
            .with_api_endpoint(endpoints.vertex.clone())
            .with_request_timeout(self.settings.request_timeout());
        if let Some(storage) = &endpoints.storage {
            config = config.with_storage_endpoint(storage.clone());
        }

        let adapter = VertexAdapter::new(config, self.tokens.clone())?;
        Ok(DeploymentClient::new(Arc::new(adapter))
            .with_retry_policy(self.settings.retry.clone())
            .with_poll_policy(self.settings.poll.clone()))
    }

    /// Integration manager for the chat-UI app named in `store`
    pub fn integrations(&self, store: &EnvStore) -> Result<IntegrationManager<DiscoveryEngineClient>> {
        let endpoints = &self.settings.endpoints;
        let mut config =
            DiscoveryConfig::from_store(store)?.with_request_timeout(self.settings.request_timeout());
        if let Some(endpoint) = &endpoints.discovery {
            config = config.with_endpoint(endpoint.clone());
        }
        if let Some(console) = &endpoints.console {
            config = config.with_console_url(console.clone());
        }

        let client = DiscoveryEngineClient::new(config, self.tokens.clone())?;
        Ok(IntegrationManager::new(Arc::new(client)).with_retry_policy(self.settings.retry.clone()))
    }
}

/// Spinner in the CLI's house style, already ticking
pub fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.blue} {msg}")?,
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
