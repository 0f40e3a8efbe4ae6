//! Discovery Engine Client
//!
//! Implementation of ChatUiPlatform over the Discovery Engine agents API
//! that backs the enterprise chat UI.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::resource::ResourceIdentifier;
use crate::auth::TokenSource;
use crate::connection::platform::{AgentMetadata, ChatUiPlatform, RegisterOutcome, Registration};
use crate::connection::protocol::{AgentResource, ListAgentsResponse};
use crate::env::{keys, EnvStore};
use crate::error::{MaplinkError, PlatformError, Result};
use crate::http::{build_client, check_status, transport_error};
use crate::runtime::adapter::{PlatformResult, Removal};

const DISCOVERY_ENDPOINT: &str = "https://discoveryengine.googleapis.com/v1alpha";
const CONSOLE_URL: &str = "https://console.cloud.google.com";
const PAGE_SIZE: &str = "100";

/// Connection settings for the agents API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub project_number: String,
    pub app_id: String,
    pub collection: String,
    pub assistant: String,
    pub endpoint: String,
    pub console_url: String,
    pub request_timeout: Duration,
}

impl DiscoveryConfig {
    pub fn new(project_number: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            project_number: project_number.into(),
            app_id: app_id.into(),
            collection: keys::DEFAULT_COLLECTION.to_string(),
            assistant: keys::DEFAULT_ASSISTANT.to_string(),
            endpoint: DISCOVERY_ENDPOINT.to_string(),
            console_url: CONSOLE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// App coordinates from the env file
    pub fn from_store(store: &EnvStore) -> Result<Self> {
        store.require(&[keys::PROJECT_NUMBER, keys::APP_ID])?;
        let mut config = Self::new(
            store.get_or(keys::PROJECT_NUMBER, ""),
            store.get_or(keys::APP_ID, ""),
        );
        config.collection = store
            .get_or(keys::COLLECTION, keys::DEFAULT_COLLECTION)
            .to_string();
        config.assistant = store
            .get_or(keys::ASSISTANT, keys::DEFAULT_ASSISTANT)
            .to_string();
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_console_url(mut self, console_url: impl Into<String>) -> Self {
        self.console_url = console_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Collection URL of the assistant's agents
    pub fn agents_url(&self) -> String {
        format!(
            "{}/projects/{}/locations/global/collections/{}/engines/{}/assistants/{}/agents",
            self.endpoint.trim_end_matches('/'),
            self.project_number,
            self.collection,
            self.app_id,
            self.assistant
        )
    }

    pub fn agent_url(&self, agent_id: &str) -> String {
        format!("{}/{agent_id}", self.agents_url())
    }

    /// Console page of the chat-UI app, pointing at `resource`
    pub fn app_url(&self, project_id: &str, resource: &ResourceIdentifier) -> Option<String> {
        let base = format!(
            "{}/gen-ai-studio/agentspace/apps/{}",
            self.console_url.trim_end_matches('/'),
            self.app_id
        );
        let mut url = Url::parse(&base).ok()?;
        url.query_pairs_mut()
            .append_pair("project", project_id)
            .append_pair("reasoningEngine", &resource.to_string());
        Some(url.to_string())
    }
}

/// Discovery Engine agents client
pub struct DiscoveryEngineClient {
    client: Client,
    config: DiscoveryConfig,
    tokens: Arc<TokenSource>,
}

impl DiscoveryEngineClient {
    pub fn new(config: DiscoveryConfig, tokens: Arc<TokenSource>) -> Result<Self> {
        let client = build_client(config.request_timeout)
            .map_err(|e| MaplinkError::remote("build HTTP client", 1, e))?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    async fn send(&self, request: RequestBuilder) -> PlatformResult<reqwest::Response> {
        let token = self.tokens.token().await?;
        let project = HeaderValue::from_str(&self.config.project_number)
            .map_err(|e| PlatformError::Decode(format!("invalid project number header: {e}")))?;

        let response = request
            .bearer_auth(token)
            .header("X-Goog-User-Project", project)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate();
        }
        check_status(response).await
    }

    async fn agent(&self, request: RequestBuilder) -> PlatformResult<Registration> {
        let resource: AgentResource = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        resource
            .into_registration()
            .ok_or_else(|| PlatformError::Decode("agent response is missing its name or engine".into()))
    }
}

#[async_trait]
impl ChatUiPlatform for DiscoveryEngineClient {
    fn platform_type(&self) -> &str {
        "discovery-engine"
    }

    async fn register_agent(
        &self,
        resource: &ResourceIdentifier,
        metadata: &AgentMetadata,
    ) -> PlatformResult<RegisterOutcome> {
        // The API accepts duplicate registrations, so check first
        if let Some(existing) = self.find_registration(resource).await? {
            debug!(agent_id = %existing.agent_id, "Resource already registered");
            return Ok(RegisterOutcome::Conflict);
        }

        let body = AgentResource::for_registration(resource, metadata);
        let request = self.client.post(self.config.agents_url()).json(&body);
        match self.agent(request).await {
            Ok(registration) => {
                info!(agent_id = %registration.agent_id, "Agent registered");
                Ok(RegisterOutcome::Registered(registration))
            }
            Err(PlatformError::Status { status: 409, .. }) => Ok(RegisterOutcome::Conflict),
            Err(e) => Err(e),
        }
    }

    async fn deregister_agent(&self, agent_id: &str) -> PlatformResult<Removal> {
        let request = self.client.delete(self.config.agent_url(agent_id));
        match self.send(request).await {
            Ok(_) => Ok(Removal::Removed),
            Err(PlatformError::Status { status: 404, .. }) => Ok(Removal::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn get_registration(&self, agent_id: &str) -> PlatformResult<Option<Registration>> {
        let request = self.client.get(self.config.agent_url(agent_id));
        match self.agent(request).await {
            Ok(registration) => Ok(Some(registration)),
            Err(PlatformError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_registration(
        &self,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<Option<Registration>> {
        let engine = resource.to_string();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.config.agents_url())
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: ListAgentsResponse = self
                .send(request)
                .await?
                .json()
                .await
                .map_err(transport_error)?;

            let found = page
                .agents
                .into_iter()
                .filter_map(AgentResource::into_registration)
                .find(|registration| registration.reasoning_engine == engine);
            if found.is_some() {
                return Ok(found);
            }

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(None),
            }
        }
    }

    fn derive_url(
        &self,
        project_id: &str,
        _region: &str,
        resource: &ResourceIdentifier,
        _agent_id: &str,
    ) -> Option<String> {
        self.config.app_url(project_id, resource)
    }

    async fn resolve_url(
        &self,
        project_id: &str,
        _region: &str,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<String> {
        self.config
            .app_url(project_id, resource)
            .ok_or_else(|| PlatformError::Decode(format!("invalid console URL {}", self.config.console_url)))
    }
}
