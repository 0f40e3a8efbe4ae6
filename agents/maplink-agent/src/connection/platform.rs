//! Chat-UI Platform Trait
//!
//! Contract of the enterprise chat-UI service that exposes a deployed agent
//! to end users: register, deregister, read back a registration, and resolve
//! the UI address.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::resource::ResourceIdentifier;
use crate::runtime::adapter::{PlatformResult, Removal};

/// Metadata the chat UI shows for a linked agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub display_name: String,
    pub description: String,
    pub tool_description: String,
    /// Full authorization resource names attached to the agent
    #[serde(default)]
    pub authorizations: Vec<String>,
}

/// A live registration as the platform reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Platform-assigned id (last segment of `name`)
    pub agent_id: String,
    /// Full resource name of the registration
    pub name: String,
    /// Reasoning engine the registration points at, as reported
    pub reasoning_engine: String,
    pub metadata: AgentMetadata,
}

impl Registration {
    /// Whether this registration points at `resource` with exactly `metadata`
    pub fn matches(&self, resource: &ResourceIdentifier, metadata: &AgentMetadata) -> bool {
        self.reasoning_engine == resource.to_string()
            && self.metadata.display_name == metadata.display_name
            && self.metadata.description == metadata.description
            && self.metadata.tool_description == metadata.tool_description
    }
}

/// Outcome of a register call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(Registration),
    /// The resource is already registered under another configuration
    Conflict,
}

/// Chat-UI platform adapter trait
#[async_trait]
pub trait ChatUiPlatform: Send + Sync {
    /// Platform name for logs
    fn platform_type(&self) -> &str;

    /// Register `resource` so end users can reach it
    async fn register_agent(
        &self,
        resource: &ResourceIdentifier,
        metadata: &AgentMetadata,
    ) -> PlatformResult<RegisterOutcome>;

    /// Remove a registration. Absence is not an error.
    async fn deregister_agent(&self, agent_id: &str) -> PlatformResult<Removal>;

    /// Read a registration by its platform id
    async fn get_registration(&self, agent_id: &str) -> PlatformResult<Option<Registration>>;

    /// Find the registration that points at `resource`, if any
    async fn find_registration(
        &self,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<Option<Registration>>;

    /// UI address derived without a remote call, when the platform uses a
    /// predictable scheme
    fn derive_url(
        &self,
        _project_id: &str,
        _region: &str,
        _resource: &ResourceIdentifier,
        _agent_id: &str,
    ) -> Option<String> {
        None
    }

    /// UI address fetched from the platform
    async fn resolve_url(
        &self,
        project_id: &str,
        region: &str,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<String>;
}
