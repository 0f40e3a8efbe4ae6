//! Discovery Engine Wire Format
//!
//! Request and response bodies of the chat-UI agents API. Requests use the
//! snake_case field names the API accepts; responses come back camelCase, so
//! both spellings are accepted on the way in.

use serde::{Deserialize, Serialize};

use crate::agent::resource::ResourceIdentifier;
use crate::connection::platform::{AgentMetadata, Registration};

/// Agent resource as sent to and returned by the agents endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "adk_agent_definition", alias = "adkAgentDefinition", default)]
    pub adk_agent_definition: Option<AdkAgentDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdkAgentDefinition {
    #[serde(alias = "toolSettings", default)]
    pub tool_settings: ToolSettings,
    #[serde(alias = "provisionedReasoningEngine")]
    pub provisioned_reasoning_engine: ProvisionedReasoningEngine,
    #[serde(default)]
    pub authorizations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(alias = "toolDescription", default)]
    pub tool_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedReasoningEngine {
    #[serde(alias = "reasoningEngine")]
    pub reasoning_engine: String,
}

/// Page of the agents list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsResponse {
    #[serde(default)]
    pub agents: Vec<AgentResource>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Google API error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl AgentResource {
    /// Registration request body for `resource`
    pub fn for_registration(resource: &ResourceIdentifier, metadata: &AgentMetadata) -> Self {
        Self {
            name: None,
            display_name: metadata.display_name.clone(),
            description: metadata.description.clone(),
            adk_agent_definition: Some(AdkAgentDefinition {
                tool_settings: ToolSettings {
                    tool_description: metadata.tool_description.clone(),
                },
                provisioned_reasoning_engine: ProvisionedReasoningEngine {
                    reasoning_engine: resource.to_string(),
                },
                authorizations: metadata.authorizations.clone(),
            }),
        }
    }

    /// Convert a response body into a registration. Agents that are not
    /// backed by a reasoning engine, or carry no name, yield `None`.
    pub fn into_registration(self) -> Option<Registration> {
        let name = self.name?;
        let definition = self.adk_agent_definition?;
        let agent_id = name.rsplit('/').next()?.to_string();
        if agent_id.is_empty() {
            return None;
        }

        Some(Registration {
            agent_id,
            name,
            reasoning_engine: definition.provisioned_reasoning_engine.reasoning_engine,
            metadata: AgentMetadata {
                display_name: self.display_name,
                description: self.description,
                tool_description: definition.tool_settings.tool_description,
                authorizations: definition.authorizations,
            },
        })
    }
}
