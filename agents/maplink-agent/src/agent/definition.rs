//! Agent Definition
//!
//! The opaque description of the maps assistant that gets packaged and
//! shipped: model, identity, instructions and the tool providers it uses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::env::keys;

/// Environment variable the maps MCP server reads its key from
pub const MAPS_API_KEY_VAR: &str = "GOOGLE_MAPS_API_KEY";

const MAPS_ASSISTANT_INSTRUCTION: &str = "You are a Google Maps assistant with access to mapping and location tools.

YOUR CAPABILITIES:
- Search for places and locations
- Get directions between locations
- Geocode addresses to coordinates
- Find nearby points of interest

WORKFLOW:
1. When users ask about locations or directions, use the Google Maps MCP tools
2. Provide clear, actionable guidance with addresses and navigation instructions
3. Include relevant details like distance, travel time, and route information

Always provide helpful location information and navigation guidance.";

/// Immutable agent description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    model: String,
    name: String,
    description: String,
    instruction: String,
    tools: Vec<ToolReference>,
}

impl AgentDefinition {
    pub fn new(
        model: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        instruction: impl Into<String>,
        tools: Vec<ToolReference>,
    ) -> Self {
        Self {
            model: model.into(),
            name: name.into(),
            description: description.into(),
            instruction: instruction.into(),
            tools,
        }
    }

    /// The maps assistant wired to the given toolset
    pub fn maps_assistant(model: Option<&str>, toolset: &MapsToolset) -> Self {
        Self::new(
            model.unwrap_or(keys::DEFAULT_MODEL),
            "maps_assistant_agent",
            "Google Maps assistant with MCP toolset for location search, directions, and geocoding.",
            MAPS_ASSISTANT_INSTRUCTION,
            vec![toolset.reference()],
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Registered tools, in registration order
    pub fn tools(&self) -> &[ToolReference] {
        &self.tools
    }
}

/// Reference to a tool provider registered with the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolReference {
    /// MCP server spoken to over stdio
    McpStdio {
        name: String,
        command: String,
        args: Vec<String>,
        /// Names of env vars the server needs; values are injected at runtime
        env: Vec<String>,
        timeout_secs: u64,
    },
}

impl ToolReference {
    pub fn name(&self) -> &str {
        match self {
            ToolReference::McpStdio { name, .. } => name,
        }
    }
}

/// Runtime toolchain a tool provider needs on the execution image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredToolchain {
    /// Node.js with `npx`
    NodeJs,
}

/// The Google Maps MCP toolset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsToolset {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl MapsToolset {
    /// `npx -y @modelcontextprotocol/server-google-maps` with the given key
    pub fn new(api_key: Option<&str>) -> Self {
        let mut env = BTreeMap::new();
        if let Some(key) = api_key {
            env.insert(MAPS_API_KEY_VAR.to_string(), key.to_string());
        }
        Self {
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-google-maps".to_string(),
            ],
            env,
            timeout_secs: 15,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.env.get(MAPS_API_KEY_VAR).map(String::as_str)
    }

    pub fn toolchain(&self) -> RequiredToolchain {
        RequiredToolchain::NodeJs
    }

    /// Reference recorded in the agent definition. Secret values stay out.
    pub fn reference(&self) -> ToolReference {
        ToolReference::McpStdio {
            name: "google_maps".to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.keys().cloned().collect(),
            timeout_secs: self.timeout_secs,
        }
    }
}
