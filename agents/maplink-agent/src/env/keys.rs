//! Recognized env file keys and their defaults

pub const PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT";
pub const PROJECT_NUMBER: &str = "GCP_PROJECT_NUMBER";
pub const LOCATION: &str = "GOOGLE_CLOUD_LOCATION";
pub const STAGING_BUCKET: &str = "GOOGLE_CLOUD_STORAGE_BUCKET";
pub const MAPS_API_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const MODEL: &str = "MODEL";

pub const RESOURCE_NAME: &str = "AGENT_ENGINE_RESOURCE_NAME";

pub const APP_ID: &str = "AGENTSPACE_APP_ID";
pub const COLLECTION: &str = "AGENTSPACE_COLLECTION";
pub const ASSISTANT: &str = "AGENTSPACE_ASSISTANT";
pub const OAUTH_AUTH_ID: &str = "OAUTH_AUTH_ID";

pub const DISPLAY_NAME: &str = "AGENT_DISPLAY_NAME";
pub const DESCRIPTION: &str = "AGENT_DESCRIPTION";
pub const TOOL_DESCRIPTION: &str = "AGENT_TOOL_DESCRIPTION";

// Integration record
pub const AGENT_ID: &str = "AGENTSPACE_AGENT_ID";
pub const LINK_STATUS: &str = "AGENTSPACE_LINK_STATUS";
pub const LINKED_RESOURCE: &str = "AGENTSPACE_LINKED_RESOURCE";
pub const UI_URL: &str = "AGENTSPACE_UI_URL";
pub const LINKED_AT: &str = "AGENTSPACE_LINKED_AT";
/// Metadata the registration was made with; operators edit the `AGENT_*` inputs
pub const LINKED_DISPLAY_NAME: &str = "AGENTSPACE_LINKED_DISPLAY_NAME";
pub const LINKED_DESCRIPTION: &str = "AGENTSPACE_LINKED_DESCRIPTION";
pub const LINKED_TOOL_DESCRIPTION: &str = "AGENTSPACE_LINKED_TOOL_DESCRIPTION";
pub const LINKED_AUTHORIZATIONS: &str = "AGENTSPACE_LINKED_AUTHORIZATIONS";

pub const DEFAULT_COLLECTION: &str = "default_collection";
pub const DEFAULT_ASSISTANT: &str = "default_assistant";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_DISPLAY_NAME: &str = "Google Maps MCP Agent";
pub const DEFAULT_DESCRIPTION: &str =
    "AI-powered assistant for Google Maps location search, directions, and geocoding";
pub const DEFAULT_TOOL_DESCRIPTION: &str =
    "Google Maps tools for location search, directions, and address lookup";

/// Keys `deploy` cannot run without
pub const DEPLOY_REQUIRED: &[&str] = &[PROJECT_ID, LOCATION, STAGING_BUCKET, MAPS_API_KEY];

/// Keys every chat-UI operation needs
pub const INTEGRATION_REQUIRED: &[&str] =
    &[PROJECT_ID, PROJECT_NUMBER, APP_ID, RESOURCE_NAME, LOCATION];

/// Keys operations on an existing link need; the record names the resource
pub const LINKED_REQUIRED: &[&str] = &[PROJECT_ID, PROJECT_NUMBER, APP_ID, LOCATION];
