//! Integration State
//!
//! The link state machine and the integration record persisted in the env
//! store. The store is the record: there is no other copy.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use tracing::warn;

use crate::agent::resource::ResourceIdentifier;
use crate::connection::platform::AgentMetadata;
use crate::env::{keys, EnvStore};
use crate::error::{MaplinkError, Result};

/// Represents the link states of a deployed agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not registered with the chat UI
    Unlinked,
    /// Registered, not yet checked against the live registration
    Linked,
    /// The live registration was missing or did not match
    VerificationFailed,
    /// The live registration matched the record
    Verified,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Unlinked => write!(f, "Unlinked"),
            LinkStatus::Linked => write!(f, "Linked"),
            LinkStatus::VerificationFailed => write!(f, "VerificationFailed"),
            LinkStatus::Verified => write!(f, "Verified"),
        }
    }
}

impl FromStr for LinkStatus {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim() {
            "Unlinked" => Ok(LinkStatus::Unlinked),
            "Linked" => Ok(LinkStatus::Linked),
            "VerificationFailed" => Ok(LinkStatus::VerificationFailed),
            "Verified" => Ok(LinkStatus::Verified),
            other => Err(format!("unknown link status `{other}`")),
        }
    }
}

impl LinkStatus {
    /// Check if a state transition is valid
    pub fn can_transition_to(self, to: LinkStatus) -> bool {
        // Any state may be unlinked, and re-checking is always allowed
        if to == LinkStatus::Unlinked || self == to {
            return true;
        }

        matches!(
            (self, to),
            (LinkStatus::Unlinked, LinkStatus::Linked)
                | (LinkStatus::VerificationFailed, LinkStatus::Linked)
                | (LinkStatus::Linked, LinkStatus::Verified)
                | (LinkStatus::Linked, LinkStatus::VerificationFailed)
                | (LinkStatus::VerificationFailed, LinkStatus::Verified)
                | (LinkStatus::Verified, LinkStatus::VerificationFailed)
        )
    }

    /// Whether a registration is believed to exist remotely
    pub fn is_linked(self) -> bool {
        matches!(self, LinkStatus::Linked | LinkStatus::Verified)
    }
}

/// Link record of one resource identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationRecord {
    pub resource: ResourceIdentifier,
    pub status: LinkStatus,
    pub metadata: AgentMetadata,
    /// Chat-UI side id of the registration
    pub agent_id: Option<String>,
    /// Present only while Linked or Verified
    pub ui_url: Option<String>,
    pub linked_at: Option<DateTime<Utc>>,
}

impl IntegrationRecord {
    /// Fresh, unlinked record for `resource`
    pub fn unlinked(resource: ResourceIdentifier, metadata: AgentMetadata) -> Self {
        Self {
            resource,
            status: LinkStatus::Unlinked,
            metadata,
            agent_id: None,
            ui_url: None,
            linked_at: None,
        }
    }

    /// Read the record from `store`. `None` until a resource identifier exists.
    pub fn load(store: &EnvStore) -> Result<Option<Self>> {
        let Some(raw) = store
            .get(keys::LINKED_RESOURCE)
            .or_else(|| store.get(keys::RESOURCE_NAME))
        else {
            return Ok(None);
        };
        let resource: ResourceIdentifier = raw.parse()?;

        let agent_id = store.get(keys::AGENT_ID).map(str::to_string);
        let status = match store.get(keys::LINK_STATUS) {
            Some(value) => value.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Treating unreadable link status as Unlinked");
                LinkStatus::Unlinked
            }),
            // Env files written before status tracking only carry the agent id
            None if agent_id.is_some() => LinkStatus::Linked,
            None => LinkStatus::Unlinked,
        };

        let linked_at = store
            .get(keys::LINKED_AT)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc));

        Ok(Some(Self {
            resource,
            status,
            metadata: linked_metadata(store).unwrap_or_else(|| metadata_from_store(store)),
            agent_id,
            ui_url: store.get(keys::UI_URL).map(str::to_string),
            linked_at,
        }))
    }

    /// Write the record into `store` (not flushed)
    pub fn save(&self, store: &mut EnvStore) {
        store.set(keys::LINK_STATUS, self.status.to_string());

        if self.status == LinkStatus::Unlinked {
            for key in LINKED_KEYS {
                store.remove(key);
            }
        } else {
            store.set(keys::LINKED_RESOURCE, self.resource.to_string());
            store.set(keys::LINKED_DISPLAY_NAME, self.metadata.display_name.clone());
            store.set(keys::LINKED_DESCRIPTION, self.metadata.description.clone());
            store.set(
                keys::LINKED_TOOL_DESCRIPTION,
                self.metadata.tool_description.clone(),
            );
            if self.metadata.authorizations.is_empty() {
                store.remove(keys::LINKED_AUTHORIZATIONS);
            } else {
                store.set(keys::LINKED_AUTHORIZATIONS, self.metadata.authorizations.join(","));
            }
        }

        match &self.agent_id {
            Some(agent_id) => store.set(keys::AGENT_ID, agent_id.clone()),
            None => store.remove(keys::AGENT_ID),
        }
        match (&self.ui_url, self.status.is_linked()) {
            (Some(url), true) => store.set(keys::UI_URL, url.clone()),
            _ => store.remove(keys::UI_URL),
        }
        match self.linked_at {
            Some(at) => store.set(keys::LINKED_AT, at.to_rfc3339()),
            None => store.remove(keys::LINKED_AT),
        }
    }

    /// Move to `to`, enforcing the transition table
    pub fn transition_to(&mut self, to: LinkStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(MaplinkError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to == LinkStatus::Unlinked {
            self.agent_id = None;
            self.ui_url = None;
            self.linked_at = None;
        }
        Ok(())
    }

    /// Whether this record already links `resource` with `metadata`
    pub fn links(&self, resource: &ResourceIdentifier, metadata: &AgentMetadata) -> bool {
        self.status.is_linked() && self.resource == *resource && self.metadata == *metadata
    }
}

/// Keys written only by the record itself
const LINKED_KEYS: [&str; 5] = [
    keys::LINKED_RESOURCE,
    keys::LINKED_DISPLAY_NAME,
    keys::LINKED_DESCRIPTION,
    keys::LINKED_TOOL_DESCRIPTION,
    keys::LINKED_AUTHORIZATIONS,
];

/// Metadata the current registration was made with. `None` for records
/// written before these keys existed.
fn linked_metadata(store: &EnvStore) -> Option<AgentMetadata> {
    let display_name = store.get(keys::LINKED_DISPLAY_NAME)?;
    Some(AgentMetadata {
        display_name: display_name.to_string(),
        description: store.get_or(keys::LINKED_DESCRIPTION, "").to_string(),
        tool_description: store.get_or(keys::LINKED_TOOL_DESCRIPTION, "").to_string(),
        authorizations: store
            .get_or(keys::LINKED_AUTHORIZATIONS, "")
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Link metadata requested by the env file, falling back to the defaults
pub fn metadata_from_store(store: &EnvStore) -> AgentMetadata {
    let authorizations = match (store.get(keys::OAUTH_AUTH_ID), store.get(keys::PROJECT_NUMBER)) {
        (Some(auth_id), Some(number)) => vec![format!(
            "projects/{number}/locations/global/authorizations/{auth_id}"
        )],
        _ => Vec::new(),
    };

    AgentMetadata {
        display_name: store
            .get_or(keys::DISPLAY_NAME, keys::DEFAULT_DISPLAY_NAME)
            .to_string(),
        description: store
            .get_or(keys::DESCRIPTION, keys::DEFAULT_DESCRIPTION)
            .to_string(),
        tool_description: store
            .get_or(keys::TOOL_DESCRIPTION, keys::DEFAULT_TOOL_DESCRIPTION)
            .to_string(),
        authorizations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE: &str = "projects/123/locations/us-central1/reasoningEngines/abc";

    #[test]
    fn test_valid_transitions() {
        use LinkStatus::*;

        assert!(Unlinked.can_transition_to(Linked));
        assert!(Linked.can_transition_to(Verified));
        assert!(Linked.can_transition_to(VerificationFailed));
        assert!(VerificationFailed.can_transition_to(Verified));
        assert!(VerificationFailed.can_transition_to(Linked));
        assert!(Verified.can_transition_to(Unlinked));

        assert!(!Unlinked.can_transition_to(Verified));
        assert!(!Unlinked.can_transition_to(VerificationFailed));
        assert!(!Verified.can_transition_to(Linked));
    }

    #[test]
    fn test_no_record_before_first_deploy() {
        let store = EnvStore::from_str_in_memory("GOOGLE_CLOUD_PROJECT=maps-demo\n");
        assert!(IntegrationRecord::load(&store).unwrap().is_none());
    }

    #[test]
    fn test_legacy_agent_id_reads_as_linked() {
        let store = EnvStore::from_str_in_memory(&format!(
            "AGENT_ENGINE_RESOURCE_NAME={RESOURCE}\nAGENTSPACE_AGENT_ID=987\n"
        ));
        let record = IntegrationRecord::load(&store).unwrap().unwrap();
        assert_eq!(record.status, LinkStatus::Linked);
        assert_eq!(record.agent_id.as_deref(), Some("987"));
        assert_eq!(record.metadata.display_name, keys::DEFAULT_DISPLAY_NAME);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut store = EnvStore::in_memory();
        let mut record = IntegrationRecord::unlinked(
            RESOURCE.parse().unwrap(),
            metadata_from_store(&store),
        );
        record.transition_to(LinkStatus::Linked).unwrap();
        record.agent_id = Some("agent-1".into());
        record.ui_url = Some("https://example.test/ui".into());
        record.linked_at = Some(Utc::now());
        record.save(&mut store);

        let loaded = IntegrationRecord::load(&store).unwrap().unwrap();
        assert_eq!(loaded.status, LinkStatus::Linked);
        assert_eq!(loaded.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(loaded.ui_url.as_deref(), Some("https://example.test/ui"));
        assert_eq!(store.get(keys::LINKED_RESOURCE), Some(RESOURCE));
    }

    #[test]
    fn test_unlinking_clears_link_fields() {
        let mut store = EnvStore::in_memory();
        store.set(keys::RESOURCE_NAME, RESOURCE);
        let mut record = IntegrationRecord::unlinked(
            RESOURCE.parse().unwrap(),
            metadata_from_store(&store),
        );
        record.transition_to(LinkStatus::Linked).unwrap();
        record.agent_id = Some("agent-1".into());
        record.ui_url = Some("https://example.test/ui".into());
        record.save(&mut store);

        record.transition_to(LinkStatus::Unlinked).unwrap();
        record.save(&mut store);

        assert_eq!(store.get(keys::AGENT_ID), None);
        assert_eq!(store.get(keys::UI_URL), None);
        assert_eq!(store.get(keys::LINK_STATUS), Some("Unlinked"));
        assert_eq!(store.get(keys::RESOURCE_NAME), Some(RESOURCE));
    }

    #[test]
    fn test_record_keeps_metadata_apart_from_inputs() {
        let mut store = EnvStore::from_str_in_memory(&format!(
            "AGENT_ENGINE_RESOURCE_NAME={RESOURCE}\nAGENT_DISPLAY_NAME=\"Maps Assistant\"\n"
        ));
        let mut record = IntegrationRecord::unlinked(
            RESOURCE.parse().unwrap(),
            metadata_from_store(&store),
        );
        record.transition_to(LinkStatus::Linked).unwrap();
        record.agent_id = Some("agent-1".into());
        record.save(&mut store);

        store.set(keys::DISPLAY_NAME, "Route Planner");

        let loaded = IntegrationRecord::load(&store).unwrap().unwrap();
        assert_eq!(loaded.metadata.display_name, "Maps Assistant");
        assert_eq!(metadata_from_store(&store).display_name, "Route Planner");
        assert_eq!(store.get(keys::LINKED_DISPLAY_NAME), Some("Maps Assistant"));
    }

    #[test]
    fn test_unlinked_record_drops_linked_metadata() {
        let mut store = EnvStore::from_str_in_memory("GCP_PROJECT_NUMBER=123\nOAUTH_AUTH_ID=maps-auth\n");
        let mut record = IntegrationRecord::unlinked(
            RESOURCE.parse().unwrap(),
            metadata_from_store(&store),
        );
        record.transition_to(LinkStatus::Linked).unwrap();
        record.save(&mut store);
        assert_eq!(
            store.get(keys::LINKED_AUTHORIZATIONS),
            Some("projects/123/locations/global/authorizations/maps-auth")
        );
        let loaded = IntegrationRecord::load(&store).unwrap().unwrap();
        assert_eq!(loaded.metadata, record.metadata);

        record.transition_to(LinkStatus::Unlinked).unwrap();
        record.save(&mut store);
        for key in LINKED_KEYS {
            assert_eq!(store.get(key), None, "{key} left behind");
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut record = IntegrationRecord::unlinked(
            RESOURCE.parse().unwrap(),
            metadata_from_store(&EnvStore::in_memory()),
        );
        let err = record.transition_to(LinkStatus::Verified).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
        assert_eq!(record.status, LinkStatus::Unlinked);
    }

    #[test]
    fn test_oauth_authorization_is_attached() {
        let store = EnvStore::from_str_in_memory("GCP_PROJECT_NUMBER=123\nOAUTH_AUTH_ID=maps-auth\n");
        let metadata = metadata_from_store(&store);
        assert_eq!(
            metadata.authorizations,
            vec!["projects/123/locations/global/authorizations/maps-auth"]
        );
    }
}
