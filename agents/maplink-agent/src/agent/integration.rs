//! Integration Manager
//!
//! Links a deployed agent into the chat UI and keeps the integration record
//! in the env store in step with the remote registration. Remote state is
//! changed first; the record is only written once the platform confirmed.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::resource::ResourceIdentifier;
use crate::agent::state::{metadata_from_store, IntegrationRecord, LinkStatus};
use crate::clock::{Clock, SystemClock};
use crate::connection::platform::{AgentMetadata, ChatUiPlatform, RegisterOutcome, Registration};
use crate::env::{keys, EnvStore};
use crate::error::{MaplinkError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::runtime::adapter::Removal;

/// Parameters of one `link` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub resource: ResourceIdentifier,
    pub metadata: AgentMetadata,
    /// Replace a registration that differs from the requested one
    pub overwrite: bool,
}

impl LinkRequest {
    pub fn new(resource: ResourceIdentifier, metadata: AgentMetadata) -> Self {
        Self {
            resource,
            metadata,
            overwrite: false,
        }
    }

    /// Request for the deployed resource in `store`, with metadata from the
    /// env file or the defaults
    pub fn from_store(store: &EnvStore) -> Result<Self> {
        let raw = store.get(keys::RESOURCE_NAME).ok_or_else(|| MaplinkError::MissingConfig {
            keys: vec![keys::RESOURCE_NAME.to_string()],
        })?;
        Ok(Self::new(raw.parse()?, metadata_from_store(store)))
    }

    pub fn display_name(mut self, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.metadata.display_name = value;
        }
        self
    }

    pub fn description(mut self, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.metadata.description = value;
        }
        self
    }

    pub fn tool_description(mut self, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.metadata.tool_description = value;
        }
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Result of a successful `link`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new registration was created
    Linked(IntegrationRecord),
    /// The record already linked this resource with these parameters
    Unchanged(IntegrationRecord),
    /// A previous link was removed first
    Relinked {
        previous: ResourceIdentifier,
        record: IntegrationRecord,
    },
}

impl LinkOutcome {
    pub fn record(&self) -> &IntegrationRecord {
        match self {
            LinkOutcome::Linked(record)
            | LinkOutcome::Unchanged(record)
            | LinkOutcome::Relinked { record, .. } => record,
        }
    }
}

/// Result of a successful `unlink`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Unlinked,
    /// Nothing was registered remotely any more
    AlreadyAbsent,
}

/// Why a registration did not verify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyMismatch {
    /// The record has no agent id to look up
    NoAgentId,
    /// The platform has no registration under the recorded id
    Absent,
    /// The registration exists but these fields differ
    Differs(Vec<&'static str>),
}

impl std::fmt::Display for VerifyMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyMismatch::NoAgentId => write!(f, "record carries no agent id"),
            VerifyMismatch::Absent => write!(f, "registration no longer exists"),
            VerifyMismatch::Differs(fields) => write!(f, "mismatched {}", fields.join(", ")),
        }
    }
}

/// Result of `verify`. A mismatch is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified(IntegrationRecord),
    Failed {
        record: IntegrationRecord,
        reason: VerifyMismatch,
    },
}

impl VerifyOutcome {
    pub fn record(&self) -> &IntegrationRecord {
        match self {
            VerifyOutcome::Verified(record) | VerifyOutcome::Failed { record, .. } => record,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified(_))
    }
}

/// Resolved chat-UI address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiAddress {
    pub url: String,
    /// False when the link was never verified
    pub verified: bool,
}

/// Manages the chat-UI registration of a deployed agent
pub struct IntegrationManager<C: ChatUiPlatform> {
    platform: Arc<C>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<C: ChatUiPlatform> IntegrationManager<C> {
    pub fn new(platform: Arc<C>) -> Self {
        Self {
            platform,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn platform(&self) -> &Arc<C> {
        &self.platform
    }

    /// Register `request.resource` with the chat UI and record the link
    pub async fn link(&self, store: &mut EnvStore, request: LinkRequest) -> Result<LinkOutcome> {
        let current = IntegrationRecord::load(store)?;
        let mut previous = None;
        let mut status = LinkStatus::Unlinked;

        if let Some(current) = current {
            if current.links(&request.resource, &request.metadata) {
                debug!(resource = %request.resource, "Already linked with identical parameters");
                return Ok(LinkOutcome::Unchanged(current));
            }

            match current.status {
                LinkStatus::Linked | LinkStatus::Verified if current.resource != request.resource => {
                    info!(
                        previous = %current.resource,
                        resource = %request.resource,
                        "Unlinking previous resource before linking the new one"
                    );
                    self.unlink(store).await?;
                    previous = Some(current.resource.clone());
                }
                LinkStatus::Linked | LinkStatus::Verified => {
                    if !request.overwrite {
                        return Err(MaplinkError::AlreadyLinkedElsewhere {
                            resource: request.resource.to_string(),
                            existing: describe(&current.metadata),
                        });
                    }
                    if let Some(agent_id) = &current.agent_id {
                        info!(agent_id = %agent_id, "Removing registration before overwrite");
                        self.deregister(agent_id).await?;
                    }
                }
                LinkStatus::VerificationFailed => {
                    // A stale registration may still exist under the old id
                    if let Some(agent_id) = &current.agent_id {
                        self.deregister(agent_id).await?;
                    }
                    status = LinkStatus::VerificationFailed;
                }
                LinkStatus::Unlinked => {}
            }
        }

        let registration = self.register(&request).await?;

        let mut record = IntegrationRecord::unlinked(request.resource.clone(), request.metadata);
        record.status = status;
        record.transition_to(LinkStatus::Linked)?;
        record.agent_id = Some(registration.agent_id.clone());
        record.linked_at = Some(Utc::now());
        record.save(store);
        store.flush()?;

        info!(
            resource = %record.resource,
            agent_id = %registration.agent_id,
            "Agent linked"
        );
        Ok(match previous {
            Some(previous) => LinkOutcome::Relinked { previous, record },
            None => LinkOutcome::Linked(record),
        })
    }

    async fn register(&self, request: &LinkRequest) -> Result<Registration> {
        if let RegisterOutcome::Registered(registration) = self.register_once(request).await? {
            return Ok(registration);
        }

        let existing = with_retry(&self.retry, self.clock.as_ref(), "find registration", || {
            self.platform.find_registration(&request.resource)
        })
        .await?;

        // A registration left behind by an interrupted unlink is reused as is
        if let Some(existing) = existing
            .as_ref()
            .filter(|existing| existing.matches(&request.resource, &request.metadata))
        {
            info!(agent_id = %existing.agent_id, "Adopting identical remote registration");
            return Ok(existing.clone());
        }

        if !request.overwrite {
            return Err(MaplinkError::AlreadyLinkedElsewhere {
                resource: request.resource.to_string(),
                existing: existing
                    .map(|registration| describe(&registration.metadata))
                    .unwrap_or_else(|| "registered remotely".to_string()),
            });
        }

        if let Some(existing) = existing {
            warn!(
                agent_id = %existing.agent_id,
                display_name = %existing.metadata.display_name,
                "Overwriting remote registration"
            );
            self.deregister(&existing.agent_id).await?;
        }

        match self.register_once(request).await? {
            RegisterOutcome::Registered(registration) => Ok(registration),
            RegisterOutcome::Conflict => Err(MaplinkError::AlreadyLinkedElsewhere {
                resource: request.resource.to_string(),
                existing: "registered remotely".to_string(),
            }),
        }
    }

    async fn register_once(&self, request: &LinkRequest) -> Result<RegisterOutcome> {
        info!(
            platform = %self.platform.platform_type(),
            resource = %request.resource,
            display_name = %request.metadata.display_name,
            "Registering agent"
        );
        with_retry(&self.retry, self.clock.as_ref(), "register agent", || {
            self.platform.register_agent(&request.resource, &request.metadata)
        })
        .await
    }

    async fn deregister(&self, agent_id: &str) -> Result<Removal> {
        let removal = with_retry(&self.retry, self.clock.as_ref(), "deregister agent", || {
            self.platform.deregister_agent(agent_id)
        })
        .await?;
        if removal == Removal::NotFound {
            debug!(agent_id = %agent_id, "Registration already absent");
        }
        Ok(removal)
    }

    /// Remove the registration. The local record becomes Unlinked even when
    /// the remote call fails; that failure is returned afterwards.
    pub async fn unlink(&self, store: &mut EnvStore) -> Result<UnlinkOutcome> {
        let mut record = IntegrationRecord::load(store)?
            .ok_or_else(|| MaplinkError::NotLinked("no deployed resource is recorded".into()))?;

        let Some(agent_id) = record.agent_id.clone() else {
            if record.status != LinkStatus::Unlinked {
                record.transition_to(LinkStatus::Unlinked)?;
                record.save(store);
                store.flush()?;
            }
            return Ok(UnlinkOutcome::AlreadyAbsent);
        };

        let remote = self.deregister(&agent_id).await;

        record.transition_to(LinkStatus::Unlinked)?;
        record.save(store);
        store.flush()?;

        match remote {
            Ok(Removal::Removed) => {
                info!(resource = %record.resource, agent_id = %agent_id, "Agent unlinked");
                Ok(UnlinkOutcome::Unlinked)
            }
            Ok(Removal::NotFound) => {
                info!(agent_id = %agent_id, "Registration was already removed remotely");
                Ok(UnlinkOutcome::AlreadyAbsent)
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Local record reset, remote deregistration failed");
                Err(e)
            }
        }
    }

    /// Compare the live registration against the record. Read-only remotely.
    pub async fn verify(&self, store: &mut EnvStore) -> Result<VerifyOutcome> {
        let mut record = linked_record(store)?;

        let mismatch = match record.agent_id.clone() {
            None => Some(VerifyMismatch::NoAgentId),
            Some(agent_id) => {
                let live = with_retry(&self.retry, self.clock.as_ref(), "get registration", || {
                    self.platform.get_registration(&agent_id)
                })
                .await?;
                match live {
                    None => Some(VerifyMismatch::Absent),
                    Some(live) if live.matches(&record.resource, &record.metadata) => None,
                    Some(live) => Some(VerifyMismatch::Differs(differing_fields(&live, &record))),
                }
            }
        };

        let outcome = match mismatch {
            None => {
                record.transition_to(LinkStatus::Verified)?;
                info!(resource = %record.resource, "Link verified");
                VerifyOutcome::Verified(record)
            }
            Some(reason) => {
                record.transition_to(LinkStatus::VerificationFailed)?;
                record.ui_url = None;
                warn!(resource = %record.resource, reason = %reason, "Link verification failed");
                VerifyOutcome::Failed { record, reason }
            }
        };

        outcome.record().save(store);
        store.flush()?;
        Ok(outcome)
    }

    /// Chat-UI address of the linked agent
    pub async fn url(&self, store: &mut EnvStore) -> Result<UiAddress> {
        let mut record = linked_record(store)?;
        let verified = match record.status {
            LinkStatus::Verified => true,
            LinkStatus::Linked => {
                warn!(resource = %record.resource, "Link has not been verified; run `verify`");
                false
            }
            status => {
                return Err(MaplinkError::NotLinked(format!(
                    "link is {status}; run `link` again"
                )))
            }
        };

        let project_id = store
            .get(keys::PROJECT_ID)
            .unwrap_or(record.resource.project())
            .to_string();
        let region = store
            .get(keys::LOCATION)
            .unwrap_or(record.resource.location())
            .to_string();

        let derived = record.agent_id.as_deref().and_then(|agent_id| {
            self.platform
                .derive_url(&project_id, &region, &record.resource, agent_id)
        });

        let url = match (derived, record.ui_url.clone()) {
            (Some(url), _) => url,
            (None, Some(cached)) => {
                debug!("Using cached chat UI address");
                cached
            }
            (None, None) => {
                with_retry(&self.retry, self.clock.as_ref(), "resolve UI address", || {
                    self.platform.resolve_url(&project_id, &region, &record.resource)
                })
                .await?
            }
        };

        if record.ui_url.as_deref() != Some(url.as_str()) {
            record.ui_url = Some(url.clone());
            record.save(store);
            store.flush()?;
        }
        Ok(UiAddress { url, verified })
    }

    /// Current integration record, if a resource has been deployed
    pub fn status(&self, store: &EnvStore) -> Result<Option<IntegrationRecord>> {
        IntegrationRecord::load(store)
    }
}

fn linked_record(store: &EnvStore) -> Result<IntegrationRecord> {
    match IntegrationRecord::load(store)? {
        Some(record) if record.status != LinkStatus::Unlinked => Ok(record),
        Some(record) => Err(MaplinkError::NotLinked(format!(
            "{} is not linked",
            record.resource
        ))),
        None => Err(MaplinkError::NotLinked("no deployed resource is recorded".into())),
    }
}

fn describe(metadata: &AgentMetadata) -> String {
    format!("display name `{}`", metadata.display_name)
}

fn differing_fields(live: &Registration, record: &IntegrationRecord) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if live.reasoning_engine != record.resource.to_string() {
        fields.push("reasoning engine");
    }
    if live.metadata.display_name != record.metadata.display_name {
        fields.push("display name");
    }
    if live.metadata.description != record.metadata.description {
        fields.push("description");
    }
    if live.metadata.tool_description != record.metadata.tool_description {
        fields.push("tool description");
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::PlatformError;
    use crate::testing::FakeChatUi;

    const RESOURCE: &str = "projects/123/locations/us-central1/reasoningEngines/abc";
    const OTHER: &str = "projects/123/locations/us-central1/reasoningEngines/def";

    fn manager(platform: Arc<FakeChatUi>) -> IntegrationManager<FakeChatUi> {
        IntegrationManager::new(platform).with_clock(Arc::new(ManualClock::new()))
    }

    fn deployed_store() -> EnvStore {
        EnvStore::from_str_in_memory(&format!(
            "GOOGLE_CLOUD_PROJECT=maps-demo\nGOOGLE_CLOUD_LOCATION=us-central1\nAGENT_ENGINE_RESOURCE_NAME={RESOURCE}\n"
        ))
    }

    fn request(store: &EnvStore, display_name: &str) -> LinkRequest {
        LinkRequest::from_store(store)
            .unwrap()
            .display_name(Some(display_name.to_string()))
    }

    async fn link_as(
        manager: &IntegrationManager<FakeChatUi>,
        store: &mut EnvStore,
        display_name: &str,
        overwrite: bool,
    ) -> Result<LinkOutcome> {
        let request = request(store, display_name).overwrite(overwrite);
        manager.link(store, request).await
    }

    #[tokio::test]
    async fn test_link_records_after_confirmation() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        let outcome = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();

        assert!(matches!(outcome, LinkOutcome::Linked(_)));
        assert_eq!(store.get(keys::LINK_STATUS), Some("Linked"));
        assert_eq!(store.get(keys::AGENT_ID), Some("agent-1"));
        assert_eq!(store.get(keys::LINKED_DISPLAY_NAME), Some("Maps Assistant"));
        assert_eq!(platform.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_link_makes_no_remote_calls() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        let before = platform.calls();
        let outcome = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();

        assert!(matches!(outcome, LinkOutcome::Unchanged(_)));
        assert_eq!(platform.calls(), before);
    }

    #[tokio::test]
    async fn test_link_unlink_link_reaches_same_record() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        let first = link_as(&manager, &mut store, "Maps Assistant", false)
            .await
            .unwrap()
            .record()
            .clone();
        manager.unlink(&mut store).await.unwrap();
        assert_eq!(store.get(keys::LINK_STATUS), Some("Unlinked"));

        let second = link_as(&manager, &mut store, "Maps Assistant", false)
            .await
            .unwrap()
            .record()
            .clone();

        assert_eq!(second.status, LinkStatus::Linked);
        assert_eq!(second.resource, first.resource);
        assert_eq!(second.metadata, first.metadata);
        assert_eq!(platform.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_different_config_without_overwrite_is_rejected() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        let rendered = store.render();

        let err = link_as(&manager, &mut store, "Route Planner", false).await.unwrap_err();

        assert_eq!(err.kind(), "AlreadyLinkedElsewhereError");
        assert_eq!(store.render(), rendered);
        assert_eq!(platform.registrations()[0].metadata.display_name, "Maps Assistant");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_registration() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        link_as(&manager, &mut store, "Route Planner", true).await.unwrap();

        let registrations = platform.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].metadata.display_name, "Route Planner");
        assert_eq!(store.get(keys::AGENT_ID), Some(registrations[0].agent_id.as_str()));
    }

    #[tokio::test]
    async fn test_remote_conflict_without_overwrite() {
        let platform = Arc::new(FakeChatUi::new());
        let resource: ResourceIdentifier = RESOURCE.parse().unwrap();
        let mut foreign = metadata_from_store(&EnvStore::in_memory());
        foreign.display_name = "Someone Else".into();
        platform.insert_registration(&resource, foreign);

        let manager = manager(platform.clone());
        let mut store = deployed_store();
        let err = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap_err();

        assert_eq!(err.kind(), "AlreadyLinkedElsewhereError");
        assert!(err.to_string().contains("Someone Else"));
        assert_eq!(store.get(keys::AGENT_ID), None);
    }

    #[tokio::test]
    async fn test_remote_conflict_with_overwrite() {
        let platform = Arc::new(FakeChatUi::new());
        let resource: ResourceIdentifier = RESOURCE.parse().unwrap();
        platform.insert_registration(&resource, metadata_from_store(&EnvStore::in_memory()));

        let manager = manager(platform.clone());
        let mut store = deployed_store();
        link_as(&manager, &mut store, "Maps Assistant", true).await.unwrap();

        let registrations = platform.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].metadata.display_name, "Maps Assistant");
        assert_eq!(platform.calls().register, 2);
    }

    #[tokio::test]
    async fn test_new_resource_unlinks_previous_first() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        store.set(keys::RESOURCE_NAME, OTHER);

        let outcome = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();

        let LinkOutcome::Relinked { previous, record } = outcome else {
            panic!("expected relink");
        };
        assert_eq!(previous.engine_id(), "abc");
        assert_eq!(record.resource.engine_id(), "def");
        let registrations = platform.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].reasoning_engine, OTHER);
    }

    #[tokio::test]
    async fn test_unlink_after_out_of_band_removal() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.remove_out_of_band("agent-1");

        let outcome = manager.unlink(&mut store).await.unwrap();
        assert_eq!(outcome, UnlinkOutcome::AlreadyAbsent);
        assert_eq!(store.get(keys::LINK_STATUS), Some("Unlinked"));
        assert_eq!(store.get(keys::AGENT_ID), None);
    }

    #[tokio::test]
    async fn test_unlink_resets_locally_when_remote_fails() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone()).with_retry_policy(RetryPolicy::none());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.fail_deregister(PlatformError::Status {
            status: 403,
            message: "denied".into(),
        });

        let err = manager.unlink(&mut store).await.unwrap_err();
        assert_eq!(err.kind(), "RemoteRejectedError");
        assert_eq!(store.get(keys::LINK_STATUS), Some("Unlinked"));
    }

    #[tokio::test]
    async fn test_relink_adopts_registration_left_by_failed_unlink() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone()).with_retry_policy(RetryPolicy::none());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.fail_deregister(PlatformError::Status {
            status: 503,
            message: "unavailable".into(),
        });
        manager.unlink(&mut store).await.unwrap_err();
        assert_eq!(store.get(keys::LINK_STATUS), Some("Unlinked"));
        assert_eq!(platform.registrations().len(), 1);

        let outcome = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();

        assert_eq!(outcome.record().status, LinkStatus::Linked);
        assert_eq!(outcome.record().agent_id.as_deref(), Some("agent-1"));
        assert_eq!(store.get(keys::AGENT_ID), Some("agent-1"));
        let registrations = platform.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].agent_id, "agent-1");
        assert_eq!(platform.calls().deregister, 1);
    }

    #[tokio::test]
    async fn test_edited_env_file_is_compared_against_the_record() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();
        store.set(keys::DISPLAY_NAME, "Maps Assistant");

        let request = LinkRequest::from_store(&store).unwrap();
        manager.link(&mut store, request).await.unwrap();

        store.set(keys::DISPLAY_NAME, "Route Planner");
        let request = LinkRequest::from_store(&store).unwrap();
        let err = manager.link(&mut store, request).await.unwrap_err();
        assert_eq!(err.kind(), "AlreadyLinkedElsewhereError");
        assert!(err.to_string().contains("Maps Assistant"));

        let request = LinkRequest::from_store(&store).unwrap().overwrite(true);
        let outcome = manager.link(&mut store, request).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Linked(_)));
        assert_eq!(store.get(keys::LINKED_DISPLAY_NAME), Some("Route Planner"));
        assert_eq!(platform.registrations()[0].metadata.display_name, "Route Planner");
    }

    #[tokio::test]
    async fn test_unlink_without_record() {
        let manager = manager(Arc::new(FakeChatUi::new()));
        let err = manager.unlink(&mut EnvStore::in_memory()).await.unwrap_err();
        assert_eq!(err.kind(), "NotLinkedError");
    }

    #[tokio::test]
    async fn test_verify_is_read_only_remotely() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        let mutations = platform.calls().mutations();

        let outcome = manager.verify(&mut store).await.unwrap();
        assert!(outcome.is_verified());
        assert_eq!(store.get(keys::LINK_STATUS), Some("Verified"));

        platform.rename("agent-1", "Renamed");
        let VerifyOutcome::Failed { reason, .. } = manager.verify(&mut store).await.unwrap() else {
            panic!("expected verification to fail");
        };
        assert_eq!(reason, VerifyMismatch::Differs(vec!["display name"]));
        assert_eq!(store.get(keys::LINK_STATUS), Some("VerificationFailed"));
        assert_eq!(platform.calls().mutations(), mutations);
    }

    #[tokio::test]
    async fn test_verify_detects_absent_registration() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.remove_out_of_band("agent-1");

        let outcome = manager.verify(&mut store).await.unwrap();
        assert!(matches!(
            outcome,
            VerifyOutcome::Failed { reason: VerifyMismatch::Absent, .. }
        ));
    }

    #[tokio::test]
    async fn test_relink_after_failed_verification() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.rename("agent-1", "Renamed");
        manager.verify(&mut store).await.unwrap();

        let outcome = link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        assert_eq!(outcome.record().status, LinkStatus::Linked);
        assert_eq!(platform.registrations().len(), 1);
        assert!(manager.verify(&mut store).await.unwrap().is_verified());
    }

    #[tokio::test]
    async fn test_verify_requires_link() {
        let manager = manager(Arc::new(FakeChatUi::new()));
        let mut store = deployed_store();
        let err = manager.verify(&mut store).await.unwrap_err();
        assert_eq!(err.kind(), "NotLinkedError");
    }

    #[tokio::test]
    async fn test_url_is_derived_without_remote_call() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        manager.verify(&mut store).await.unwrap();
        let calls = platform.calls();

        let address = manager.url(&mut store).await.unwrap();
        assert!(address.verified);
        assert!(address.url.contains("123"));
        assert!(address.url.contains("us-central1"));
        assert!(address.url.contains("abc"));
        assert_eq!(platform.calls(), calls);
        assert_eq!(store.get(keys::UI_URL), Some(address.url.as_str()));
    }

    #[tokio::test]
    async fn test_url_resolves_once_then_uses_cache() {
        let platform = Arc::new(FakeChatUi::new().without_predictable_urls());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();

        let first = manager.url(&mut store).await.unwrap();
        assert!(!first.verified);
        let second = manager.url(&mut store).await.unwrap();

        assert_eq!(first.url, second.url);
        assert_eq!(platform.calls().resolve_url, 1);
    }

    #[tokio::test]
    async fn test_url_refused_after_failed_verification() {
        let platform = Arc::new(FakeChatUi::new());
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        platform.remove_out_of_band("agent-1");
        manager.verify(&mut store).await.unwrap();

        let err = manager.url(&mut store).await.unwrap_err();
        assert_eq!(err.kind(), "NotLinkedError");
    }

    #[tokio::test]
    async fn test_transient_register_is_retried() {
        let platform = Arc::new(FakeChatUi::new());
        platform.fail_register(PlatformError::Status {
            status: 503,
            message: "unavailable".into(),
        });
        let manager = manager(platform.clone());
        let mut store = deployed_store();

        link_as(&manager, &mut store, "Maps Assistant", false).await.unwrap();
        assert_eq!(platform.calls().register, 2);
    }
}
