//! In-memory Platforms
//!
//! Scriptable stand-ins for the execution and chat-UI platforms. Every call
//! is counted so callers can assert exactly which remote operations ran.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::agent::packager::{DeploymentUnit, DEPENDENCIES_ARCHIVE};
use crate::agent::resource::ResourceIdentifier;
use crate::connection::platform::{AgentMetadata, ChatUiPlatform, RegisterOutcome, Registration};
use crate::error::PlatformError;
use crate::runtime::adapter::{
    ExecutionPlatform, JobHandle, JobStatus, PlatformResult, QueryRequest, QueryResponse, Removal,
    StagedUnit,
};
use crate::runtime::stream::{ResponseStream, StreamEvent};

/// Calls made against [`FakeExecutionPlatform`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionCalls {
    pub stage_unit: u32,
    pub create_agent: u32,
    pub poll_job: u32,
    pub delete_agent: u32,
    pub create_session: u32,
    pub invoke: u32,
}

#[derive(Debug, Default)]
struct ExecutionState {
    resource_name: String,
    running_polls: u32,
    job_failure: Option<String>,
    create_errors: VecDeque<PlatformError>,
    poll_errors: VecDeque<PlatformError>,
    deployed: BTreeSet<String>,
    chunks: Vec<String>,
    truncate_stream: bool,
    calls: ExecutionCalls,
}

/// Execution platform that "deploys" into memory
#[derive(Debug, Default)]
pub struct FakeExecutionPlatform {
    state: Mutex<ExecutionState>,
}

impl FakeExecutionPlatform {
    /// Platform whose jobs finish with `resource_name`
    pub fn new(resource_name: &str) -> Self {
        Self {
            state: Mutex::new(ExecutionState {
                resource_name: resource_name.to_string(),
                chunks: vec!["Route found: ".to_string(), "25 min via Bannan Rd".to_string()],
                ..ExecutionState::default()
            }),
        }
    }

    /// Number of `Running` answers before a job succeeds
    pub fn set_polls_until_ready(&self, polls: u32) {
        self.state.lock().running_polls = polls;
    }

    /// Make the next job end in a terminal failure
    pub fn fail_job(&self, message: &str) {
        self.state.lock().job_failure = Some(message.to_string());
    }

    /// Queue an error for the next create/update call
    pub fn fail_create(&self, error: PlatformError) {
        self.state.lock().create_errors.push_back(error);
    }

    /// Queue an error for the next poll
    pub fn fail_poll(&self, error: PlatformError) {
        self.state.lock().poll_errors.push_back(error);
    }

    /// Fragments returned by `invoke`
    pub fn set_response_chunks(&self, chunks: &[&str]) {
        self.state.lock().chunks = chunks.iter().map(|c| c.to_string()).collect();
    }

    /// Close streams without the end marker
    pub fn truncate_streams(&self) {
        self.state.lock().truncate_stream = true;
    }

    pub fn calls(&self) -> ExecutionCalls {
        self.state.lock().calls.clone()
    }

    pub fn is_deployed(&self, resource: &ResourceIdentifier) -> bool {
        self.state.lock().deployed.contains(&resource.to_string())
    }
}

#[async_trait]
impl ExecutionPlatform for FakeExecutionPlatform {
    fn platform_type(&self) -> &str {
        "in-memory"
    }

    async fn stage_unit(&self, unit: &DeploymentUnit) -> PlatformResult<StagedUnit> {
        self.state.lock().calls.stage_unit += 1;
        let digest = unit.digest();
        let prefix = format!("mem://staging/{digest}");
        Ok(StagedUnit {
            display_name: unit.display_name().to_string(),
            description: unit.definition().description().to_string(),
            definition_uri: format!("{prefix}/agent_definition.json"),
            requirements_uri: format!("{prefix}/requirements.txt"),
            dependencies_uri: format!("{prefix}/{DEPENDENCIES_ARCHIVE}"),
            installation_scripts: unit.bootstrap().iter().map(|s| s.path.clone()).collect(),
            env_vars: unit.env_vars().clone(),
            digest,
        })
    }

    async fn create_or_update_agent(
        &self,
        _staged: &StagedUnit,
        existing: Option<&ResourceIdentifier>,
    ) -> PlatformResult<JobHandle> {
        let mut state = self.state.lock();
        state.calls.create_agent += 1;
        if let Some(error) = state.create_errors.pop_front() {
            return Err(error);
        }
        if let Some(existing) = existing {
            state.resource_name = existing.to_string();
        }
        Ok(JobHandle(format!("operations/{}", state.calls.create_agent)))
    }

    async fn poll_job(&self, _job: &JobHandle) -> PlatformResult<JobStatus> {
        let mut state = self.state.lock();
        state.calls.poll_job += 1;
        if let Some(error) = state.poll_errors.pop_front() {
            return Err(error);
        }
        if let Some(message) = state.job_failure.take() {
            return Ok(JobStatus::Failed { message });
        }
        if state.running_polls > 0 {
            state.running_polls -= 1;
            return Ok(JobStatus::Running);
        }
        let resource_name = state.resource_name.clone();
        state.deployed.insert(resource_name.clone());
        Ok(JobStatus::Succeeded { resource_name })
    }

    async fn delete_agent(&self, resource: &ResourceIdentifier) -> PlatformResult<Removal> {
        let mut state = self.state.lock();
        state.calls.delete_agent += 1;
        if state.deployed.remove(&resource.to_string()) {
            Ok(Removal::Removed)
        } else {
            Ok(Removal::NotFound)
        }
    }

    async fn create_session(
        &self,
        resource: &ResourceIdentifier,
        user_id: &str,
    ) -> PlatformResult<String> {
        let mut state = self.state.lock();
        state.calls.create_session += 1;
        if !state.deployed.contains(&resource.to_string()) {
            return Err(PlatformError::Status {
                status: 404,
                message: format!("{resource} not found"),
            });
        }
        Ok(format!("{user_id}-session-{}", state.calls.create_session))
    }

    async fn invoke(
        &self,
        resource: &ResourceIdentifier,
        request: &QueryRequest,
    ) -> PlatformResult<QueryResponse> {
        let mut state = self.state.lock();
        state.calls.invoke += 1;
        if !state.deployed.contains(&resource.to_string()) {
            return Err(PlatformError::Status {
                status: 404,
                message: format!("{resource} not found"),
            });
        }

        if !request.stream {
            return Ok(QueryResponse::Single(state.chunks.concat()));
        }
        let mut events: Vec<_> = state
            .chunks
            .iter()
            .map(|chunk| Ok(StreamEvent::Chunk(chunk.clone())))
            .collect();
        if !state.truncate_stream {
            events.push(Ok(StreamEvent::End));
        }
        Ok(QueryResponse::Stream(ResponseStream::from_events(events)))
    }
}

/// Calls made against [`FakeChatUi`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatUiCalls {
    pub register: u32,
    pub deregister: u32,
    pub get: u32,
    pub find: u32,
    pub resolve_url: u32,
}

impl ChatUiCalls {
    /// Calls that change remote state
    pub fn mutations(&self) -> u32 {
        self.register + self.deregister
    }

    pub fn total(&self) -> u32 {
        self.register + self.deregister + self.get + self.find + self.resolve_url
    }
}

#[derive(Debug, Default)]
struct ChatUiState {
    registrations: BTreeMap<String, Registration>,
    next_id: u32,
    register_errors: VecDeque<PlatformError>,
    deregister_errors: VecDeque<PlatformError>,
    predictable_urls: bool,
    calls: ChatUiCalls,
}

/// Chat-UI platform that keeps registrations in memory
#[derive(Debug)]
pub struct FakeChatUi {
    state: Mutex<ChatUiState>,
}

impl Default for FakeChatUi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChatUi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChatUiState {
                predictable_urls: true,
                ..ChatUiState::default()
            }),
        }
    }

    /// Disable URL derivation so `url` must ask the platform
    pub fn without_predictable_urls(self) -> Self {
        self.state.lock().predictable_urls = false;
        self
    }

    /// Add a registration directly, as another operator would
    pub fn insert_registration(
        &self,
        resource: &ResourceIdentifier,
        metadata: AgentMetadata,
    ) -> Registration {
        let mut state = self.state.lock();
        Self::store(&mut state, resource, metadata)
    }

    /// Remove a registration behind the manager's back
    pub fn remove_out_of_band(&self, agent_id: &str) {
        self.state.lock().registrations.remove(agent_id);
    }

    /// Change the display name of a live registration
    pub fn rename(&self, agent_id: &str, display_name: &str) {
        if let Some(registration) = self.state.lock().registrations.get_mut(agent_id) {
            registration.metadata.display_name = display_name.to_string();
        }
    }

    pub fn fail_register(&self, error: PlatformError) {
        self.state.lock().register_errors.push_back(error);
    }

    pub fn fail_deregister(&self, error: PlatformError) {
        self.state.lock().deregister_errors.push_back(error);
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.state.lock().registrations.values().cloned().collect()
    }

    pub fn calls(&self) -> ChatUiCalls {
        self.state.lock().calls.clone()
    }

    fn store(
        state: &mut ChatUiState,
        resource: &ResourceIdentifier,
        metadata: AgentMetadata,
    ) -> Registration {
        state.next_id += 1;
        let agent_id = format!("agent-{}", state.next_id);
        let registration = Registration {
            agent_id: agent_id.clone(),
            name: format!(
                "projects/{}/locations/global/collections/default_collection/engines/app/assistants/default_assistant/agents/{agent_id}",
                resource.project()
            ),
            reasoning_engine: resource.to_string(),
            metadata,
        };
        state.registrations.insert(agent_id, registration.clone());
        registration
    }
}

#[async_trait]
impl ChatUiPlatform for FakeChatUi {
    fn platform_type(&self) -> &str {
        "in-memory"
    }

    async fn register_agent(
        &self,
        resource: &ResourceIdentifier,
        metadata: &AgentMetadata,
    ) -> PlatformResult<RegisterOutcome> {
        let mut state = self.state.lock();
        state.calls.register += 1;
        if let Some(error) = state.register_errors.pop_front() {
            return Err(error);
        }
        let engine = resource.to_string();
        if state
            .registrations
            .values()
            .any(|registration| registration.reasoning_engine == engine)
        {
            return Ok(RegisterOutcome::Conflict);
        }
        Ok(RegisterOutcome::Registered(Self::store(
            &mut state,
            resource,
            metadata.clone(),
        )))
    }

    async fn deregister_agent(&self, agent_id: &str) -> PlatformResult<Removal> {
        let mut state = self.state.lock();
        state.calls.deregister += 1;
        if let Some(error) = state.deregister_errors.pop_front() {
            return Err(error);
        }
        match state.registrations.remove(agent_id) {
            Some(_) => Ok(Removal::Removed),
            None => Ok(Removal::NotFound),
        }
    }

    async fn get_registration(&self, agent_id: &str) -> PlatformResult<Option<Registration>> {
        let mut state = self.state.lock();
        state.calls.get += 1;
        Ok(state.registrations.get(agent_id).cloned())
    }

    async fn find_registration(
        &self,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<Option<Registration>> {
        let mut state = self.state.lock();
        state.calls.find += 1;
        let engine = resource.to_string();
        Ok(state
            .registrations
            .values()
            .find(|registration| registration.reasoning_engine == engine)
            .cloned())
    }

    fn derive_url(
        &self,
        project_id: &str,
        region: &str,
        resource: &ResourceIdentifier,
        agent_id: &str,
    ) -> Option<String> {
        if !self.state.lock().predictable_urls {
            return None;
        }
        Some(format!(
            "https://chat.example.test/{project_id}/{}/{region}/{}/{agent_id}",
            resource.project(),
            resource.engine_id()
        ))
    }

    async fn resolve_url(
        &self,
        project_id: &str,
        region: &str,
        resource: &ResourceIdentifier,
    ) -> PlatformResult<String> {
        self.state.lock().calls.resolve_url += 1;
        Ok(format!(
            "https://chat.example.test/resolved/{project_id}/{}/{region}/{}",
            resource.project(),
            resource.engine_id()
        ))
    }
}
