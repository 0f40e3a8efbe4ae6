//! Deployment Client
//!
//! Drives one deploy through `Pending -> Uploading -> Provisioning -> Ready`
//! (or `Failed`) against the execution platform, polling the create/update
//! job until it settles or the deadline passes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::agent::packager::DeploymentUnit;
use crate::agent::resource::ResourceIdentifier;
use crate::clock::{Clock, SystemClock};
use crate::env::{keys, EnvStore};
use crate::error::{MaplinkError, Result};
use crate::retry::{with_retry, PollPolicy, RetryPolicy};
use crate::runtime::adapter::{
    ExecutionPlatform, JobHandle, JobStatus, QueryRequest, QueryResponse, Removal,
};

/// Phase of a single deploy call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Pending,
    Uploading,
    Provisioning,
    Ready,
    Failed,
}

impl std::fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployPhase::Pending => write!(f, "pending"),
            DeployPhase::Uploading => write!(f, "uploading"),
            DeployPhase::Provisioning => write!(f, "provisioning"),
            DeployPhase::Ready => write!(f, "ready"),
            DeployPhase::Failed => write!(f, "failed"),
        }
    }
}

impl DeployPhase {
    fn can_transition_to(self, to: DeployPhase) -> bool {
        matches!(
            (self, to),
            (DeployPhase::Pending, DeployPhase::Uploading)
                | (DeployPhase::Pending, DeployPhase::Provisioning)
                | (DeployPhase::Uploading, DeployPhase::Provisioning)
                | (DeployPhase::Provisioning, DeployPhase::Ready)
                | (DeployPhase::Pending, DeployPhase::Failed)
                | (DeployPhase::Uploading, DeployPhase::Failed)
                | (DeployPhase::Provisioning, DeployPhase::Failed)
        )
    }
}

/// Recorded phase change
#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: DeployPhase,
    pub to: DeployPhase,
    pub timestamp: DateTime<Utc>,
}

struct PhaseTracker<'a> {
    current: DeployPhase,
    transitions: Vec<PhaseTransition>,
    observer: &'a mut (dyn FnMut(DeployPhase) + Send),
}

impl<'a> PhaseTracker<'a> {
    fn new(observer: &'a mut (dyn FnMut(DeployPhase) + Send)) -> Self {
        Self {
            current: DeployPhase::Pending,
            transitions: Vec::new(),
            observer,
        }
    }

    fn transition_to(&mut self, to: DeployPhase) -> bool {
        if !self.current.can_transition_to(to) {
            warn!(from = %self.current, to = %to, "Ignoring invalid deploy phase transition");
            return false;
        }

        self.transitions.push(PhaseTransition {
            from: self.current,
            to,
            timestamp: Utc::now(),
        });
        info!(from = %self.current, to = %to, "Deploy phase transition");
        self.current = to;
        (self.observer)(to);
        true
    }

    /// Run `step`; a failure moves the tracker to `Failed`
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.transition_to(DeployPhase::Failed);
        }
        result
    }
}

/// Outcome of a successful deploy
#[derive(Debug, Clone)]
pub struct Deployment {
    pub resource: ResourceIdentifier,
    pub job: JobHandle,
    pub transitions: Vec<PhaseTransition>,
}

/// Client for the remote execution platform
pub struct DeploymentClient<P: ExecutionPlatform> {
    platform: Arc<P>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    poll: PollPolicy,
}

impl<P: ExecutionPlatform> DeploymentClient<P> {
    /// Create a client on the wall clock with default policies
    pub fn new(platform: Arc<P>) -> Self {
        Self {
            platform,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
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

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// Deploy `unit`, updating `existing` when given. Returns the durable
    /// resource identifier once the platform reports the job done.
    pub async fn deploy(
        &self,
        unit: DeploymentUnit,
        existing: Option<&ResourceIdentifier>,
    ) -> Result<ResourceIdentifier> {
        let mut ignore = |_: DeployPhase| {};
        Ok(self.deploy_with_progress(unit, existing, &mut ignore).await?.resource)
    }

    /// Same as [`deploy`](Self::deploy), reporting every phase change to `observer`
    pub async fn deploy_with_progress(
        &self,
        unit: DeploymentUnit,
        existing: Option<&ResourceIdentifier>,
        observer: &mut (dyn FnMut(DeployPhase) + Send),
    ) -> Result<Deployment> {
        let mut tracker = PhaseTracker::new(observer);
        info!(
            platform = %self.platform.platform_type(),
            display_name = %unit.display_name(),
            update = existing.is_some(),
            "Starting agent deployment"
        );

        // Step 1: stage artifacts
        tracker.transition_to(DeployPhase::Uploading);
        let staged = with_retry(&self.retry, self.clock.as_ref(), "stage deployment unit", || {
            self.platform.stage_unit(&unit)
        })
        .await;
        let staged = tracker.settle(staged)?;
        debug!(digest = %staged.digest, "Deployment unit staged");

        // Step 2: request provisioning
        let job = with_retry(&self.retry, self.clock.as_ref(), "create agent", || {
            self.platform.create_or_update_agent(&staged, existing)
        })
        .await;
        let job = tracker.settle(job)?;
        tracker.transition_to(DeployPhase::Provisioning);
        info!(job = %job, "Provisioning requested");

        // Step 3: poll until settled
        let resource = self.wait_for(&job).await;
        let resource = tracker.settle(resource)?;
        tracker.transition_to(DeployPhase::Ready);

        info!(resource = %resource, "Agent deployed successfully");
        Ok(Deployment {
            resource,
            job,
            transitions: tracker.transitions,
        })
    }

    /// Deploy `unit` as the resource recorded in `store` (creating one when
    /// none is recorded) and record the identifier once the platform reports
    /// it ready. Nothing is written on failure.
    pub async fn deploy_recorded(
        &self,
        store: &mut EnvStore,
        unit: DeploymentUnit,
        observer: &mut (dyn FnMut(DeployPhase) + Send),
    ) -> Result<Deployment> {
        let existing = store
            .get(keys::RESOURCE_NAME)
            .map(str::parse::<ResourceIdentifier>)
            .transpose()?;

        let deployment = self
            .deploy_with_progress(unit, existing.as_ref(), observer)
            .await?;

        store.set(keys::RESOURCE_NAME, deployment.resource.to_string());
        store.flush()?;
        Ok(deployment)
    }

    /// Re-enter the poll loop for a job whose earlier deploy call timed out
    pub async fn resume(&self, job: &JobHandle) -> Result<ResourceIdentifier> {
        info!(job = %job, "Resuming deployment poll");
        self.wait_for(job).await
    }

    async fn wait_for(&self, job: &JobHandle) -> Result<ResourceIdentifier> {
        let timeout = self.poll.timeout();
        let deadline = self.clock.now() + timeout;
        let mut interval = self.poll.initial_interval();

        loop {
            let status = with_retry(&self.retry, self.clock.as_ref(), "poll deployment job", || {
                self.platform.poll_job(job)
            })
            .await?;

            match status {
                JobStatus::Running => debug!(job = %job, "Deployment still running"),
                JobStatus::Succeeded { resource_name } => return resource_name.parse(),
                JobStatus::Failed { message } => {
                    error!(job = %job, error = %message, "Deployment failed");
                    return Err(MaplinkError::DeploymentFailed {
                        job: job.to_string(),
                        message,
                    });
                }
            }

            let now = self.clock.now();
            if now >= deadline {
                warn!(
                    job = %job,
                    waited_secs = timeout.as_secs(),
                    "Deployment poll deadline reached; remote job left running"
                );
                return Err(MaplinkError::DeploymentTimeout {
                    job: job.to_string(),
                    waited: timeout,
                });
            }

            self.clock.sleep(interval.min(deadline - now)).await;
            interval = self.poll.next_interval(interval);
        }
    }

    /// Best-effort delete. A resource that is already gone counts as success.
    pub async fn undeploy(&self, resource: &ResourceIdentifier) -> Result<Removal> {
        let removal = with_retry(&self.retry, self.clock.as_ref(), "delete agent", || {
            self.platform.delete_agent(resource)
        })
        .await?;

        match removal {
            Removal::Removed => info!(resource = %resource, "Agent deleted"),
            Removal::NotFound => info!(resource = %resource, "Agent already absent"),
        }
        Ok(removal)
    }

    /// Delete the resource recorded in `store` and forget it
    pub async fn undeploy_recorded(&self, store: &mut EnvStore) -> Result<(ResourceIdentifier, Removal)> {
        let resource: ResourceIdentifier = store
            .get(keys::RESOURCE_NAME)
            .ok_or_else(|| MaplinkError::MissingConfig {
                keys: vec![keys::RESOURCE_NAME.to_string()],
            })?
            .parse()?;

        let removal = self.undeploy(&resource).await?;
        store.remove(keys::RESOURCE_NAME);
        store.flush()?;
        Ok((resource, removal))
    }

    /// Open a session on a deployed agent
    pub async fn create_session(
        &self,
        resource: &ResourceIdentifier,
        user_id: &str,
    ) -> Result<String> {
        with_retry(&self.retry, self.clock.as_ref(), "create session", || {
            self.platform.create_session(resource, user_id)
        })
        .await
    }

    /// Send one query to a deployed agent
    pub async fn query(
        &self,
        resource: &ResourceIdentifier,
        request: &QueryRequest,
    ) -> Result<QueryResponse> {
        debug!(resource = %resource, stream = request.stream, "Sending query");
        with_retry(&self.retry, self.clock.as_ref(), "query agent", || {
            self.platform.invoke(resource, request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::definition::{AgentDefinition, MapsToolset};
    use crate::agent::packager::Packager;
    use crate::clock::ManualClock;
    use crate::error::PlatformError;
    use crate::testing::FakeExecutionPlatform;
    use std::time::Duration;

    fn unit() -> DeploymentUnit {
        let toolset = MapsToolset::new(Some("AIza-test"));
        let definition = AgentDefinition::maps_assistant(None, &toolset);
        Packager::default().package(&definition, &toolset, "Maps").unwrap()
    }

    fn client(platform: Arc<FakeExecutionPlatform>, clock: Arc<ManualClock>) -> DeploymentClient<FakeExecutionPlatform> {
        DeploymentClient::new(platform)
            .with_clock(clock)
            .with_poll_policy(PollPolicy {
                interval_ms: 1_000,
                max_interval_ms: 4_000,
                timeout_secs: 60,
            })
    }

    #[tokio::test]
    async fn test_deploy_walks_all_phases() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        platform.set_polls_until_ready(2);
        let clock = Arc::new(ManualClock::new());

        let mut seen = Vec::new();
        let mut observe = |phase: DeployPhase| seen.push(phase);
        let deployment = client(platform.clone(), clock.clone())
            .deploy_with_progress(unit(), None, &mut observe)
            .await
            .unwrap();

        assert_eq!(deployment.resource.engine_id(), "abc");
        assert_eq!(
            seen,
            vec![DeployPhase::Uploading, DeployPhase::Provisioning, DeployPhase::Ready]
        );
        assert_eq!(platform.calls().poll_job, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1_000), Duration::from_millis(1_500)]);
    }

    #[tokio::test]
    async fn test_deploy_times_out_without_failing_remote() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        platform.set_polls_until_ready(u32::MAX);
        let clock = Arc::new(ManualClock::new());

        let err = client(platform.clone(), clock.clone())
            .deploy(unit(), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "DeploymentTimeoutError");
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
        assert_eq!(platform.calls().delete_agent, 0);
    }

    #[tokio::test]
    async fn test_resume_after_timeout() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        platform.set_polls_until_ready(100);
        let clock = Arc::new(ManualClock::new());
        let client = client(platform.clone(), clock);

        let err = client.deploy(unit(), None).await.unwrap_err();
        let MaplinkError::DeploymentTimeout { job, .. } = err else {
            panic!("expected timeout, got {err:?}");
        };

        platform.set_polls_until_ready(0);
        let resource = client.resume(&JobHandle(job)).await.unwrap();
        assert_eq!(resource.project(), "123");
    }

    #[tokio::test]
    async fn test_rejected_create_fails_fast() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        platform.fail_create(PlatformError::Status {
            status: 400,
            message: "invalid package".into(),
        });
        let clock = Arc::new(ManualClock::new());

        let mut seen = Vec::new();
        let mut observe = |phase: DeployPhase| seen.push(phase);
        let err = client(platform.clone(), clock)
            .deploy_with_progress(unit(), None, &mut observe)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "RemoteRejectedError");
        assert_eq!(platform.calls().create_agent, 1);
        assert_eq!(platform.calls().poll_job, 0);
        assert_eq!(seen.last(), Some(&DeployPhase::Failed));
    }

    #[tokio::test]
    async fn test_malformed_resource_from_platform_is_rejected() {
        let platform = Arc::new(FakeExecutionPlatform::new("reasoningEngines/abc"));
        let err = client(platform, Arc::new(ManualClock::new()))
            .deploy(unit(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidResourceIdentifier");
    }

    #[tokio::test]
    async fn test_undeploy_is_idempotent() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        let client = client(platform.clone(), Arc::new(ManualClock::new()));
        let resource = client.deploy(unit(), None).await.unwrap();

        assert_eq!(client.undeploy(&resource).await.unwrap(), Removal::Removed);
        assert_eq!(client.undeploy(&resource).await.unwrap(), Removal::NotFound);
    }

    #[tokio::test]
    async fn test_rejected_deploy_records_nothing() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        platform.fail_create(PlatformError::Status {
            status: 403,
            message: "permission denied".into(),
        });
        let mut store = EnvStore::in_memory();
        let mut ignore = |_: DeployPhase| {};

        let err = client(platform, Arc::new(ManualClock::new()))
            .deploy_recorded(&mut store, unit(), &mut ignore)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "RemoteRejectedError");
        assert_eq!(store.get(keys::RESOURCE_NAME), None);
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_recorded_resource_is_updated_in_place() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/fresh",
        ));
        let mut store = EnvStore::from_str_in_memory(
            "AGENT_ENGINE_RESOURCE_NAME=projects/123/locations/us-central1/reasoningEngines/abc\n",
        );
        let mut ignore = |_: DeployPhase| {};

        let deployment = client(platform, Arc::new(ManualClock::new()))
            .deploy_recorded(&mut store, unit(), &mut ignore)
            .await
            .unwrap();

        assert_eq!(deployment.resource.engine_id(), "abc");
        assert_eq!(
            store.get(keys::RESOURCE_NAME),
            Some("projects/123/locations/us-central1/reasoningEngines/abc")
        );
    }

    #[tokio::test]
    async fn test_undeploy_recorded_forgets_resource() {
        let platform = Arc::new(FakeExecutionPlatform::new(
            "projects/123/locations/us-central1/reasoningEngines/abc",
        ));
        let client = client(platform.clone(), Arc::new(ManualClock::new()));
        let mut store = EnvStore::in_memory();
        let mut ignore = |_: DeployPhase| {};
        client.deploy_recorded(&mut store, unit(), &mut ignore).await.unwrap();

        let (resource, removal) = client.undeploy_recorded(&mut store).await.unwrap();
        assert_eq!(resource.engine_id(), "abc");
        assert_eq!(removal, Removal::Removed);
        assert_eq!(store.get(keys::RESOURCE_NAME), None);
        assert!(!platform.is_deployed(&resource));
    }
}
