//! Execution Platform Trait
//!
//! Contract of the managed agent-execution service: stage a packaged unit,
//! create or update the long-running agent resource, poll the job, delete the
//! resource and invoke it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::packager::DeploymentUnit;
use crate::agent::resource::ResourceIdentifier;
use crate::error::PlatformError;
use crate::runtime::stream::ResponseStream;

/// Result alias for adapter calls
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Unit whose artifacts were uploaded to staging storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedUnit {
    pub display_name: String,
    pub description: String,
    /// Object holding the serialized agent definition
    pub definition_uri: String,
    pub requirements_uri: String,
    /// Archive holding the bootstrap scripts and extra packages
    pub dependencies_uri: String,
    /// Archive paths run while the execution image is built
    pub installation_scripts: Vec<String>,
    pub env_vars: BTreeMap<String, String>,
    pub digest: String,
}

/// Handle of a long-running create/update job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a long-running job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    /// Raw resource name as reported; validated by the caller
    Succeeded { resource_name: String },
    Failed { message: String },
}

/// Outcome of an idempotent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotFound,
}

/// Single query against a deployed agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    pub user_id: String,
    pub session_id: Option<String>,
    pub message: String,
    /// Ask for streamed delivery
    pub stream: bool,
}

/// Response to a query: a whole answer or a lazily consumed stream
pub enum QueryResponse {
    Single(String),
    Stream(ResponseStream),
}

impl std::fmt::Debug for QueryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryResponse::Single(text) => f.debug_tuple("Single").field(text).finish(),
            QueryResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Execution platform adapter trait
#[async_trait]
pub trait ExecutionPlatform: Send + Sync {
    /// Platform name for logs
    fn platform_type(&self) -> &str;

    /// Upload the unit's artifacts to staging storage
    async fn stage_unit(&self, unit: &DeploymentUnit) -> PlatformResult<StagedUnit>;

    /// Create a new agent resource, or update `existing` in place
    async fn create_or_update_agent(
        &self,
        staged: &StagedUnit,
        existing: Option<&ResourceIdentifier>,
    ) -> PlatformResult<JobHandle>;

    /// Current status of a create/update job
    async fn poll_job(&self, job: &JobHandle) -> PlatformResult<JobStatus>;

    /// Delete an agent resource. Absence is not an error.
    async fn delete_agent(&self, resource: &ResourceIdentifier) -> PlatformResult<Removal>;

    /// Open a conversation session for `user_id`
    async fn create_session(
        &self,
        resource: &ResourceIdentifier,
        user_id: &str,
    ) -> PlatformResult<String>;

    /// Send a query to a deployed agent
    async fn invoke(
        &self,
        resource: &ResourceIdentifier,
        request: &QueryRequest,
    ) -> PlatformResult<QueryResponse>;
}
