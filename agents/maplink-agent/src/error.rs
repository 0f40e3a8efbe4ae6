//! Error Taxonomy
//!
//! Every failure an operation can surface is one of the [`MaplinkError`]
//! kinds below. Remote adapters report [`PlatformError`]s, which are
//! classified at the component boundary and attached as the source.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the orchestration core
pub type Result<T, E = MaplinkError> = std::result::Result<T, E>;

/// Failure reported by a remote platform adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// Connection, DNS or timeout failure before a response arrived
    #[error("transport failure: {0}")]
    Transport(String),

    /// The platform answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Credentials were missing or refused
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body did not match the expected contract
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Transport(_) => true,
            PlatformError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            PlatformError::Auth(_) | PlatformError::Decode(_) => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Orchestration error taxonomy
#[derive(Debug, Error)]
pub enum MaplinkError {
    #[error("failed to write configuration {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required configuration: {}", keys.join(", "))]
    MissingConfig { keys: Vec<String> },

    #[error("malformed resource identifier `{value}`: {reason}")]
    InvalidResourceIdentifier { value: String, reason: String },

    #[error("cannot resolve pinned version for `{requirement}`: {reason}")]
    UnresolvedDependency { requirement: String, reason: String },

    #[error("maps toolset is misconfigured: {0}")]
    ToolProviderConfig(String),

    #[error("deployment job {job} did not finish within {}s", waited.as_secs())]
    DeploymentTimeout { job: String, waited: Duration },

    #[error("deployment job {job} failed: {message}")]
    DeploymentFailed { job: String, message: String },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RemoteTransient {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: PlatformError,
    },

    #[error("{operation} was rejected: {source}")]
    RemoteRejected {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("{resource} is already linked with a different configuration ({existing})")]
    AlreadyLinkedElsewhere { resource: String, existing: String },

    #[error("no integration record: {0}")]
    NotLinked(String),

    #[error("invalid link transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("could not obtain an access token: {0}")]
    Auth(String),
}

impl MaplinkError {
    /// Classify a failed remote call into the taxonomy
    pub fn remote(operation: &'static str, attempts: u32, source: PlatformError) -> Self {
        match source {
            PlatformError::Auth(message) => MaplinkError::Auth(message),
            source if source.is_transient() => MaplinkError::RemoteTransient {
                operation,
                attempts,
                source,
            },
            source => MaplinkError::RemoteRejected { operation, source },
        }
    }

    /// Stable name of the taxonomy kind, printed in front of user-facing errors
    pub fn kind(&self) -> &'static str {
        match self {
            MaplinkError::ConfigWrite { .. } => "ConfigWriteError",
            MaplinkError::MissingConfig { .. } => "MissingConfig",
            MaplinkError::InvalidResourceIdentifier { .. } => "InvalidResourceIdentifier",
            MaplinkError::UnresolvedDependency { .. } => "UnresolvedDependencyError",
            MaplinkError::ToolProviderConfig(_) => "ToolProviderConfigError",
            MaplinkError::DeploymentTimeout { .. } => "DeploymentTimeoutError",
            MaplinkError::DeploymentFailed { .. } => "DeploymentFailed",
            MaplinkError::RemoteTransient { .. } => "RemoteTransientError",
            MaplinkError::RemoteRejected { .. } => "RemoteRejectedError",
            MaplinkError::AlreadyLinkedElsewhere { .. } => "AlreadyLinkedElsewhereError",
            MaplinkError::NotLinked(_) => "NotLinkedError",
            MaplinkError::InvalidTransition { .. } => "InvalidTransition",
            MaplinkError::Auth(_) => "AuthError",
        }
    }

    /// Process exit code, distinct per kind
    pub fn exit_code(&self) -> u8 {
        match self {
            MaplinkError::ConfigWrite { .. } => 10,
            MaplinkError::MissingConfig { .. } => 11,
            MaplinkError::InvalidResourceIdentifier { .. } => 12,
            MaplinkError::UnresolvedDependency { .. } => 20,
            MaplinkError::ToolProviderConfig(_) => 21,
            MaplinkError::DeploymentTimeout { .. } => 30,
            MaplinkError::DeploymentFailed { .. } => 31,
            MaplinkError::RemoteTransient { .. } => 40,
            MaplinkError::RemoteRejected { .. } => 41,
            MaplinkError::AlreadyLinkedElsewhere { .. } => 50,
            MaplinkError::NotLinked(_) => 51,
            MaplinkError::InvalidTransition { .. } => 52,
            MaplinkError::Auth(_) => 60,
        }
    }

    /// Minimal remediation hint for the operator
    pub fn remediation(&self) -> &'static str {
        match self {
            MaplinkError::ConfigWrite { .. } => {
                "check that the env file and its directory are writable"
            }
            MaplinkError::MissingConfig { .. } => "set the listed keys in the env file",
            MaplinkError::InvalidResourceIdentifier { .. } => {
                "re-run `deploy` to obtain a resource id"
            }
            MaplinkError::UnresolvedDependency { .. } => {
                "add the package to the dependency lock or relax the requirement"
            }
            MaplinkError::ToolProviderConfig(_) => "set GOOGLE_MAPS_API_KEY in the env file",
            MaplinkError::DeploymentTimeout { .. } => {
                "the deployment may still complete; re-poll before deploying again"
            }
            MaplinkError::DeploymentFailed { .. } => {
                "inspect the Agent Engine logs, fix the package and re-run `deploy`"
            }
            MaplinkError::RemoteTransient { .. } => "the platform is unavailable; retry later",
            MaplinkError::RemoteRejected { .. } => {
                "check project permissions and the values in the env file"
            }
            MaplinkError::AlreadyLinkedElsewhere { .. } => {
                "pass `--overwrite` or run `unlink` first"
            }
            MaplinkError::NotLinked(_) => "run `link` first",
            MaplinkError::InvalidTransition { .. } => "run `status` to inspect the record",
            MaplinkError::Auth(_) => {
                "run `gcloud auth login` or set MAPLINK_ACCESS_TOKEN"
            }
        }
    }
}
