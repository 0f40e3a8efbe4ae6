//! Query Client
//!
//! Sends one message to a deployed agent to confirm it answers. Not part of
//! the link state machine.

use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::deploy::DeploymentClient;
use crate::agent::resource::ResourceIdentifier;
use crate::error::{MaplinkError, PlatformError, Result};
use crate::runtime::adapter::{ExecutionPlatform, QueryRequest, QueryResponse};

/// Prefix of the per-run user id sessions are opened under
pub const USER_ID_PREFIX: &str = "maplink-smoke";

/// What a smoke query observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub session_id: String,
    /// Number of response fragments received
    pub fragments: usize,
    /// Concatenated response text
    pub text: String,
    pub elapsed: Duration,
}

/// Thin client over [`DeploymentClient::query`]
pub struct QueryClient<'a, P: ExecutionPlatform> {
    deployments: &'a DeploymentClient<P>,
    user_id: String,
    stream: bool,
}

impl<'a, P: ExecutionPlatform> QueryClient<'a, P> {
    pub fn new(deployments: &'a DeploymentClient<P>) -> Self {
        Self {
            deployments,
            user_id: format!("{USER_ID_PREFIX}-{}", Uuid::new_v4().simple()),
            stream: true,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Ask for a single response instead of a stream
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Query `resource` once and require a non-empty answer
    pub async fn query_smoke(
        &self,
        resource: &ResourceIdentifier,
        sample_text: &str,
    ) -> Result<SmokeReport> {
        let mut ignore = |_: &str| {};
        self.query_smoke_with_progress(resource, sample_text, &mut ignore)
            .await
    }

    /// Same as [`query_smoke`](Self::query_smoke), handing each fragment to
    /// `on_fragment` as it arrives
    pub async fn query_smoke_with_progress(
        &self,
        resource: &ResourceIdentifier,
        sample_text: &str,
        on_fragment: &mut (dyn FnMut(&str) + Send),
    ) -> Result<SmokeReport> {
        let started = Instant::now();
        let session_id = self
            .deployments
            .create_session(resource, &self.user_id)
            .await?;
        debug!(resource = %resource, session_id = %session_id, "Session created");

        let request = QueryRequest {
            user_id: self.user_id.clone(),
            session_id: Some(session_id.clone()),
            message: sample_text.to_string(),
            stream: self.stream,
        };

        let mut fragments = 0;
        let mut text = String::new();
        match self.deployments.query(resource, &request).await? {
            QueryResponse::Single(answer) => {
                if !answer.is_empty() {
                    fragments = 1;
                    on_fragment(&answer);
                    text = answer;
                }
            }
            QueryResponse::Stream(mut stream) => {
                while let Some(chunk) = stream.next_chunk().await {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    on_fragment(&chunk);
                    text.push_str(&chunk);
                }
            }
        }

        if fragments == 0 {
            return Err(MaplinkError::remote(
                "smoke query",
                1,
                PlatformError::Decode("agent returned no response fragments".into()),
            ));
        }

        info!(resource = %resource, fragments, "Smoke query answered");
        Ok(SmokeReport {
            session_id,
            fragments,
            text,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::definition::{AgentDefinition, MapsToolset};
    use crate::agent::packager::Packager;
    use crate::clock::ManualClock;
    use crate::testing::FakeExecutionPlatform;
    use std::sync::Arc;

    const RESOURCE: &str = "projects/123/locations/us-central1/reasoningEngines/abc";

    async fn deployed(platform: Arc<FakeExecutionPlatform>) -> (DeploymentClient<FakeExecutionPlatform>, ResourceIdentifier) {
        let client = DeploymentClient::new(platform).with_clock(Arc::new(ManualClock::new()));
        let toolset = MapsToolset::new(Some("AIza-test"));
        let unit = Packager::default()
            .package(&AgentDefinition::maps_assistant(None, &toolset), &toolset, "Maps")
            .unwrap();
        let resource = client.deploy(unit, None).await.unwrap();
        (client, resource)
    }

    #[tokio::test]
    async fn test_smoke_query_streams_fragments() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let (client, resource) = deployed(platform.clone()).await;

        let mut seen = Vec::new();
        let mut collect = |chunk: &str| seen.push(chunk.to_string());
        let report = QueryClient::new(&client)
            .query_smoke_with_progress(&resource, "Route to Bannan Rd", &mut collect)
            .await
            .unwrap();

        assert_eq!(report.fragments, 2);
        assert_eq!(report.text, "Route found: 25 min via Bannan Rd");
        assert_eq!(seen.len(), 2);
        assert_eq!(platform.calls().create_session, 1);
    }

    #[tokio::test]
    async fn test_single_response() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let (client, resource) = deployed(platform).await;

        let report = QueryClient::new(&client)
            .with_streaming(false)
            .query_smoke(&resource, "hello")
            .await
            .unwrap();
        assert_eq!(report.fragments, 1);
    }

    #[tokio::test]
    async fn test_zero_fragments_fail() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let (client, resource) = deployed(platform.clone()).await;
        platform.set_response_chunks(&[]);

        let err = QueryClient::new(&client)
            .query_smoke(&resource, "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RemoteRejectedError");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transient() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let (client, resource) = deployed(platform.clone()).await;
        platform.truncate_streams();

        let err = QueryClient::new(&client)
            .query_smoke(&resource, "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RemoteTransientError");
    }

    #[tokio::test]
    async fn test_query_against_missing_resource_is_rejected() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let client = DeploymentClient::new(platform).with_clock(Arc::new(ManualClock::new()));
        let resource: ResourceIdentifier = RESOURCE.parse().unwrap();

        let err = QueryClient::new(&client)
            .query_smoke(&resource, "hello")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "RemoteRejectedError");
    }

    #[tokio::test]
    async fn test_each_client_queries_as_a_fresh_user() {
        let platform = Arc::new(FakeExecutionPlatform::new(RESOURCE));
        let (client, resource) = deployed(platform).await;

        let first = QueryClient::new(&client).query_smoke(&resource, "hi").await.unwrap();
        let second = QueryClient::new(&client).query_smoke(&resource, "hi").await.unwrap();
        assert!(first.session_id.starts_with(USER_ID_PREFIX));
        assert_ne!(first.session_id, second.session_id);

        let pinned = QueryClient::new(&client)
            .with_user_id("operator")
            .query_smoke(&resource, "hi")
            .await
            .unwrap();
        assert!(pinned.session_id.starts_with("operator-session-"));
    }
}
