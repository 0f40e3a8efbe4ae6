//! Vertex AI Adapter
//!
//! Implementation of ExecutionPlatform for Vertex AI Agent Engine
//! (`reasoningEngines`), staging artifacts in Cloud Storage.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::packager::{DeploymentUnit, DEPENDENCIES_ARCHIVE};
use crate::agent::resource::ResourceIdentifier;
use crate::auth::TokenSource;
use crate::env::{keys, EnvStore};
use crate::error::{MaplinkError, PlatformError, Result};
use crate::http::{build_client, check_status, transport_error};
use crate::runtime::adapter::{
    ExecutionPlatform, JobHandle, JobStatus, PlatformResult, QueryRequest, QueryResponse, Removal,
    StagedUnit,
};
use crate::runtime::stream::{ResponseStream, StreamEvent};

const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const STAGING_PREFIX: &str = "maplink";

/// Connection settings for Vertex AI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,
    /// Bucket name, with or without `gs://`
    pub staging_bucket: Option<String>,
    /// Overrides `https://{location}-aiplatform.googleapis.com/v1`
    pub api_endpoint: Option<String>,
    pub storage_endpoint: String,
    pub request_timeout: Duration,
    pub python_version: String,
}

impl VertexConfig {
    pub fn new(project_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: location.into(),
            staging_bucket: None,
            api_endpoint: None,
            storage_endpoint: STORAGE_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(60),
            python_version: "3.12".to_string(),
        }
    }

    /// Project, region and staging bucket from the env file
    pub fn from_store(store: &EnvStore) -> Result<Self> {
        store.require(&[keys::PROJECT_ID, keys::LOCATION])?;
        let mut config = Self::new(
            store.get_or(keys::PROJECT_ID, ""),
            store.get_or(keys::LOCATION, ""),
        );
        config.staging_bucket = store.get(keys::STAGING_BUCKET).map(str::to_string);
        Ok(config)
    }

    pub fn with_api_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.api_endpoint = endpoint;
        self
    }

    pub fn with_storage_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.storage_endpoint = endpoint.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// API root serving `location`
    pub fn api_base(&self, location: &str) -> String {
        match &self.api_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{location}-aiplatform.googleapis.com/v1"),
        }
    }

    fn bucket(&self) -> Option<&str> {
        self.staging_bucket
            .as_deref()
            .map(|bucket| bucket.trim_start_matches("gs://").trim_end_matches('/'))
            .filter(|bucket| !bucket.is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReasoningEngineBody<'a> {
    display_name: &'a str,
    description: &'a str,
    spec: EngineSpec<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EngineSpec<'a> {
    agent_framework: &'static str,
    package_spec: PackageSpec<'a>,
    deployment_spec: DeploymentSpec<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_options: Option<BuildOptions<'a>>,
}

/// Scripts inside the dependencies archive run while the image is built
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildOptions<'a> {
    installation_scripts: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageSpec<'a> {
    pickle_object_gcs_uri: &'a str,
    dependency_files_gcs_uri: &'a str,
    requirements_gcs_uri: &'a str,
    python_version: &'a str,
}

#[derive(Serialize)]
struct DeploymentSpec<'a> {
    env: Vec<EnvVar<'a>>,
}

#[derive(Serialize)]
struct EnvVar<'a> {
    name: &'a str,
    value: &'a str,
}

impl<'a> ReasoningEngineBody<'a> {
    fn new(staged: &'a StagedUnit, python_version: &'a str) -> Self {
        let env = staged
            .env_vars
            .iter()
            .map(|(name, value)| EnvVar { name, value })
            .collect();
        let build_options = (!staged.installation_scripts.is_empty()).then(|| BuildOptions {
            installation_scripts: &staged.installation_scripts,
        });

        Self {
            display_name: &staged.display_name,
            description: &staged.description,
            spec: EngineSpec {
                agent_framework: "google-adk",
                package_spec: PackageSpec {
                    pickle_object_gcs_uri: &staged.definition_uri,
                    dependency_files_gcs_uri: &staged.dependencies_uri,
                    requirements_gcs_uri: &staged.requirements_uri,
                    python_version,
                },
                deployment_spec: DeploymentSpec { env },
                build_options,
            },
        }
    }
}

/// Long-running operation
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

impl Operation {
    fn status(self) -> PlatformResult<JobStatus> {
        if !self.done {
            return Ok(JobStatus::Running);
        }
        if let Some(error) = self.error {
            return Ok(JobStatus::Failed {
                message: format!("{} (code {})", error.message, error.code),
            });
        }
        self.response
            .as_ref()
            .and_then(|response| response.get("name"))
            .and_then(Value::as_str)
            .map(|name| JobStatus::Succeeded {
                resource_name: name.to_string(),
            })
            .ok_or_else(|| {
                PlatformError::Decode(format!("operation {} finished without a resource", self.name))
            })
    }
}

/// Vertex AI Agent Engine adapter
pub struct VertexAdapter {
    client: Client,
    config: VertexConfig,
    tokens: Arc<TokenSource>,
}

impl VertexAdapter {
    pub fn new(config: VertexConfig, tokens: Arc<TokenSource>) -> Result<Self> {
        let client = build_client(config.request_timeout)
            .map_err(|e| MaplinkError::remote("build HTTP client", 1, e))?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn config(&self) -> &VertexConfig {
        &self.config
    }

    async fn authorized(&self, request: RequestBuilder) -> PlatformResult<RequestBuilder> {
        let token = self.tokens.token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> PlatformResult<reqwest::Response> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate();
        }
        check_status(response).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> PlatformResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(transport_error)
    }

    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        content_type: &'static str,
        body: impl Into<reqwest::Body>,
    ) -> PlatformResult<String> {
        let url = format!("{}/upload/storage/v1/b/{bucket}/o", self.config.storage_endpoint);
        let request = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", object)])
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .body(body);
        self.send(request).await?;
        debug!(bucket = %bucket, object = %object, "Uploaded staging object");
        Ok(format!("gs://{bucket}/{object}"))
    }

    fn resource_url(&self, resource: &ResourceIdentifier) -> String {
        format!("{}/{resource}", self.config.api_base(resource.location()))
    }

    fn query_body(request: &QueryRequest, class_method: &str) -> Value {
        let mut input = json!({
            "user_id": request.user_id,
            "message": request.message,
        });
        if let Some(session_id) = &request.session_id {
            input["session_id"] = json!(session_id);
        }
        json!({ "classMethod": class_method, "input": input })
    }
}

#[async_trait]
impl ExecutionPlatform for VertexAdapter {
    fn platform_type(&self) -> &str {
        "vertex-ai"
    }

    async fn stage_unit(&self, unit: &DeploymentUnit) -> PlatformResult<StagedUnit> {
        let bucket = self
            .config
            .bucket()
            .ok_or_else(|| PlatformError::Decode("no staging bucket configured".into()))?
            .to_string();
        let digest = unit.digest();
        let prefix = format!("{STAGING_PREFIX}/{}", &digest[..digest.len().min(16)]);

        let definition = unit
            .definition_json()
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        let definition_uri = self
            .upload(&bucket, &format!("{prefix}/agent_definition.json"), "application/json", definition)
            .await?;
        let requirements_uri = self
            .upload(&bucket, &format!("{prefix}/requirements.txt"), "text/plain", unit.requirements_txt())
            .await?;

        let archive = unit
            .dependencies_archive()
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        let dependencies_uri = self
            .upload(
                &bucket,
                &format!("{prefix}/{DEPENDENCIES_ARCHIVE}"),
                "application/gzip",
                archive,
            )
            .await?;
        let installation_scripts = unit
            .bootstrap()
            .iter()
            .map(|step| step.path.clone())
            .collect();

        info!(bucket = %bucket, prefix = %prefix, "Deployment unit staged");
        Ok(StagedUnit {
            display_name: unit.display_name().to_string(),
            description: unit.definition().description().to_string(),
            definition_uri,
            requirements_uri,
            dependencies_uri,
            installation_scripts,
            env_vars: unit.env_vars().clone(),
            digest,
        })
    }

    async fn create_or_update_agent(
        &self,
        staged: &StagedUnit,
        existing: Option<&ResourceIdentifier>,
    ) -> PlatformResult<JobHandle> {
        let body = ReasoningEngineBody::new(staged, &self.config.python_version);

        let request = match existing {
            Some(resource) => self
                .client
                .patch(self.resource_url(resource))
                .query(&[("updateMask", "display_name,description,spec")])
                .json(&body),
            None => {
                let url = format!(
                    "{}/projects/{}/locations/{}/reasoningEngines",
                    self.config.api_base(&self.config.location),
                    self.config.project_id,
                    self.config.location
                );
                self.client.post(url).json(&body)
            }
        };

        let operation: Operation = self.send_json(request).await?;
        Ok(JobHandle(operation.name))
    }

    async fn poll_job(&self, job: &JobHandle) -> PlatformResult<JobStatus> {
        let location = location_of(&job.0).unwrap_or(&self.config.location);
        let url = format!("{}/{}", self.config.api_base(location), job.0);
        let operation: Operation = self.send_json(self.client.get(url)).await?;
        operation.status()
    }

    async fn delete_agent(&self, resource: &ResourceIdentifier) -> PlatformResult<Removal> {
        let request = self
            .client
            .delete(self.resource_url(resource))
            .query(&[("force", "true")]);
        match self.send(request).await {
            Ok(_) => Ok(Removal::Removed),
            Err(PlatformError::Status { status: 404, .. }) => Ok(Removal::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn create_session(
        &self,
        resource: &ResourceIdentifier,
        user_id: &str,
    ) -> PlatformResult<String> {
        let body = json!({
            "classMethod": "create_session",
            "input": { "user_id": user_id },
        });
        let url = format!("{}:query", self.resource_url(resource));
        let response: Value = self.send_json(self.client.post(url).json(&body)).await?;

        response["output"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Decode("create_session returned no session id".into()))
    }

    async fn invoke(
        &self,
        resource: &ResourceIdentifier,
        request: &QueryRequest,
    ) -> PlatformResult<QueryResponse> {
        if !request.stream {
            let url = format!("{}:query", self.resource_url(resource));
            let body = Self::query_body(request, "query");
            let response: Value = self.send_json(self.client.post(url).json(&body)).await?;
            return Ok(QueryResponse::Single(
                event_text(&response["output"]).unwrap_or_default(),
            ));
        }

        let url = format!("{}:streamQuery", self.resource_url(resource));
        let body = Self::query_body(request, "stream_query");
        let response = self
            .send(self.client.post(url).query(&[("alt", "sse")]).json(&body))
            .await?;
        Ok(QueryResponse::Stream(ResponseStream::new(event_stream(
            response.bytes_stream().boxed(),
        ))))
    }
}

/// `locations/<loc>` segment of a resource or operation name
fn location_of(name: &str) -> Option<&str> {
    let mut segments = name.split('/');
    while let Some(segment) = segments.next() {
        if segment == "locations" {
            return segments.next().filter(|location| !location.is_empty());
        }
    }
    None
}

/// Text carried by one agent event or query output
pub(crate) fn event_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => {
            if let Some(parts) = map.get("content").and_then(|c| c.get("parts")).and_then(Value::as_array) {
                let text: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                return (!text.is_empty()).then_some(text);
            }
            map.get("output").and_then(event_text)
        }
        _ => None,
    }
}

/// Decode one line of a `streamQuery` body. Blank lines, SSE comments and
/// events without text produce nothing.
pub(crate) fn parse_stream_line(line: &str) -> Option<PlatformResult<StreamEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") || line.starts_with("id:") {
        return None;
    }
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload == "[DONE]" {
        return Some(Ok(StreamEvent::End));
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return Some(Err(PlatformError::Decode(format!("bad stream event: {e}")))),
    };
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("agent reported an error");
        let status = error.get("code").and_then(Value::as_u64).unwrap_or(500) as u16;
        return Some(Err(PlatformError::Status {
            status,
            message: message.to_string(),
        }));
    }
    event_text(&value).map(|text| Ok(StreamEvent::Chunk(text)))
}

struct LineDecoder<S> {
    body: S,
    buffer: BytesMut,
    pending: VecDeque<PlatformResult<StreamEvent>>,
    done: bool,
}

impl<S> LineDecoder<S> {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        if let Some(event) = parse_stream_line(&String::from_utf8_lossy(line)) {
            self.pending.push_back(event);
        }
    }
}

/// Turn a streamed HTTP body into stream events. The body ending is the
/// platform's end marker; a broken body surfaces as a transport error.
pub(crate) fn event_stream<S, E>(body: S) -> impl Stream<Item = PlatformResult<StreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let decoder = LineDecoder {
        body,
        buffer: BytesMut::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(event) = decoder.pending.pop_front() {
                return Some((event, decoder));
            }
            if decoder.done {
                return None;
            }
            match decoder.body.next().await {
                Some(Ok(bytes)) => {
                    decoder.buffer.extend_from_slice(&bytes);
                    decoder.drain_lines();
                }
                Some(Err(e)) => {
                    decoder.done = true;
                    decoder
                        .pending
                        .push_back(Err(PlatformError::Transport(format!("stream interrupted: {e}"))));
                }
                None => {
                    decoder.done = true;
                    let rest = decoder.buffer.split();
                    decoder.push_line(&rest);
                    decoder.pending.push_back(Ok(StreamEvent::End));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_per_location() {
        let config = VertexConfig::new("maps-demo", "us-central1");
        assert_eq!(
            config.api_base("europe-west1"),
            "https://europe-west1-aiplatform.googleapis.com/v1"
        );
        let config = config.with_api_endpoint(Some("http://localhost:9000/v1/".into()));
        assert_eq!(config.api_base("us-central1"), "http://localhost:9000/v1");
    }

    #[test]
    fn test_bucket_name_normalized() {
        let mut config = VertexConfig::new("maps-demo", "us-central1");
        config.staging_bucket = Some("gs://maps-staging/".into());
        assert_eq!(config.bucket(), Some("maps-staging"));
        config.staging_bucket = Some("gs://".into());
        assert_eq!(config.bucket(), None);
    }

    #[test]
    fn test_from_store_requires_project_and_location() {
        let store = EnvStore::from_str_in_memory("GOOGLE_CLOUD_PROJECT=maps-demo\n");
        let err = VertexConfig::from_store(&store).unwrap_err();
        assert_eq!(err.kind(), "MissingConfig");
    }

    fn staged_unit() -> StagedUnit {
        StagedUnit {
            display_name: "Google Maps MCP Agent".into(),
            description: "Answers questions about places".into(),
            definition_uri: "gs://maps-staging/maplink/0f1e/agent_definition.json".into(),
            requirements_uri: "gs://maps-staging/maplink/0f1e/requirements.txt".into(),
            dependencies_uri: "gs://maps-staging/maplink/0f1e/dependencies.tar.gz".into(),
            installation_scripts: vec!["installation_scripts/install_npx.sh".into()],
            env_vars: [("MODEL".to_string(), "gemini-2.5-flash".to_string())].into(),
            digest: "0f1e".into(),
        }
    }

    #[test]
    fn test_engine_body_declares_bootstrap_script() {
        let staged = staged_unit();
        let body = serde_json::to_value(ReasoningEngineBody::new(&staged, "3.12")).unwrap();

        let spec = &body["spec"];
        assert_eq!(
            spec["packageSpec"]["dependencyFilesGcsUri"],
            "gs://maps-staging/maplink/0f1e/dependencies.tar.gz"
        );
        assert_eq!(
            spec["buildOptions"]["installationScripts"],
            json!(["installation_scripts/install_npx.sh"])
        );
        assert_eq!(spec["packageSpec"]["pythonVersion"], "3.12");
        assert_eq!(spec["deploymentSpec"]["env"], json!([{"name": "MODEL", "value": "gemini-2.5-flash"}]));
    }

    #[test]
    fn test_engine_body_without_bootstrap_omits_build_options() {
        let mut staged = staged_unit();
        staged.installation_scripts.clear();
        let body = serde_json::to_value(ReasoningEngineBody::new(&staged, "3.12")).unwrap();
        assert!(body["spec"].get("buildOptions").is_none());
    }

    #[test]
    fn test_operation_states() {
        let running: Operation = serde_json::from_str(r#"{"name": "projects/123/locations/us-central1/operations/9"}"#).unwrap();
        assert_eq!(running.status().unwrap(), JobStatus::Running);

        let done: Operation = serde_json::from_str(
            r#"{"name": "op", "done": true, "response": {"name": "projects/123/locations/us-central1/reasoningEngines/abc"}}"#,
        )
        .unwrap();
        assert_eq!(
            done.status().unwrap(),
            JobStatus::Succeeded {
                resource_name: "projects/123/locations/us-central1/reasoningEngines/abc".into()
            }
        );

        let failed: Operation = serde_json::from_str(
            r#"{"name": "op", "done": true, "error": {"code": 3, "message": "pip install failed"}}"#,
        )
        .unwrap();
        assert!(matches!(failed.status().unwrap(), JobStatus::Failed { message } if message.contains("pip install failed")));
    }

    #[test]
    fn test_location_of_operation() {
        assert_eq!(
            location_of("projects/123/locations/asia-east1/reasoningEngines/abc/operations/7"),
            Some("asia-east1")
        );
        assert_eq!(location_of("operations/7"), None);
    }

    #[test]
    fn test_event_text_from_content_parts() {
        let event = json!({
            "author": "maps_assistant_agent",
            "content": {"role": "model", "parts": [{"text": "Head south "}, {"text": "on Bannan Rd"}]}
        });
        assert_eq!(event_text(&event).as_deref(), Some("Head south on Bannan Rd"));

        let tool_call = json!({"content": {"parts": [{"function_call": {"name": "maps_directions"}}]}});
        assert_eq!(event_text(&tool_call), None);
    }

    #[test]
    fn test_parse_stream_lines() {
        assert!(parse_stream_line("").is_none());
        assert!(parse_stream_line(": keep-alive").is_none());
        assert_eq!(
            parse_stream_line(r#"data: {"content": {"parts": [{"text": "25 min"}]}}"#)
                .unwrap()
                .unwrap(),
            StreamEvent::Chunk("25 min".into())
        );
        assert!(matches!(
            parse_stream_line(r#"{"error": {"code": 429, "message": "quota"}}"#),
            Some(Err(PlatformError::Status { status: 429, .. }))
        ));
        assert!(matches!(parse_stream_line("data: {not json"), Some(Err(PlatformError::Decode(_)))));
    }

    #[tokio::test]
    async fn test_event_stream_handles_split_lines() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"{\"content\": {\"parts\": [{\"te")),
            Ok(Bytes::from_static(b"xt\": \"Route found\"}]}}\n\n")),
            Ok(Bytes::from_static(b"{\"content\": {\"parts\": [{\"text\": \": 25 min\"}]}}")),
        ]);

        let chunks = ResponseStream::new(event_stream(body))
            .collect_chunks()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["Route found", ": 25 min"]);
    }

    #[tokio::test]
    async fn test_interrupted_body_is_transient() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"content\": {\"parts\": [{\"text\": \"partial\"}]}}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let mut stream = ResponseStream::new(event_stream(body));
        assert_eq!(stream.next_chunk().await.unwrap().unwrap(), "partial");
        let err = stream.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "RemoteTransientError");
        assert!(stream.next_chunk().await.is_none());
    }
}
