//! Maplink Agent Library
//!
//! This crate provides the core functionality for deploying the Google Maps
//! MCP agent to Vertex AI Agent Engine and linking it into the enterprise
//! chat UI, with the local env file as the integration record.

pub mod agent;
pub mod auth;
pub mod clock;
pub mod connection;
pub mod env;
pub mod error;
pub mod http;
pub mod retry;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use agent::deploy::{DeployPhase, DeploymentClient};
pub use agent::integration::{IntegrationManager, LinkRequest};
pub use agent::packager::Packager;
pub use agent::query::QueryClient;
pub use agent::resource::ResourceIdentifier;
pub use agent::state::{IntegrationRecord, LinkStatus};
pub use connection::discovery::DiscoveryEngineClient;
pub use connection::platform::ChatUiPlatform;
pub use env::EnvStore;
pub use error::{MaplinkError, PlatformError, Result};
pub use runtime::adapter::ExecutionPlatform;
pub use runtime::vertex::VertexAdapter;
