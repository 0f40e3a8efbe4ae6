//! Vertex AI Runtime Module
//!
//! Provides the Vertex AI Agent Engine implementation of the ExecutionPlatform trait.

pub mod adapter;

pub use adapter::{VertexAdapter, VertexConfig};
