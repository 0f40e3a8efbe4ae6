//! Agent module
//!
//! This module contains the orchestration core: packaging the maps agent,
//! deploying it, querying it, and managing its chat-UI integration.

pub mod definition;
pub mod deploy;
pub mod integration;
pub mod packager;
pub mod query;
pub mod resource;
pub mod state;
