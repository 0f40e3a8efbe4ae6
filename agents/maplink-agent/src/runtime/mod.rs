//! Runtime module
//!
//! This module provides abstraction over the managed agent-execution
//! platform through a common ExecutionPlatform trait.

pub mod adapter;
pub mod stream;
pub mod vertex;
