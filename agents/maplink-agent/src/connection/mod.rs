//! Connection module
//!
//! This module handles all communication with the chat-UI platform,
//! including its wire format and the Discovery Engine client.

pub mod discovery;
pub mod platform;
pub mod protocol;
