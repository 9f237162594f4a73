//! Common types and traits shared across Quarry crates.
//!
//! This crate provides the foundational abstractions that the coordinator,
//! the sub-agent adapters and the model clients use to communicate.

pub mod error;
pub mod message;
pub mod traits;

pub use error::{QuarryError, Result};
pub use message::{AgentMessage, MessageRole};
pub use traits::{SubAgent, SubAgentOutput};
