//! Sub-agent adapters.
//!
//! The coordinator talks to three narrow agents (intent classification,
//! database retrieval, data analysis) through the [`SubAgent`] port. This
//! crate provides the two ways of backing that port:
//!
//! - **[`LlmSubAgent`]**: a prompted model call; the default for intent
//!   classification
//! - **[`HttpSubAgent`]**: an independently hosted agent reached over HTTP;
//!   the usual choice for NL-to-SQL and NL-to-Python agents, which need their
//!   own execution sandboxes
//!
//! ```text
//!              ┌──────────────────┐
//!              │   Coordinator    │
//!              └────────┬─────────┘
//!                       │ SubAgent::run
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   [intent]       [database]     [analytics]
//!   LlmSubAgent    HttpSubAgent   HttpSubAgent
//! ```

pub mod config;
pub mod http_agent;
pub mod intent;
pub mod llm_agent;

pub use config::{ModelDefaults, SubAgentConfig, build_sub_agent};
pub use http_agent::HttpSubAgent;
pub use intent::INTENT_SYSTEM_PROMPT;
pub use llm_agent::LlmSubAgent;
pub use quarry_common::{SubAgent, SubAgentOutput};
