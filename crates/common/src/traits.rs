//! The sub-agent port.
//!
//! Defined in `quarry-common` so that both the coordinator and the adapter
//! crate can reference it without circular dependencies.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a sub-agent hands back for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentOutput {
    /// Free-form text produced by the sub-agent
    #[serde(alias = "output")]
    pub text: String,

    /// Turn-state entries the sub-agent wants merged into the caller's state
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub state_delta: serde_json::Map<String, serde_json::Value>,

    /// Names of artifacts (plots, exports) the sub-agent produced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl SubAgentOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state_delta.insert(key.into(), value);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>) -> Self {
        self.artifacts.push(name.into());
        self
    }
}

/// An independently hosted agent wrapping one narrow task.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Short identifier used in logs and traces.
    fn name(&self) -> &str;

    /// Forward a natural-language request and wait for the result.
    async fn run(&self, request: &str) -> Result<SubAgentOutput>;
}
