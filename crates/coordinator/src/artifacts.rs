//! Session artifact storage.
//!
//! Sub-agents report artifacts (plots, exports) by name; once a turn
//! completes the session records them here so `load_artifacts` can hand them
//! back to the planner in later turns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Sub-agent that produced the artifact
    pub source: String,
    /// Inline content, when the producer shipped it with the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Artifact {
    pub fn named(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Where a session's artifacts live.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert or replace an artifact.
    async fn save(&self, artifact: Artifact);

    async fn load(&self, name: &str) -> Option<Artifact>;

    /// All artifact names, sorted.
    async fn list(&self) -> Vec<String>;
}

#[derive(Default, Clone)]
pub struct InMemoryArtifactStore {
    artifacts: Arc<RwLock<BTreeMap<String, Artifact>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, artifact: Artifact) {
        debug!(artifact = %artifact.name, source = %artifact.source, "Storing artifact");
        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(artifact.name.clone(), artifact);
    }

    async fn load(&self, name: &str) -> Option<Artifact> {
        self.artifacts.read().await.get(name).cloned()
    }

    async fn list(&self) -> Vec<String> {
        self.artifacts.read().await.keys().cloned().collect()
    }
}
