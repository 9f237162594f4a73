//! Sessions: database settings and artifacts shared by a user's turns.

use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::state::{default_db_settings, TurnState, DEFAULT_DATABASE, USE_DATABASE};
use quarry_common::AgentMessage;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Messages kept in a session's history; older exchanges are dropped first.
pub const MAX_HISTORY_MESSAGES: usize = 200;

pub struct Session {
    id: String,
    db_settings: Map<String, Value>,
    artifacts: Arc<dyn ArtifactStore>,
    history: Vec<AgentMessage>,
    turns: usize,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_db_settings(id, default_db_settings())
    }

    pub fn with_db_settings(id: impl Into<String>, db_settings: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            db_settings,
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            history: Vec::new(),
            turns: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn artifacts(&self) -> &dyn ArtifactStore {
        self.artifacts.as_ref()
    }

    pub fn use_database(&self) -> Option<&str> {
        self.db_settings.get(USE_DATABASE).and_then(Value::as_str)
    }

    /// Fresh turn state seeded with this session's settings.
    pub fn begin_turn(&self) -> TurnState {
        TurnState::with_db_settings(self.db_settings.clone())
    }

    /// Keep what outlives the turn and log the exchange.
    ///
    /// This is the only place a turn's artifacts reach the store, so a turn
    /// that never produces a reply leaves the session untouched.
    pub async fn finish_turn(
        &mut self,
        state: &TurnState,
        question: AgentMessage,
        reply: AgentMessage,
    ) {
        self.db_settings = state.db_settings();
        for artifact in state.artifacts() {
            self.artifacts.save(artifact.clone()).await;
        }
        self.history.push(question);
        self.history.push(reply);
        if self.history.len() > MAX_HISTORY_MESSAGES {
            let excess = self.history.len() - MAX_HISTORY_MESSAGES;
            self.history.drain(..excess);
        }
        self.turns += 1;
    }

    /// The most recent exchanges, oldest first, capped at
    /// [`MAX_HISTORY_MESSAGES`].
    pub fn history(&self) -> &[AgentMessage] {
        &self.history
    }

    /// Completed turns, including those trimmed from the history.
    pub fn turns(&self) -> usize {
        self.turns
    }

    pub async fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            use_database: self.use_database().map(str::to_string),
            turns: self.turns(),
            artifacts: self.artifacts.list().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub use_database: Option<String>,
    pub turns: usize,
    pub artifacts: Vec<String>,
}

/// All live sessions, each behind its own lock so turns of one session run
/// one at a time while different sessions proceed independently.
///
/// Sessions are never evicted. A turn posted under an unknown id creates
/// the session on the spot, so the map grows with every distinct id until
/// the process restarts. Each session's history is capped at
/// [`MAX_HISTORY_MESSAGES`] but its artifact store is not.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    default_database: String,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_default_database(DEFAULT_DATABASE)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose new sessions start on `database`.
    pub fn with_default_database(database: impl Into<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_database: database.into(),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Register a session under a fresh id.
    pub async fn create(&self) -> Arc<Mutex<Session>> {
        self.get_or_create(&uuid::Uuid::new_v4().to_string()).await
    }

    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.get(id).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(session_id = %id, "Creating session");
                let mut settings = default_db_settings();
                settings.insert(
                    USE_DATABASE.to_string(),
                    Value::String(self.default_database.clone()),
                );
                Arc::new(Mutex::new(Session::with_db_settings(id, settings)))
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
