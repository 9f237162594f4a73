//! Per-turn shared state.
//!
//! One [`TurnState`] is created for every user turn and handed to each
//! capability as `&mut TurnState`. The turn loop owns it and calls
//! capabilities one after another, so there is never more than one writer.
//! It is dropped when the turn ends. Only a turn that produces a reply carries
//! its database settings and artifacts back into the session.

use crate::artifacts::Artifact;
use serde_json::{Map, Value};

/// Parsed intent-classification result.
pub const INTENT_AGENT_OUTPUT: &str = "intent_agent_output";
/// Raw output of the retrieval sub-agent.
pub const DB_AGENT_OUTPUT: &str = "db_agent_output";
/// Output of the analysis sub-agent (or the passed-through retrieval output).
pub const DS_AGENT_OUTPUT: &str = "ds_agent_output";
/// Tabular data written by the retrieval sub-agent's state delta.
pub const QUERY_RESULT: &str = "query_result";
/// SQL text, when the retrieval sub-agent reports it.
pub const SQL_QUERY: &str = "sql_query";
/// Nested database configuration.
pub const ALL_DB_SETTINGS: &str = "all_db_settings";
/// Active database inside [`ALL_DB_SETTINGS`].
pub const USE_DATABASE: &str = "use_database";

/// Database used when a session has not selected one.
pub const DEFAULT_DATABASE: &str = "BigQuery";

#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    values: Map<String, Value>,
    artifacts: Vec<Artifact>,
}

impl Default for TurnState {
    fn default() -> Self {
        Self::with_db_settings(default_db_settings())
    }
}

/// `{"use_database": "BigQuery"}`
pub fn default_db_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert(USE_DATABASE.to_string(), Value::String(DEFAULT_DATABASE.to_string()));
    settings
}

impl TurnState {
    /// Fresh turn state seeded with the session's database settings.
    pub fn with_db_settings(settings: Map<String, Value>) -> Self {
        let mut values = Map::new();
        values.insert(ALL_DB_SETTINGS.to_string(), Value::Object(settings));
        Self {
            values,
            artifacts: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge entries reported by a sub-agent.
    ///
    /// Nested objects under [`ALL_DB_SETTINGS`] are merged key by key so a
    /// delta cannot drop the active database; every other key is replaced.
    pub fn merge_delta(&mut self, delta: Map<String, Value>) {
        for (key, value) in delta {
            match (key.as_str(), value) {
                (ALL_DB_SETTINGS, Value::Object(incoming)) => {
                    if let Some(settings) = self.db_settings_mut() {
                        settings.extend(incoming);
                    }
                }
                (_, value) => {
                    self.values.insert(key, value);
                }
            }
        }
    }

    /// Settings object, replacing a non-object value with an empty one.
    fn db_settings_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let entry = self
            .values
            .entry(ALL_DB_SETTINGS)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut()
    }

    pub fn db_settings(&self) -> Map<String, Value> {
        self.values
            .get(ALL_DB_SETTINGS)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn use_database(&self) -> Option<&str> {
        self.values
            .get(ALL_DB_SETTINGS)
            .and_then(|s| s.get(USE_DATABASE))
            .and_then(Value::as_str)
    }

    pub fn set_use_database(&mut self, database: Value) {
        if let Some(settings) = self.db_settings_mut() {
            settings.insert(USE_DATABASE.to_string(), database);
        }
    }

    /// Text stored under `key`; non-string values are serialized.
    pub fn text(&self, key: &str) -> Option<String> {
        self.values.get(key).map(value_to_text)
    }

    /// Note artifacts reported by `source`. A name already seen this turn
    /// keeps its first producer.
    pub fn record_artifacts(&mut self, source: &str, names: impl IntoIterator<Item = String>) {
        for name in names {
            if !self.artifacts.iter().any(|a| a.name == name) {
                self.artifacts.push(Artifact::named(name, source));
            }
        }
    }

    /// Artifacts produced during this turn, in order of appearance.
    /// They reach the session store only when the turn finishes.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.name.clone()).collect()
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Strings verbatim, everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
