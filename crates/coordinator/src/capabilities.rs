//! The tool functions the coordinator exposes to its planner.
//!
//! Every capability reads and writes the turn's [`TurnState`] and returns a
//! [`CapabilityOutcome`]. Sub-agent failures never escape as `Err`; they are
//! reported as a [`CapabilityFailure`] whose sentinel text the planner sees.

use crate::artifacts::{Artifact, ArtifactStore};
use crate::intent::{extract_json_from_model_output, NOT_APPLICABLE, USE_DATABASE};
use crate::prompt::compose_analysis_prompt;
use crate::state::{
    TurnState, DB_AGENT_OUTPUT, DEFAULT_DATABASE, DS_AGENT_OUTPUT, INTENT_AGENT_OUTPUT,
    QUERY_RESULT,
};
use quarry_common::SubAgent;
use quarry_llm::{ToolCall, ToolSpec};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CALL_INTENT_UNDERSTANDING: &str = "call_intent_understanding";
pub const CALL_DB_AGENT: &str = "call_db_agent";
pub const CALL_DS_AGENT: &str = "call_ds_agent";
pub const LOAD_ARTIFACTS: &str = "load_artifacts";

/// Why a capability could not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityFailure {
    /// The intent sub-agent's reply held no decodable JSON object
    UndecodableIntent,
    RetrievalFailed,
    /// Analysis requested but nothing has been retrieved
    NoDataForAnalysis,
    AnalysisFailed,
}

impl CapabilityFailure {
    /// Exact text returned to the planner.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Self::UndecodableIntent => "can't decode intent_agent_output",
            Self::RetrievalFailed => "can't process the request",
            Self::NoDataForAnalysis => "No data available for analysis.",
            Self::AnalysisFailed => "can't process the analysis request",
        }
    }

    pub fn from_sentinel(text: &str) -> Option<Self> {
        [
            Self::UndecodableIntent,
            Self::RetrievalFailed,
            Self::NoDataForAnalysis,
            Self::AnalysisFailed,
        ]
        .into_iter()
        .find(|f| f.sentinel() == text)
    }
}

impl fmt::Display for CapabilityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sentinel())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityOutcome {
    Value(Value),
    Failure(CapabilityFailure),
    /// The call itself was invalid: unknown tool or bad arguments
    Rejected(String),
}

impl CapabilityOutcome {
    fn text(text: impl Into<String>) -> Self {
        Self::Value(Value::String(text.into()))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn failure(&self) -> Option<CapabilityFailure> {
        match self {
            Self::Failure(f) => Some(*f),
            _ => None,
        }
    }

    /// What the planner reads as the tool result.
    pub fn to_planner_text(&self) -> String {
        match self {
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(other) => other.to_string(),
            Self::Failure(f) => f.sentinel().to_string(),
            Self::Rejected(reason) => format!("error: {reason}"),
        }
    }
}

/// The three sub-agents behind the coordinator's tools.
#[derive(Clone)]
pub struct Capabilities {
    intent: Arc<dyn SubAgent>,
    database: Arc<dyn SubAgent>,
    analytics: Arc<dyn SubAgent>,
}

impl Capabilities {
    pub fn new(
        intent: Arc<dyn SubAgent>,
        database: Arc<dyn SubAgent>,
        analytics: Arc<dyn SubAgent>,
    ) -> Self {
        Self {
            intent,
            database,
            analytics,
        }
    }

    /// Classify the user question.
    ///
    /// On success the parsed object is stored under `intent_agent_output` and
    /// returned; a `use_database` entry also becomes the active database.
    pub async fn call_intent_understanding(
        &self,
        question: &str,
        state: &mut TurnState,
    ) -> CapabilityOutcome {
        let output = match self.intent.run(question).await {
            Ok(output) => output,
            Err(e) => {
                warn!(agent = %self.intent.name(), error = %e, "Intent sub-agent failed");
                return CapabilityOutcome::Failure(CapabilityFailure::UndecodableIntent);
            }
        };

        let intent = match extract_json_from_model_output(&output.text) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "Could not decode intent output");
                return CapabilityOutcome::Failure(CapabilityFailure::UndecodableIntent);
            }
        };

        state.merge_delta(output.state_delta);
        if let Some(database) = intent.get(USE_DATABASE) {
            info!(database = %database, "Switching active database");
            state.set_use_database(database.clone());
        }

        let intent = Value::Object(intent);
        state.set(INTENT_AGENT_OUTPUT, intent.clone());
        debug!(intent = %intent, "Intent classified");
        CapabilityOutcome::Value(intent)
    }

    /// Run the SQL-oriented sub-question against the retrieval sub-agent.
    pub async fn call_db_agent(&self, question: &str, state: &mut TurnState) -> CapabilityOutcome {
        // Every database is served by the one configured retrieval agent
        info!(
            agent = %self.database.name(),
            use_database = state.use_database().unwrap_or(DEFAULT_DATABASE),
            question_preview = %question.chars().take(50).collect::<String>(),
            "Retrieving data"
        );

        match self.database.run(question).await {
            Ok(output) => {
                state.set(DB_AGENT_OUTPUT, Value::String(output.text.clone()));
                state.merge_delta(output.state_delta);
                state.record_artifacts(self.database.name(), output.artifacts);
                CapabilityOutcome::text(output.text)
            }
            Err(e) => {
                warn!(agent = %self.database.name(), error = %e, "Retrieval failed");
                CapabilityOutcome::Failure(CapabilityFailure::RetrievalFailed)
            }
        }
    }

    /// Analyze the retrieved data.
    ///
    /// `N/A` passes the retrieval output through without a remote call.
    pub async fn call_ds_agent(&self, question: &str, state: &mut TurnState) -> CapabilityOutcome {
        if question.trim() == NOT_APPLICABLE {
            return match state.get(DB_AGENT_OUTPUT).cloned() {
                Some(db_output) => {
                    state.set(DS_AGENT_OUTPUT, db_output.clone());
                    CapabilityOutcome::Value(db_output)
                }
                None => CapabilityOutcome::Failure(CapabilityFailure::NoDataForAnalysis),
            };
        }

        let Some(data) = state.get(QUERY_RESULT) else {
            info!("Analysis requested before any data was retrieved");
            return CapabilityOutcome::Failure(CapabilityFailure::NoDataForAnalysis);
        };
        let prompt = compose_analysis_prompt(question, data);

        info!(
            agent = %self.analytics.name(),
            question_preview = %question.chars().take(50).collect::<String>(),
            "Analyzing data"
        );

        match self.analytics.run(&prompt).await {
            Ok(output) => {
                state.set(DS_AGENT_OUTPUT, Value::String(output.text.clone()));
                state.merge_delta(output.state_delta);
                state.record_artifacts(self.analytics.name(), output.artifacts);
                CapabilityOutcome::text(output.text)
            }
            Err(e) => {
                warn!(agent = %self.analytics.name(), error = %e, "Analysis failed");
                CapabilityOutcome::Failure(CapabilityFailure::AnalysisFailed)
            }
        }
    }

    /// Return named artifacts, or the available names when none are given.
    ///
    /// `pending` holds artifacts produced earlier in the current turn; they
    /// shadow stored artifacts of the same name.
    pub async fn load_artifacts(
        &self,
        names: &[String],
        pending: &[Artifact],
        store: &dyn ArtifactStore,
    ) -> CapabilityOutcome {
        if names.is_empty() {
            let mut available = store.list().await;
            available.extend(pending.iter().map(|a| a.name.clone()));
            available.sort();
            available.dedup();
            return CapabilityOutcome::Value(json!({ "available": available }));
        }

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            let artifact = match pending.iter().find(|a| &a.name == name) {
                Some(artifact) => Some(artifact.clone()),
                None => store.load(name).await,
            };
            match artifact {
                Some(artifact) => found.push(artifact),
                None => missing.push(name.clone()),
            }
        }

        CapabilityOutcome::Value(json!({ "artifacts": found, "missing": missing }))
    }

    /// Declarations handed to the planner.
    pub fn tool_specs() -> Vec<ToolSpec> {
        let question = |description: &str| {
            json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": description }
                },
                "required": ["question"]
            })
        };

        vec![
            ToolSpec {
                name: CALL_INTENT_UNDERSTANDING.to_string(),
                description: "Classify the user question. Returns a JSON object with greeting_message, use_database, nl_to_sql_question/nl_to_python_question, or nothing when out of scope.".to_string(),
                parameters: question("The user question, verbatim"),
            },
            ToolSpec {
                name: CALL_DB_AGENT.to_string(),
                description: "Retrieve data from the database for a natural-language question.".to_string(),
                parameters: question("What data is needed, in natural language"),
            },
            ToolSpec {
                name: CALL_DS_AGENT.to_string(),
                description: "Analyze the previously retrieved data. Pass N/A to return the retrieval result unchanged.".to_string(),
                parameters: question("The analysis to perform, or N/A"),
            },
            ToolSpec {
                name: LOAD_ARTIFACTS.to_string(),
                description: "Load artifacts such as plots produced earlier in the session. With no names, lists what is available.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "artifact_names": { "type": "array", "items": { "type": "string" } }
                    }
                }),
            },
        ]
    }

    /// Route one planner call to its capability.
    ///
    /// `store` is only read. Artifacts reported during the call stay in
    /// `state` until the session finishes the turn.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        state: &mut TurnState,
        store: &dyn ArtifactStore,
    ) -> CapabilityOutcome {
        match call.name.as_str() {
            LOAD_ARTIFACTS => {
                let names = artifact_names(&call.arguments);
                self.load_artifacts(&names, state.artifacts(), store).await
            }
            CALL_INTENT_UNDERSTANDING | CALL_DB_AGENT | CALL_DS_AGENT => {
                let Some(question) = call.arguments.get("question").and_then(Value::as_str) else {
                    return CapabilityOutcome::Rejected(format!(
                        "{} requires a string 'question' argument",
                        call.name
                    ));
                };
                match call.name.as_str() {
                    CALL_INTENT_UNDERSTANDING => self.call_intent_understanding(question, state).await,
                    CALL_DB_AGENT => self.call_db_agent(question, state).await,
                    _ => self.call_ds_agent(question, state).await,
                }
            }
            unknown => {
                warn!(tool = %unknown, "Planner requested an unknown tool");
                CapabilityOutcome::Rejected(format!("unknown tool '{unknown}'"))
            }
        }
    }
}

/// `artifact_names` may be a list or a single string.
fn artifact_names(arguments: &Value) -> Vec<String> {
    match arguments.get("artifact_names") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(name)) => vec![name.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::state::SQL_QUERY;
    use async_trait::async_trait;
    use quarry_common::{QuarryError, Result, SubAgentOutput};
    use std::sync::Mutex;

    /// Replies with a fixed output and records every request.
    struct ScriptedAgent {
        name: &'static str,
        reply: Result<SubAgentOutput>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn ok(name: &'static str, output: SubAgentOutput) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(output),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err(QuarryError::Agent("connection reset".to_string())),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubAgent for ScriptedAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, request: &str) -> Result<SubAgentOutput> {
            self.requests.lock().unwrap().push(request.to_string());
            match &self.reply {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(QuarryError::Agent(e.to_string())),
            }
        }
    }

    fn idle() -> Arc<ScriptedAgent> {
        ScriptedAgent::ok("idle", SubAgentOutput::text("unused"))
    }

    fn with_intent(intent: Arc<ScriptedAgent>) -> Capabilities {
        Capabilities::new(intent, idle(), idle())
    }

    #[tokio::test]
    async fn malformed_intent_returns_sentinel_and_keeps_database() {
        for reply in ["sure, sounds good", "{not json}", "```json\n{\"a\": \n```", ""] {
            let caps = with_intent(ScriptedAgent::ok("intent", SubAgentOutput::text(reply)));
            let mut state = TurnState::default();
            let before = state.db_settings();

            let outcome = caps.call_intent_understanding("hello?", &mut state).await;

            assert_eq!(outcome.to_planner_text(), "can't decode intent_agent_output");
            assert_eq!(state.db_settings(), before);
            assert!(!state.contains(INTENT_AGENT_OUTPUT));
        }
    }

    #[tokio::test]
    async fn intent_agent_failure_returns_sentinel() {
        let caps = with_intent(ScriptedAgent::failing("intent"));
        let mut state = TurnState::default();
        let outcome = caps.call_intent_understanding("hello?", &mut state).await;
        assert_eq!(outcome.failure(), Some(CapabilityFailure::UndecodableIntent));
        assert_eq!(state.use_database(), Some("BigQuery"));
    }

    #[tokio::test]
    async fn use_database_overwrites_active_database() {
        let caps = with_intent(ScriptedAgent::ok(
            "intent",
            SubAgentOutput::text("```json\n{\"use_database\": \"AlloyDB\"}\n```"),
        ));
        let mut state = TurnState::default();

        let outcome = caps.call_intent_understanding("use alloydb", &mut state).await;

        assert_eq!(outcome, CapabilityOutcome::Value(json!({"use_database": "AlloyDB"})));
        assert_eq!(state.use_database(), Some("AlloyDB"));
        assert_eq!(state.get(INTENT_AGENT_OUTPUT), Some(&json!({"use_database": "AlloyDB"})));
    }

    #[tokio::test]
    async fn question_intent_is_stored_and_returned() {
        let caps = with_intent(ScriptedAgent::ok(
            "intent",
            SubAgentOutput::text(r#"{"nl_to_sql_question": "top categories", "nl_to_python_question": "N/A"}"#),
        ));
        let mut state = TurnState::default();

        let outcome = caps.call_intent_understanding("top categories?", &mut state).await;

        assert!(outcome.is_value());
        assert_eq!(state.get(INTENT_AGENT_OUTPUT).unwrap()["nl_to_sql_question"], "top categories");
        assert_eq!(state.use_database(), Some("BigQuery"));
    }

    #[tokio::test]
    async fn retrieval_stores_output_and_delta() {
        let database = ScriptedAgent::ok(
            "database",
            SubAgentOutput::text("1 row")
                .with_state(QUERY_RESULT, json!([{"n": 1}]))
                .with_state(SQL_QUERY, json!("SELECT 1 AS n")),
        );
        let caps = Capabilities::new(idle(), database.clone(), idle());
        let mut state = TurnState::default();

        let outcome = caps.call_db_agent("how many?", &mut state).await;

        assert_eq!(outcome.to_planner_text(), "1 row");
        assert_eq!(state.text(DB_AGENT_OUTPUT).as_deref(), Some("1 row"));
        assert_eq!(state.get(QUERY_RESULT), Some(&json!([{"n": 1}])));
        assert_eq!(database.requests(), vec!["how many?".to_string()]);
    }

    #[tokio::test]
    async fn retrieval_failure_returns_sentinel() {
        let caps = Capabilities::new(idle(), ScriptedAgent::failing("database"), idle());
        let mut state = TurnState::default();

        let outcome = caps.call_db_agent("how many?", &mut state).await;

        assert_eq!(outcome.to_planner_text(), "can't process the request");
        assert!(!state.contains(DB_AGENT_OUTPUT));
    }

    #[tokio::test]
    async fn analysis_not_applicable_passes_retrieval_through() {
        let analytics = idle();
        let caps = Capabilities::new(idle(), idle(), analytics.clone());
        let mut state = TurnState::default();
        state.set(DB_AGENT_OUTPUT, json!("3 rows"));

        let outcome = caps.call_ds_agent("N/A", &mut state).await;

        assert_eq!(outcome.to_planner_text(), "3 rows");
        assert_eq!(state.text(DS_AGENT_OUTPUT).as_deref(), Some("3 rows"));
        assert!(analytics.requests().is_empty());
    }

    #[tokio::test]
    async fn analysis_not_applicable_on_empty_state() {
        let analytics = idle();
        let caps = Capabilities::new(idle(), idle(), analytics.clone());
        let mut state = TurnState::default();
        let before = state.snapshot();

        let outcome = caps.call_ds_agent("N/A", &mut state).await;

        assert_eq!(outcome.to_planner_text(), "No data available for analysis.");
        assert_eq!(state.snapshot(), before);
        assert!(analytics.requests().is_empty());
    }

    #[tokio::test]
    async fn analysis_without_query_result_makes_no_call() {
        let analytics = idle();
        let caps = Capabilities::new(idle(), idle(), analytics.clone());
        let mut state = TurnState::default();
        state.set(DB_AGENT_OUTPUT, json!("query failed"));

        let outcome = caps.call_ds_agent("plot sales", &mut state).await;

        assert_eq!(outcome.to_planner_text(), "No data available for analysis.");
        assert!(analytics.requests().is_empty());
    }

    #[tokio::test]
    async fn analysis_prompt_carries_question_and_data() {
        let analytics = ScriptedAgent::ok(
            "analytics",
            SubAgentOutput::text("Chart saved").with_artifact("sales_by_category.png"),
        );
        let caps = Capabilities::new(idle(), idle(), analytics.clone());
        let mut state = TurnState::default();
        state.set(
            QUERY_RESULT,
            json!([{"category_name": "CANADIAN WHISKIES", "total_sales": 520819727.08}]),
        );

        let outcome = caps
            .call_ds_agent("Create a bar chart of sales by category", &mut state)
            .await;

        assert_eq!(outcome.to_planner_text(), "Chart saved");
        let requests = analytics.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("Create a bar chart of sales by category"));
        assert!(requests[0].contains("CANADIAN WHISKIES"));
        assert!(requests[0].contains("520819727.08"));
        assert_eq!(state.text(DS_AGENT_OUTPUT).as_deref(), Some("Chart saved"));
        assert_eq!(state.artifact_names(), vec!["sales_by_category.png"]);
        assert_eq!(state.artifacts()[0].source, "analytics");
    }

    #[tokio::test]
    async fn analysis_failure_returns_sentinel() {
        let caps = Capabilities::new(idle(), idle(), ScriptedAgent::failing("analytics"));
        let mut state = TurnState::default();
        state.set(QUERY_RESULT, json!([1]));

        let outcome = caps.call_ds_agent("plot", &mut state).await;

        assert_eq!(outcome.failure(), Some(CapabilityFailure::AnalysisFailed));
        assert_eq!(outcome.to_planner_text(), "can't process the analysis request");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_tools_and_bad_arguments() {
        let caps = Capabilities::new(idle(), idle(), idle());
        let store = InMemoryArtifactStore::new();
        let mut state = TurnState::default();

        let unknown = ToolCall {
            id: "1".to_string(),
            name: "drop_tables".to_string(),
            arguments: json!({}),
        };
        let outcome = caps.dispatch(&unknown, &mut state, &store).await;
        assert_eq!(outcome.to_planner_text(), "error: unknown tool 'drop_tables'");

        let bad = ToolCall {
            id: "2".to_string(),
            name: CALL_DB_AGENT.to_string(),
            arguments: json!({"query": "x"}),
        };
        assert!(matches!(
            caps.dispatch(&bad, &mut state, &store).await,
            CapabilityOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn dispatch_keeps_artifacts_pending_but_loadable() {
        let analytics = ScriptedAgent::ok(
            "analytics",
            SubAgentOutput::text("done").with_artifact("plot.png"),
        );
        let caps = Capabilities::new(idle(), idle(), analytics);
        let store = InMemoryArtifactStore::new();
        store.save(Artifact::named("earlier.csv", "database")).await;
        let mut state = TurnState::default();
        state.set(QUERY_RESULT, json!([1]));

        let call = ToolCall {
            id: "1".to_string(),
            name: CALL_DS_AGENT.to_string(),
            arguments: json!({"question": "plot it"}),
        };
        caps.dispatch(&call, &mut state, &store).await;

        assert!(store.load("plot.png").await.is_none());
        assert_eq!(state.artifacts(), &[Artifact::named("plot.png", "analytics")]);

        let load = ToolCall {
            id: "2".to_string(),
            name: LOAD_ARTIFACTS.to_string(),
            arguments: json!({"artifact_names": ["plot.png", "earlier.csv", "other.png"]}),
        };
        match caps.dispatch(&load, &mut state, &store).await {
            CapabilityOutcome::Value(value) => {
                assert_eq!(value["artifacts"][0]["name"], "plot.png");
                assert_eq!(value["artifacts"][0]["source"], "analytics");
                assert_eq!(value["artifacts"][1]["name"], "earlier.csv");
                assert_eq!(value["missing"], json!(["other.png"]));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let list = ToolCall {
            id: "3".to_string(),
            name: LOAD_ARTIFACTS.to_string(),
            arguments: json!({}),
        };
        assert_eq!(
            caps.dispatch(&list, &mut state, &store).await,
            CapabilityOutcome::Value(json!({"available": ["earlier.csv", "plot.png"]}))
        );
    }

    #[test]
    fn sentinels_round_trip() {
        assert_eq!(
            CapabilityFailure::from_sentinel("can't process the request"),
            Some(CapabilityFailure::RetrievalFailed)
        );
        assert_eq!(CapabilityFailure::from_sentinel("3 rows"), None);
    }

    #[test]
    fn tool_specs_declare_all_capabilities() {
        let names: Vec<_> = Capabilities::tool_specs().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![CALL_INTENT_UNDERSTANDING, CALL_DB_AGENT, CALL_DS_AGENT, LOAD_ARTIFACTS]
        );
    }
}
