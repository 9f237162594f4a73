//! Deterministic planner that follows the instruction protocol.
//!
//! Used when no model provider is configured. Each round it inspects the
//! transcript and turn state, issues the next call the protocol prescribes,
//! and finally renders the five-section markdown answer.

use crate::capabilities::{
    CapabilityFailure, CALL_DB_AGENT, CALL_DS_AGENT, CALL_INTENT_UNDERSTANDING,
};
use crate::intent::{Intent, SubQuestion};
use crate::planner::{Planner, PlannerContext, PlannerStep};
use crate::prompt::{
    OUT_OF_SCOPE_MESSAGE, SECTION_EXPLANATION, SECTION_GRAPH, SECTION_OVERVIEW, SECTION_RESULTS,
    SECTION_SQL, UNCLEAR_QUESTION_MESSAGE,
};
use crate::state::{TurnState, DEFAULT_DATABASE, INTENT_AGENT_OUTPUT, SQL_QUERY};
use async_trait::async_trait;
use quarry_common::{QuarryError, Result};
use quarry_llm::{ChatMessage, Role, ToolCall};
use serde_json::json;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolPlanner;

impl ProtocolPlanner {
    pub fn new() -> Self {
        Self
    }
}

/// Tool results seen so far in the turn.
struct Progress<'a> {
    question: &'a str,
    results: Vec<(&'a str, &'a str)>,
}

impl<'a> Progress<'a> {
    fn from_transcript(transcript: &'a [ChatMessage]) -> Result<Self> {
        let question = transcript
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| QuarryError::Planner("transcript has no user question".to_string()))?;

        let results = transcript
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.name.as_deref().map(|name| (name, m.content.as_str())))
            .collect();

        Ok(Self { question, results })
    }

    /// Latest result of `tool`, if it was called.
    fn result_of(&self, tool: &str) -> Option<&'a str> {
        self.results
            .iter()
            .rev()
            .find(|(name, _)| *name == tool)
            .map(|(_, content)| *content)
    }

    fn call(&self, tool: &str, question: &str) -> PlannerStep {
        PlannerStep::Call(vec![ToolCall {
            id: format!("protocol-{}", self.results.len() + 1),
            name: tool.to_string(),
            arguments: json!({ "question": question }),
        }])
    }
}

#[async_trait]
impl Planner for ProtocolPlanner {
    fn kind(&self) -> &str {
        "protocol"
    }

    async fn next_step(&self, context: PlannerContext<'_>) -> Result<PlannerStep> {
        let progress = Progress::from_transcript(context.transcript)?;

        if progress.result_of(CALL_INTENT_UNDERSTANDING).is_none() {
            return Ok(progress.call(CALL_INTENT_UNDERSTANDING, progress.question));
        }

        let intent = context
            .state
            .get(INTENT_AGENT_OUTPUT)
            .and_then(|value| Intent::from_value(value).ok());

        let step = match intent {
            None => PlannerStep::Respond(UNCLEAR_QUESTION_MESSAGE.to_string()),
            Some(Intent::Greeting { message }) => PlannerStep::Respond(message),
            Some(Intent::UseDatabase { database }) => {
                PlannerStep::Respond(format!("Using database {database}"))
            }
            Some(Intent::OutOfScope) => PlannerStep::Respond(OUT_OF_SCOPE_MESSAGE.to_string()),
            Some(Intent::Question { sql, python }) => {
                if let Some(q) = sql.as_requested() {
                    if progress.result_of(CALL_DB_AGENT).is_none() {
                        return Ok(progress.call(CALL_DB_AGENT, q));
                    }
                }
                if let Some(q) = python.as_requested() {
                    if progress.result_of(CALL_DS_AGENT).is_none() {
                        return Ok(progress.call(CALL_DS_AGENT, q));
                    }
                }
                PlannerStep::Respond(
                    AnswerSections::from_turn(&sql, &python, &progress, context.state).render(),
                )
            }
        };
        Ok(step)
    }
}

/// The markdown answer, one field per section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerSections {
    pub overview: String,
    pub sql: String,
    pub explanation: String,
    pub graph: String,
    pub results: String,
}

impl AnswerSections {
    fn from_turn(
        sql: &SubQuestion,
        python: &SubQuestion,
        progress: &Progress<'_>,
        state: &TurnState,
    ) -> Self {
        let retrieval = progress.result_of(CALL_DB_AGENT);
        let analysis = progress.result_of(CALL_DS_AGENT);
        let database = state.use_database().unwrap_or(DEFAULT_DATABASE);
        let failure = [retrieval, analysis]
            .into_iter()
            .flatten()
            .find_map(CapabilityFailure::from_sentinel);

        let overview = match (failure, retrieval, analysis) {
            (Some(failure), _, _) => {
                format!("The question could not be fully answered ({failure}).")
            }
            (None, Some(_), Some(_)) => format!(
                "Retrieved data from {database} and analyzed it to answer: {}",
                python.as_arg()
            ),
            (None, Some(_), None) => {
                format!("Retrieved data from {database} to answer: {}", sql.as_arg())
            }
            (None, None, Some(_)) => format!("Analyzed the data to answer: {}", python.as_arg()),
            (None, None, None) => "No data was requested for this question.".to_string(),
        };

        let mut steps = vec![format!(
            "Classified the question with `{CALL_INTENT_UNDERSTANDING}`."
        )];
        if retrieval.is_some() {
            steps.push(format!(
                "Asked the {database} retrieval agent: {}",
                sql.as_arg()
            ));
        }
        if analysis.is_some() {
            steps.push(format!("Asked the analysis agent: {}", python.as_arg()));
        }
        let explanation = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            overview,
            sql: state.text(SQL_QUERY).unwrap_or_default(),
            explanation,
            graph: state.artifact_names().join(", "),
            results: analysis.or(retrieval).unwrap_or_default().to_string(),
        }
    }

    pub fn render(&self) -> String {
        let sql = if self.sql.trim().is_empty() {
            String::new()
        } else {
            format!("```sql\n{}\n```", self.sql.trim())
        };
        format!(
            "**{SECTION_OVERVIEW}:** {}\n\n\
             **{SECTION_SQL}:**\n{sql}\n\n\
             **{SECTION_EXPLANATION}:**\n{}\n\n\
             **{SECTION_GRAPH}:** {}\n\n\
             **{SECTION_RESULTS}:**\n{}\n",
            self.overview, self.explanation, self.graph, self.results
        )
    }
}
