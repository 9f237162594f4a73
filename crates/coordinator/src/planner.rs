//! The planning port.
//!
//! A [`Planner`] looks at the turn so far and decides whether to call more
//! tools or answer. [`LlmPlanner`] delegates the decision to a model with
//! tool declarations; [`ProtocolPlanner`](crate::protocol::ProtocolPlanner)
//! follows the instruction protocol locally.

use crate::state::TurnState;
use async_trait::async_trait;
use quarry_common::{QuarryError, Result};
use quarry_llm::{ChatMessage, LlmClient, LlmRequest, ToolCall, ToolSpec};
use std::sync::Arc;
use tracing::debug;

/// Temperature used for planning calls.
pub const DEFAULT_PLANNER_TEMPERATURE: f32 = 0.01;

/// Everything a planner may consult for one decision.
pub struct PlannerContext<'a> {
    pub instruction: &'a str,
    /// The user question followed by earlier calls and their results
    pub transcript: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
    pub state: &'a TurnState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerStep {
    /// Invoke these tools, in order
    Call(Vec<ToolCall>),
    /// Final answer for the user
    Respond(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Short name reported by health checks.
    fn kind(&self) -> &str;

    async fn next_step(&self, context: PlannerContext<'_>) -> Result<PlannerStep>;
}

/// Lets a model choose the calls.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: DEFAULT_PLANNER_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, context: &PlannerContext<'_>) -> LlmRequest {
        LlmRequest {
            system_prompt: Some(context.instruction.to_string()),
            messages: context.transcript.to_vec(),
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
            tools: context.tools.to_vec(),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn kind(&self) -> &str {
        "llm"
    }

    async fn next_step(&self, context: PlannerContext<'_>) -> Result<PlannerStep> {
        let response = self.llm.complete(self.build_request(&context)).await?;

        debug!(
            model = %response.model,
            tool_calls = response.tool_calls.len(),
            finish_reason = ?response.finish_reason,
            "Planner model replied"
        );

        if response.has_tool_calls() {
            return Ok(PlannerStep::Call(response.tool_calls));
        }
        if response.content.trim().is_empty() {
            return Err(QuarryError::Planner(format!(
                "{} returned neither an answer nor tool calls",
                self.llm.model_name()
            )));
        }
        Ok(PlannerStep::Respond(response.content))
    }
}
