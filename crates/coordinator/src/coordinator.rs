//! The turn loop.

use crate::capabilities::Capabilities;
use crate::config::{CoordinatorConfig, EnvSettings, PlannerKind};
use crate::planner::{LlmPlanner, Planner, PlannerContext, PlannerStep};
use crate::prompt::INSTRUCTION_PROMPT;
use crate::protocol::ProtocolPlanner;
use crate::session::Session;
use quarry_agents::{build_sub_agent, ModelDefaults, INTENT_SYSTEM_PROMPT};
use quarry_common::{AgentMessage, QuarryError, Result};
use quarry_llm::{build_llm_client, ChatMessage, LlmClient, ToolSpec};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the coordinator signs its replies with.
pub const COORDINATOR_AGENT: &str = "coordinator";

/// One tool call made during a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnStep {
    pub tool: String,
    #[serde(rename = "args")]
    pub arguments: Value,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: AgentMessage,
    pub steps: Vec<TurnStep>,
    /// Active database once the turn finished
    pub use_database: Option<String>,
    /// Turn state as it stood at the end of the turn
    pub state: Value,
}

/// Hands each user turn to the planner and executes the calls it asks for.
pub struct Coordinator {
    capabilities: Capabilities,
    planner: Arc<dyn Planner>,
    tools: Vec<ToolSpec>,
    instruction: String,
    max_steps: usize,
    default_database: String,
}

impl Coordinator {
    pub fn new(capabilities: Capabilities, planner: Arc<dyn Planner>) -> Self {
        Self {
            capabilities,
            planner,
            tools: Capabilities::tool_specs(),
            instruction: INSTRUCTION_PROMPT.to_string(),
            max_steps: 8,
            default_database: crate::state::DEFAULT_DATABASE.to_string(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_default_database(mut self, database: impl Into<String>) -> Self {
        self.default_database = database.into();
        self
    }

    /// Build the sub-agents and planner described by `config`.
    ///
    /// With `PlannerKind::Auto` the model planner is used when a provider is
    /// configured; otherwise the protocol planner takes over.
    pub fn from_config(config: &CoordinatorConfig, env: &EnvSettings) -> Result<Self> {
        config.validate()?;
        let mut config = config.clone();
        config.apply_env(env);

        let llm: Option<Arc<dyn LlmClient>> = match &config.provider {
            Some(provider) => {
                info!(provider = %provider.provider, model = %provider.model, "Model provider configured");
                Some(build_llm_client(provider)?)
            }
            None => None,
        };

        Self::from_config_with_llm(&config, env, llm)
    }

    /// Same as [`Coordinator::from_config`] with an already-built model
    /// client. The `[provider]` section still supplies the sampling
    /// defaults: its `temperature` for model-backed sub-agents that set none
    /// and its `max_tokens` for every model call.
    pub fn from_config_with_llm(
        config: &CoordinatorConfig,
        env: &EnvSettings,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self> {
        config.validate()?;
        let mut config = config.clone();
        config.apply_env(env);

        let sampling = ModelDefaults {
            temperature: config.provider.as_ref().and_then(|p| p.temperature),
            max_tokens: config.provider.as_ref().and_then(|p| p.max_tokens),
        };

        let metadata = env.sub_agent_metadata();
        let intent = build_sub_agent(
            "intent",
            &config.agents.intent,
            llm.clone(),
            Some(INTENT_SYSTEM_PROMPT),
            sampling,
            metadata.clone(),
        )?;
        let database = build_sub_agent(
            "database",
            &config.agents.database,
            llm.clone(),
            None,
            sampling,
            metadata.clone(),
        )?;
        let analytics = build_sub_agent(
            "analytics",
            &config.agents.analytics,
            llm.clone(),
            None,
            sampling,
            metadata,
        )?;

        let model_planner = |llm: Arc<dyn LlmClient>| -> Arc<dyn Planner> {
            Arc::new(
                LlmPlanner::new(llm)
                    .with_temperature(config.planner.temperature)
                    .with_max_tokens(sampling.max_tokens),
            )
        };
        let planner: Arc<dyn Planner> = match (config.planner.kind, llm) {
            (PlannerKind::Protocol, _) => Arc::new(ProtocolPlanner::new()),
            (PlannerKind::Llm | PlannerKind::Auto, Some(llm)) => model_planner(llm),
            (PlannerKind::Llm, None) => {
                return Err(QuarryError::Config(
                    "Model planner requested but no provider is configured".into(),
                ))
            }
            (PlannerKind::Auto, None) => {
                info!("No model provider configured, using protocol planner");
                Arc::new(ProtocolPlanner::new())
            }
        };

        info!(
            planner = %planner.kind(),
            max_steps = config.planner.max_steps,
            code_interpreter = %env.code_interpreter_extension,
            "Coordinator initialized"
        );

        Ok(Self::new(Capabilities::new(intent, database, analytics), planner)
            .with_max_steps(config.planner.max_steps)
            .with_default_database(config.default_database))
    }

    pub fn planner_kind(&self) -> &str {
        self.planner.kind()
    }

    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run one user turn to completion.
    ///
    /// Capability failures are fed back to the planner as text; only planner
    /// errors and running out of steps fail the turn.
    pub async fn handle_turn(
        &self,
        session: &mut Session,
        message: AgentMessage,
    ) -> Result<TurnOutcome> {
        info!(
            session_id = %session.id(),
            message_id = %message.id,
            content_preview = %message.content.chars().take(50).collect::<String>(),
            "Handling turn"
        );

        let mut state = session.begin_turn();
        let mut transcript = vec![ChatMessage::user(message.content.clone())];
        let mut steps = Vec::new();

        for round in 0..self.max_steps {
            let step = self
                .planner
                .next_step(PlannerContext {
                    instruction: &self.instruction,
                    transcript: &transcript,
                    tools: &self.tools,
                    state: &state,
                })
                .await?;

            let calls = match step {
                PlannerStep::Respond(answer) => {
                    let reply = AgentMessage::from_agent(COORDINATOR_AGENT, answer)
                        .in_session(session.id());
                    let outcome = TurnOutcome {
                        reply: reply.clone(),
                        steps,
                        use_database: state.use_database().map(str::to_string),
                        state: state.snapshot(),
                    };
                    info!(
                        session_id = %session.id(),
                        rounds = round + 1,
                        tool_calls = outcome.steps.len(),
                        "Turn complete"
                    );
                    let question = message.in_session(session.id());
                    session.finish_turn(&state, question, reply).await;
                    return Ok(outcome);
                }
                PlannerStep::Call(calls) if calls.is_empty() => {
                    return Err(QuarryError::Planner("planner issued an empty call list".into()));
                }
                PlannerStep::Call(calls) => calls,
            };

            transcript.push(ChatMessage::assistant("", calls.clone()));
            for call in calls {
                debug!(round, tool = %call.name, arguments = %call.arguments, "Dispatching tool call");
                let outcome = self
                    .capabilities
                    .dispatch(&call, &mut state, session.artifacts())
                    .await;
                let result = outcome.to_planner_text();
                if let Some(failure) = outcome.failure() {
                    warn!(tool = %call.name, %failure, "Capability reported a failure");
                }
                transcript.push(ChatMessage::tool_result(&call, result.clone()));
                steps.push(TurnStep {
                    tool: call.name,
                    arguments: call.arguments,
                    result,
                });
            }
        }

        // Nothing from this turn reaches the session, pending artifacts included
        warn!(session_id = %session.id(), max_steps = self.max_steps, "Turn exceeded step limit");
        Err(QuarryError::Planner(format!(
            "no answer after {} planner steps",
            self.max_steps
        )))
    }
}
