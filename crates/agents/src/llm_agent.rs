//! Sub-agent backed by a single prompted model call.

use async_trait::async_trait;
use quarry_common::{QuarryError, Result, SubAgent, SubAgentOutput};
use quarry_llm::{ChatMessage, LlmClient, LlmRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// Forwards each request to a model under a fixed instruction.
pub struct LlmSubAgent {
    name: String,
    instruction: String,
    llm: Arc<dyn LlmClient>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmSubAgent {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            llm,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl SubAgent for LlmSubAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: &str) -> Result<SubAgentOutput> {
        info!(
            agent = %self.name,
            model = %self.llm.model_name(),
            request_preview = %request.chars().take(50).collect::<String>(),
            "Running model-backed sub-agent"
        );

        let response = self
            .llm
            .complete(LlmRequest {
                system_prompt: Some(self.instruction.clone()),
                messages: vec![ChatMessage::user(request)],
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                ..Default::default()
            })
            .await
            .map_err(|e| QuarryError::Agent(format!("{} failed: {e}", self.name)))?;

        debug!(agent = %self.name, response = %response.content, "Sub-agent response");

        Ok(SubAgentOutput::text(response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_llm::LlmResponse;
    use std::sync::Mutex;

    struct RecordingClient {
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request);
            match &self.reply {
                Ok(text) => Ok(LlmResponse {
                    content: text.clone(),
                    model: "recording".to_string(),
                    usage: None,
                    finish_reason: Some("stop".to_string()),
                    tool_calls: Vec::new(),
                }),
                Err(e) => Err(QuarryError::Llm(e.clone())),
            }
        }
        fn model_name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn sends_instruction_and_request() {
        let client = Arc::new(RecordingClient {
            reply: Ok(r#"{"greeting_message":"hello"}"#.to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let agent = LlmSubAgent::new("intent", "Classify.", client.clone()).with_temperature(0.0);

        let output = agent.run("hi").await.unwrap();

        assert_eq!(output.text, r#"{"greeting_message":"hello"}"#);
        assert!(output.state_delta.is_empty());
        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].system_prompt.as_deref(), Some("Classify."));
        assert_eq!(seen[0].messages[0].content, "hi");
        assert_eq!(seen[0].temperature, Some(0.0));
    }

    #[tokio::test]
    async fn model_failure_is_an_agent_error() {
        let client = Arc::new(RecordingClient {
            reply: Err("Gemini API error 400".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let agent = LlmSubAgent::new("intent", "Classify.", client);

        let err = agent.run("hi").await.unwrap_err();
        assert!(matches!(err, QuarryError::Agent(_)));
        assert!(err.to_string().contains("intent failed"));
    }
}
