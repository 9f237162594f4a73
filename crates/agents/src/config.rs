//! Sub-agent configuration and construction.

use crate::http_agent::HttpSubAgent;
use crate::llm_agent::LlmSubAgent;
use quarry_common::{QuarryError, Result, SubAgent};
use quarry_llm::LlmClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How one sub-agent is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubAgentConfig {
    /// Prompted call to the shared model client
    Llm {
        /// Instruction override; agents without a built-in prompt require it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    },

    /// Independently hosted agent
    Http {
        endpoint: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    120_000
}

/// Sampling settings from the `[provider]` section, applied to model-backed
/// sub-agents that do not set their own.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelDefaults {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Build a sub-agent from its configuration.
///
/// `default_instruction` and `defaults` fill in what `Llm` agents leave
/// unset; `metadata` is attached to every request of `Http` agents.
pub fn build_sub_agent(
    name: &str,
    config: &SubAgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    default_instruction: Option<&str>,
    defaults: ModelDefaults,
    metadata: serde_json::Value,
) -> Result<Arc<dyn SubAgent>> {
    match config {
        SubAgentConfig::Llm {
            instruction,
            temperature,
        } => {
            let llm = llm.ok_or_else(|| {
                QuarryError::Config(format!(
                    "Sub-agent '{name}' is model-backed but no model provider is configured"
                ))
            })?;
            let instruction = instruction
                .as_deref()
                .or(default_instruction)
                .ok_or_else(|| {
                    QuarryError::Config(format!(
                        "Sub-agent '{name}' needs an instruction"
                    ))
                })?;
            let mut agent =
                LlmSubAgent::new(name, instruction, llm).with_max_tokens(defaults.max_tokens);
            if let Some(t) = temperature.or(defaults.temperature) {
                agent = agent.with_temperature(t);
            }
            Ok(Arc::new(agent))
        }
        SubAgentConfig::Http {
            endpoint,
            timeout_ms,
        } => {
            if endpoint.trim().is_empty() {
                return Err(QuarryError::Config(format!(
                    "Sub-agent '{name}' has an empty endpoint"
                )));
            }
            let agent = HttpSubAgent::new(name, endpoint.clone(), Duration::from_millis(*timeout_ms))?
                .with_metadata(metadata);
            Ok(Arc::new(agent))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INTENT_SYSTEM_PROMPT;
    use async_trait::async_trait;
    use quarry_llm::{LlmRequest, LlmResponse};

    struct NullClient;

    /// Answers with an empty JSON object and keeps every request.
    #[derive(Default)]
    struct RecordingClient {
        seen: std::sync::Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(LlmResponse {
                content: "{}".to_string(),
                model: "recording".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
                tool_calls: Vec::new(),
            })
        }
        fn model_name(&self) -> &str {
            "recording"
        }
    }

    #[async_trait]
    impl LlmClient for NullClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Err(QuarryError::Llm("unused".to_string()))
        }
        fn model_name(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn deserialize_tagged_configs() {
        #[derive(Deserialize)]
        struct Agents {
            intent: SubAgentConfig,
            database: SubAgentConfig,
        }

        let agents: Agents = toml::from_str(
            r#"
[intent]
kind = "llm"
temperature = 0.0

[database]
kind = "http"
endpoint = "http://localhost:8081/run"
"#,
        )
        .unwrap();

        assert!(matches!(
            agents.intent,
            SubAgentConfig::Llm { instruction: None, temperature: Some(_) }
        ));
        match agents.database {
            SubAgentConfig::Http { endpoint, timeout_ms } => {
                assert_eq!(endpoint, "http://localhost:8081/run");
                assert_eq!(timeout_ms, 120_000);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn llm_agent_uses_default_instruction() {
        let config = SubAgentConfig::Llm {
            instruction: None,
            temperature: None,
        };
        let agent = build_sub_agent(
            "intent",
            &config,
            Some(Arc::new(NullClient)),
            Some(INTENT_SYSTEM_PROMPT),
            ModelDefaults::default(),
            serde_json::Value::Null,
        )
        .unwrap();
        assert_eq!(agent.name(), "intent");
    }

    #[test]
    fn llm_agent_without_instruction_fails() {
        let config = SubAgentConfig::Llm {
            instruction: None,
            temperature: None,
        };
        let result = build_sub_agent(
            "database",
            &config,
            Some(Arc::new(NullClient)),
            None,
            ModelDefaults::default(),
            serde_json::Value::Null,
        );
        assert!(result.is_err());
    }

    #[test]
    fn llm_agent_without_provider_fails() {
        let config = SubAgentConfig::Llm {
            instruction: Some("Answer.".to_string()),
            temperature: None,
        };
        let result = build_sub_agent(
            "intent",
            &config,
            None,
            None,
            ModelDefaults::default(),
            serde_json::Value::Null,
        );
        assert!(matches!(result, Err(QuarryError::Config(_))));
    }

    #[test]
    fn http_agent_rejects_empty_endpoint() {
        let config = SubAgentConfig::Http {
            endpoint: "  ".to_string(),
            timeout_ms: 1000,
        };
        assert!(build_sub_agent(
            "database",
            &config,
            None,
            None,
            ModelDefaults::default(),
            serde_json::Value::Null
        )
        .is_err());
    }

    #[tokio::test]
    async fn provider_sampling_reaches_llm_agent_requests() {
        let defaults = ModelDefaults {
            temperature: Some(0.01),
            max_tokens: Some(512),
        };
        let unset = SubAgentConfig::Llm {
            instruction: None,
            temperature: None,
        };
        let client = Arc::new(RecordingClient::default());
        let agent = build_sub_agent(
            "intent",
            &unset,
            Some(client.clone()),
            Some(INTENT_SYSTEM_PROMPT),
            defaults,
            serde_json::Value::Null,
        )
        .unwrap();
        agent.run("hi").await.unwrap();

        let overridden = SubAgentConfig::Llm {
            instruction: None,
            temperature: Some(0.7),
        };
        let agent = build_sub_agent(
            "intent",
            &overridden,
            Some(client.clone()),
            Some(INTENT_SYSTEM_PROMPT),
            defaults,
            serde_json::Value::Null,
        )
        .unwrap();
        agent.run("hi").await.unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, Some(0.01));
        assert_eq!(seen[0].max_tokens, Some(512));
        assert_eq!(seen[1].temperature, Some(0.7));
        assert_eq!(seen[1].max_tokens, Some(512));
    }
}
