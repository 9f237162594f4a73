use std::time::Duration;

use async_trait::async_trait;
use quarry_common::QuarryError;
use quarry_common::Result;
use serde::{Deserialize, Serialize};

use crate::client::{
    provider_http_client, transport_error, ChatMessage, LlmClient, LlmRequest, LlmResponse, Role,
    TokenUsage, ToolCall, ToolSpec,
};

const STUDIO_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Where Gemini requests are sent and how they authenticate.
#[derive(Debug, Clone)]
pub enum GeminiEndpoint {
    /// Google AI Studio, authenticated with an API key.
    Studio { api_key: String },
    /// Vertex AI in a cloud project, authenticated with an OAuth access token.
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Client for the Gemini `generateContent` API with function calling.
pub struct GeminiClient {
    model: String,
    endpoint: GeminiEndpoint,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(model: String, endpoint: GeminiEndpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            model,
            endpoint,
            http_client: provider_http_client(timeout)?,
        })
    }

    fn url(&self) -> String {
        match &self.endpoint {
            GeminiEndpoint::Studio { .. } => {
                format!("{STUDIO_API_URL}/models/{}:generateContent", self.model)
            }
            GeminiEndpoint::Vertex {
                project, location, ..
            } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{}:generateContent",
                self.model
            ),
        }
    }

    /// Tool results go back as a JSON object; plain text is wrapped.
    fn tool_response_value(content: &str) -> serde_json::Value {
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(other) => serde_json::json!({ "result": other }),
            Err(_) => serde_json::json!({ "result": content }),
        }
    }

    fn message_parts(msg: &ChatMessage) -> Vec<GeminiPart> {
        if msg.role == Role::Tool {
            return vec![GeminiPart {
                function_response: Some(FunctionResponse {
                    name: msg.name.clone().unwrap_or_default(),
                    response: Self::tool_response_value(&msg.content),
                }),
                ..Default::default()
            }];
        }

        let mut parts = Vec::new();
        if !msg.content.is_empty() {
            parts.push(GeminiPart {
                text: Some(msg.content.clone()),
                ..Default::default()
            });
        }
        for call in &msg.tool_calls {
            parts.push(GeminiPart {
                function_call: Some(FunctionCall {
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                ..Default::default()
            });
        }
        parts
    }

    /// Gemini wants alternating turns, so adjacent messages from the same
    /// side (e.g. several tool results) are folded into one content.
    fn build_contents(request: &LlmRequest) -> Vec<GeminiContent> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        for msg in request.messages.iter().filter(|m| m.role != Role::System) {
            let role = match msg.role {
                Role::Assistant => "model",
                _ => "user",
            };
            let parts = Self::message_parts(msg);
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }
        contents
    }

    fn build_tools(tools: &[ToolSpec]) -> Vec<GeminiTool> {
        if tools.is_empty() {
            return Vec::new();
        }
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
        }]
    }

    fn build_request_body(&self, request: &LlmRequest) -> GeminiRequest {
        GeminiRequest {
            contents: Self::build_contents(request),
            system_instruction: request.system_prompt.as_ref().map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(text.clone()),
                    ..Default::default()
                }],
            }),
            tools: Self::build_tools(&request.tools),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        }
    }

    fn into_llm_response(&self, response: GeminiResponse) -> Result<LlmResponse> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| QuarryError::Llm("No candidates in Gemini response".to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("{}-{}", call.name, tool_calls.len()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        Ok(LlmResponse {
            content,
            model: response.model_version.unwrap_or_else(|| self.model.clone()),
            usage: response.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            }),
            finish_reason: candidate.finish_reason,
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(&request);

        let mut http_req = self.http_client.post(self.url()).json(&body);
        http_req = match &self.endpoint {
            GeminiEndpoint::Studio { api_key } => http_req.header("x-goog-api-key", api_key),
            GeminiEndpoint::Vertex { access_token, .. } => http_req.bearer_auth(access_token),
        };

        let response = http_req
            .send()
            .await
            .map_err(|e| transport_error("Gemini request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(QuarryError::Llm(format!(
                "Gemini API error {status}: {body_text}"
            )));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| transport_error("Failed to parse Gemini response", e))?;

        self.into_llm_response(gemini_response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
