//! Sub-agent hosted behind an HTTP endpoint.
//!
//! Wire protocol: `POST {endpoint}` with `{"request": "...", "metadata": {...}}`.
//! The reply is either a JSON object `{"output", "state_delta", "artifacts"}`
//! or, for simple agents, a plain-text body taken as the output verbatim.

use async_trait::async_trait;
use quarry_common::{QuarryError, Result, SubAgent, SubAgentOutput};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct RunRequest<'a> {
    request: &'a str,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    metadata: &'a serde_json::Value,
}

pub struct HttpSubAgent {
    name: String,
    endpoint: String,
    metadata: serde_json::Value,
    http_client: reqwest::Client,
}

impl HttpSubAgent {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuarryError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            metadata: serde_json::Value::Null,
            http_client,
        })
    }

    /// Extra fields sent with every request, such as the code-execution
    /// extension the analysis agent should use.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn decode_body(body: &str) -> SubAgentOutput {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value)
                .unwrap_or_else(|_| SubAgentOutput::text(body)),
            _ => SubAgentOutput::text(body),
        }
    }
}

#[async_trait]
impl SubAgent for HttpSubAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: &str) -> Result<SubAgentOutput> {
        info!(
            agent = %self.name,
            endpoint = %self.endpoint,
            request_preview = %request.chars().take(50).collect::<String>(),
            "Calling remote sub-agent"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&RunRequest {
                request,
                metadata: &self.metadata,
            })
            .send()
            .await
            .map_err(|e| QuarryError::Agent(format!("{} request failed: {e}", self.name)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuarryError::Agent(format!("{} response unreadable: {e}", self.name)))?;

        if !status.is_success() {
            return Err(QuarryError::Agent(format!(
                "{} returned {status}: {body}",
                self.name
            )));
        }

        let output = Self::decode_body(&body);
        debug!(
            agent = %self.name,
            state_keys = ?output.state_delta.keys().collect::<Vec<_>>(),
            artifacts = output.artifacts.len(),
            "Remote sub-agent replied"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_body_is_decoded() {
        let out = HttpSubAgent::decode_body(
            r#"{"output":"done","state_delta":{"query_result":[1,2]},"artifacts":["plot.png"]}"#,
        );
        assert_eq!(out.text, "done");
        assert_eq!(out.state_delta["query_result"], serde_json::json!([1, 2]));
        assert_eq!(out.artifacts, vec!["plot.png".to_string()]);
    }

    #[test]
    fn plain_body_is_taken_verbatim() {
        let out = HttpSubAgent::decode_body("SELECT 1 returned 1 row");
        assert_eq!(out.text, "SELECT 1 returned 1 row");
        assert!(out.state_delta.is_empty());

        // JSON that is not an output object is still just text
        let out = HttpSubAgent::decode_body("[1, 2, 3]");
        assert_eq!(out.text, "[1, 2, 3]");
    }

    #[test]
    fn null_metadata_is_not_sent() {
        let json = serde_json::to_value(RunRequest {
            request: "q",
            metadata: &serde_json::Value::Null,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"request": "q"}));
    }
}
