//! Pass-through to an OpenAI-compatible chat-completions endpoint.

use std::time::Duration;

use serde::Deserialize;

use crate::config::AiConfig;
use crate::error::{CatalogError, Result};

/// Body of `POST /api/ai`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AiRequest {
    pub(crate) prompt: String,
}

/// What the upstream API answered.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AiReply {
    /// Any JSON body, success or provider error, passed through as-is.
    Json(serde_json::Value),
    /// A body that was not JSON.
    Failed { status: u16, text: String },
}

#[derive(Debug, Clone)]
pub(crate) struct AiClient {
    config: AiConfig,
}

impl AiClient {
    pub(crate) fn new(config: AiConfig) -> Self {
        Self { config }
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    pub(crate) fn complete(&self, prompt: &str) -> Result<AiReply> {
        if prompt.trim().is_empty() {
            return Err(CatalogError::Validation("missing prompt".into()));
        }
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CatalogError::MissingCredential("OPENAI_API_KEY"))?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();

        let payload = build_chat_payload(&self.config, prompt);
        let response = agent
            .post(&self.endpoint())
            .set("content-type", "application/json")
            .set("authorization", &format!("Bearer {api_key}"))
            .send_json(payload);

        let (status, text) = match response {
            Ok(resp) => {
                let status = resp.status();
                (status, resp.into_string()?)
            }
            Err(ureq::Error::Status(code, resp)) => (code, resp.into_string().unwrap_or_default()),
            Err(ureq::Error::Transport(err)) => {
                tracing::warn!(error = %err, "completion request transport error");
                return Err(CatalogError::Upstream(err.to_string()));
            }
        };

        tracing::debug!(status, model = %self.config.model, "completion request finished");
        Ok(match serde_json::from_str(&text) {
            Ok(value) => AiReply::Json(value),
            Err(_) => AiReply::Failed { status, text },
        })
    }
}

pub(crate) fn build_chat_payload(config: &AiConfig, prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "model": config.model,
        "messages": [{"role": "user", "content": prompt}],
        "max_tokens": config.max_tokens,
    })
}

/// First choice's message text from a chat-completions response.
pub(crate) fn completion_text(reply: &serde_json::Value) -> Option<String> {
    reply
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
