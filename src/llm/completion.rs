//! HTTP client for a streaming chat-completion endpoint (Ollama-style `/api/chat`).

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::stream::assemble;
use crate::llm::{GenerationResult, ReplyGenerator};

/// Role-tagged chat message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Request body: the model plus a system instruction and the email as user content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(model: &str, system_prompt: &str, body: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: body.to_string(),
                },
            ],
            stream: true,
        }
    }
}

/// Streaming completion client. No retries.
pub struct CompletionClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl CompletionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ReplyGenerator for CompletionClient {
    async fn generate(&self, body: &str) -> Result<GenerationResult, LlmError> {
        let request = GenerationRequest::new(&self.config.model, &self.config.system_prompt, body);
        let url = &self.config.api_url;

        info!(url = %url, model = %self.config.model, "Sending completion request");
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::BadStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        debug!("Reading completion stream");
        let result = assemble(Box::pin(response.bytes_stream())).await?;
        if let GenerationResult::Text(text) = &result {
            debug!(chars = text.chars().count(), "Completion assembled");
        }
        Ok(result)
    }
}
