//! services/api/src/adapters/completion.rs
//!
//! Adapter for the external completion service. Implements the
//! `CompletionService` port against the OpenAI-compatible OpenRouter
//! `chat/completions` contract. Single call per invocation, no retry;
//! non-success responses surface with their status code and body.

use async_trait::async_trait;
use chatlink_core::domain::ModelInfo;
use chatlink_core::ports::{CompletionRequest, CompletionService, PortError, PortResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://openrouter.ai/api/v1";

/// Completion calls are latency-variable; give them tens of seconds.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct OpenRouterAdapter {
    api_key: Option<String>,
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelCatalog {
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    name: Option<String>,
}

impl OpenRouterAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, API_BASE.to_string())
    }

    /// Test seam: point the adapter at a different host.
    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(COMPLETION_TIMEOUT)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }

    fn api_key(&self) -> PortResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PortError::Configuration("OPENROUTER_API_KEY is not set".to_string()))
    }
}

#[async_trait]
impl CompletionService for OpenRouterAdapter {
    async fn complete(&self, request: CompletionRequest) -> PortResult<String> {
        let api_key = self.api_key()?;

        let body = ChatRequest {
            model: request.model,
            messages: request
                .turns
                .into_iter()
                .map(|t| WireMessage {
                    role: t.role.as_str(),
                    content: t.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PortError::Unexpected("completion response had no choices".to_string()))
    }

    async fn list_models(&self) -> PortResult<Vec<ModelInfo>> {
        let api_key = self.api_key()?;

        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let catalog: ModelCatalog = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(catalog
            .data
            .into_iter()
            .map(|entry| ModelInfo {
                name: entry.name.unwrap_or_else(|| entry.id.clone()),
                id: entry.id,
            })
            .collect())
    }
}
