//! OpenRouter API client for completions and embeddings.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::provider::{EmbeddingProvider, LlmProvider, ProviderError};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
const PROVIDER: &str = "openrouter";

/// OpenRouter client for chat completions and embeddings.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: Option<String>,
}

impl OpenRouterClient {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: OPENROUTER_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embedding_model: None,
        }
    }

    /// Create a client with a specific chat model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Enable embeddings with the given model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Point the client at an OpenAI-compatible gateway instead of OpenRouter.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// Send a chat completion request with text only.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(1024),
        };

        debug!("Sending request to OpenRouter: model={}", request.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, error_text));
        }

        let response: ChatCompletionResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;

        if let Some(usage) = &response.usage {
            info!(
                "OpenRouter response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: "empty completion".to_string(),
            })
    }

    async fn embeddings(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: model.to_string(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, error_text));
        }

        let response: EmbeddingResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                detail: "no embedding returned".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenRouterClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.chat(vec![
            Message::system("You are a reviewer of software engineering documents. Answer concisely."),
            Message::user(prompt),
        ])
        .await
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenRouterClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let model = self.embedding_model.as_deref().ok_or_else(|| ProviderError::Invalid {
            provider: PROVIDER.to_string(),
            detail: "no embedding model configured".to_string(),
        })?;
        self.embeddings(model, text).await
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
