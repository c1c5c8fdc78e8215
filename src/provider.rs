//! Traits for the network collaborators (LLM, embeddings) and their error type.
//!
//! OCR lives in [`crate::ocr`] and PDF extraction in [`crate::extract`]; the
//! reference verifier in [`crate::references`].

use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider}: rate limited")]
    RateLimited { provider: String },
    #[error("{provider}: timed out")]
    Timeout { provider: String },
    #[error("{provider}: malformed response: {detail}")]
    Malformed { provider: String, detail: String },
    #[error("{provider}: request rejected: {detail}")]
    Invalid { provider: String, detail: String },
    #[error("{provider}: transport failure: {detail}")]
    Transport { provider: String, detail: String },
}

impl ProviderError {
    /// Rate limits, timeouts and transport hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transport { .. }
        )
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimited { provider }
            | Self::Timeout { provider }
            | Self::Malformed { provider, .. }
            | Self::Invalid { provider, .. }
            | Self::Transport { provider, .. } => provider,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        let provider = provider.to_string();
        match status.as_u16() {
            429 => Self::RateLimited { provider },
            408 | 504 => Self::Timeout { provider },
            400..=499 => Self::Invalid {
                provider,
                detail: format!("{}: {}", status, body),
            },
            _ => Self::Transport {
                provider,
                detail: format!("{}: {}", status, body),
            },
        }
    }

    /// Classify a reqwest send/receive failure.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed {
                provider: provider.to_string(),
                detail: err.to_string(),
            }
        } else {
            Self::Transport {
                provider: provider.to_string(),
                detail: err.to_string(),
            }
        }
    }
}

/// Free-form text completion.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Fixed-length semantic embedding of a text.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let e = ProviderError::from_status("x", StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(e, ProviderError::RateLimited { .. }));
        assert!(e.is_retryable());

        let e = ProviderError::from_status("x", StatusCode::GATEWAY_TIMEOUT, String::new());
        assert!(matches!(e, ProviderError::Timeout { .. }));

        let e = ProviderError::from_status("x", StatusCode::UNAUTHORIZED, "no key".into());
        assert!(matches!(e, ProviderError::Invalid { .. }));
        assert!(!e.is_retryable());

        let e = ProviderError::from_status("x", StatusCode::BAD_GATEWAY, String::new());
        assert!(matches!(e, ProviderError::Transport { .. }));
        assert_eq!(e.provider(), "x");
    }
}
