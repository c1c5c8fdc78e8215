//! Docling sidecar OCR provider.

use super::{OcrInput, OcrProvider, OcrResult};
use crate::provider::ProviderError;
use serde::Deserialize;
use tracing::info;

const PROVIDER: &str = "docling";

/// Docling sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DoclingResponse {
    markdown: String,
    #[serde(default)]
    pages: Vec<DoclingPageContent>,
}

#[derive(Debug, Deserialize)]
struct DoclingPageContent {
    text: String,
}

pub struct DoclingProvider {
    url: String,
    client: reqwest::Client,
}

impl DoclingProvider {
    pub fn new(client: reqwest::Client) -> Self {
        let url =
            std::env::var("DOCLING_URL").unwrap_or_else(|_| "http://localhost:3001".to_string());
        Self::with_url(client, url)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for DoclingProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn recognize(&self, input: &OcrInput) -> Result<OcrResult, ProviderError> {
        use reqwest::multipart::{Form, Part};

        info!("DoclingProvider: converting {} ({} bytes)", input.filename, input.data.len());

        let part = Part::bytes(input.data.clone())
            .file_name(input.filename.clone())
            .mime_str(input.mime())
            .map_err(|e| ProviderError::Invalid {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;

        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/convert", self.url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, error_text));
        }

        let docling: DoclingResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            detail: e.to_string(),
        })?;

        // Prefer page text; markdown carries table/heading markup.
        let text = if docling.pages.is_empty() {
            docling.markdown
        } else {
            docling
                .pages
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(OcrResult {
            text,
            confidence: 0.95,
        })
    }
}
