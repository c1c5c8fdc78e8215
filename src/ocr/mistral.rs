//! Mistral OCR provider (uses Mistral's OCR API).

use super::{OcrInput, OcrProvider, OcrResult};
use crate::provider::ProviderError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const PROVIDER: &str = "mistral_ocr";
const OCR_URL: &str = "https://api.mistral.ai/v1/ocr";

pub struct MistralOcrProvider {
    api_key: String,
    client: reqwest::Client,
}

impl MistralOcrProvider {
    pub fn from_env(client: reqwest::Client) -> anyhow::Result<Self> {
        let api_key = std::env::var("MISTRAL_API_KEY")
            .map_err(|_| anyhow::anyhow!("MISTRAL_API_KEY not set"))?;
        Ok(Self { api_key, client })
    }
}

// ── Mistral API request/response types ──────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest {
    model: String,
    document: DocumentSource,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum DocumentSource {
    #[serde(rename = "image_url")]
    Image { image_url: String },
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<MistralPage>,
}

#[derive(Deserialize)]
struct MistralPage {
    markdown: String,
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrProvider for MistralOcrProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn recognize(&self, input: &OcrInput) -> Result<OcrResult, ProviderError> {
        let data_url = format!("data:{};base64,{}", input.mime(), BASE64.encode(&input.data));

        let body = OcrRequest {
            model: "mistral-ocr-latest".to_string(),
            document: DocumentSource::Image {
                image_url: data_url,
            },
        };

        info!("MistralOcrProvider: calling OCR API for {}", input.filename);

        let resp = self
            .client
            .post(OCR_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status, text));
        }

        let raw_text = resp
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;
        debug!(
            "MistralOcrProvider: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );
        let ocr: OcrResponse = serde_json::from_str(&raw_text).map_err(|e| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            detail: e.to_string(),
        })?;

        let text = ocr
            .pages
            .iter()
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(OcrResult {
            text,
            confidence: 0.92,
        })
    }
}
