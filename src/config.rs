//! Service configuration.
//!
//! Every setting comes from the environment (after `.env` is loaded by the
//! binary) and has a default, so an empty environment yields a working
//! TF-IDF-only service.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::normalize::{similarity_by_name, NormalizedLevenshtein, TitleSimilarity};
use crate::ocr::OcrProviderKind;
use crate::policy::{CallPolicy, RateLimiter, RetryPolicy};
use crate::segmenter::{SegmenterOptions, SubsectionScope};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub template_dir: PathBuf,
    /// Parent of the per-request figure directories.
    pub scratch_dir: PathBuf,
    pub fuzzy_threshold: f64,
    /// Name of the heading similarity function (`levenshtein` or `dice`).
    pub fuzzy_metric: String,
    pub subsection_scope: SubsectionScope,
    pub request_deadline: Duration,
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit_per_minute: u32,
    /// 0 means the rayon default (one thread per core).
    pub similarity_workers: usize,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    /// Alternate OpenAI-compatible endpoint (e.g. a local proxy).
    pub openrouter_base_url: Option<String>,
    pub embedding_model: Option<String>,
    pub ocr_provider: Option<OcrProviderKind>,
    /// Verify references against Crossref.
    pub verify_references: bool,
}

impl ServiceConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let fuzzy_threshold: f64 = parse_or(&get, "FUZZY_THRESHOLD", 0.8)?;
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            anyhow::bail!("FUZZY_THRESHOLD must be within [0, 1], got {}", fuzzy_threshold);
        }

        let fuzzy_metric = get("FUZZY_METRIC").unwrap_or_else(|| "levenshtein".to_string());
        if similarity_by_name(&fuzzy_metric).is_none() {
            anyhow::bail!("Unknown FUZZY_METRIC: {}", fuzzy_metric);
        }

        let subsection_scope = match get("SUBSECTION_SCOPE") {
            Some(raw) => raw
                .parse::<SubsectionScope>()
                .map_err(anyhow::Error::msg)
                .context("Invalid SUBSECTION_SCOPE")?,
            None => SubsectionScope::Global,
        };

        let ocr_provider = match get("OCR_PROVIDER") {
            Some(raw) => Some(
                raw.parse::<OcrProviderKind>()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid OCR_PROVIDER")?,
            ),
            None => None,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 4)?,
            base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(parse_or(&get, "RETRY_MAX_DELAY_MS", 8000)?),
        };

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            template_dir: get("TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("templates")),
            scratch_dir: get("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            fuzzy_threshold,
            fuzzy_metric,
            subsection_scope,
            request_deadline: Duration::from_secs(parse_or(&get, "REQUEST_DEADLINE_SECS", 120)?),
            provider_timeout: Duration::from_secs(parse_or(&get, "PROVIDER_TIMEOUT_SECS", 30)?),
            retry,
            rate_limit_per_minute: parse_or(&get, "RATE_LIMIT_PER_MINUTE", 60)?,
            similarity_workers: parse_or(&get, "SIMILARITY_WORKERS", 0)?,
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: get("OPENROUTER_MODEL")
                .unwrap_or_else(|| "google/gemini-2.0-flash-001".to_string()),
            openrouter_base_url: get("OPENROUTER_BASE_URL"),
            embedding_model: get("EMBEDDING_MODEL"),
            ocr_provider,
            verify_references: parse_or(&get, "VERIFY_REFERENCES", false)?,
        })
    }

    pub fn similarity(&self) -> Arc<dyn TitleSimilarity> {
        similarity_by_name(&self.fuzzy_metric).unwrap_or_else(|| Arc::new(NormalizedLevenshtein))
    }

    pub fn segmenter_options(&self) -> SegmenterOptions {
        SegmenterOptions {
            threshold: self.fuzzy_threshold,
            subsection_scope: self.subsection_scope,
            similarity: self.similarity(),
        }
    }

    /// Shared timeout/retry/rate-limit policy for every collaborator call.
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(
            self.provider_timeout,
            self.retry.clone(),
            Arc::new(RateLimiter::per_minute(self.rate_limit_per_minute)),
        )
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(config.template_dir, PathBuf::from("templates"));
        assert_eq!(config.scratch_dir, std::env::temp_dir());
        assert_eq!(config.fuzzy_threshold, 0.8);
        assert_eq!(config.subsection_scope, SubsectionScope::Global);
        assert_eq!(config.request_deadline, Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert!(config.openrouter_api_key.is_none());
        assert!(config.ocr_provider.is_none());
        assert!(!config.verify_references);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SUBSECTION_SCOPE", "section"),
            ("FUZZY_THRESHOLD", "0.9"),
            ("OCR_PROVIDER", "docling"),
            ("RETRY_MAX_ATTEMPTS", "2"),
            ("OPENROUTER_API_KEY", "sk-test"),
            ("EMBEDDING_MODEL", ""),
            ("OPENROUTER_BASE_URL", "http://localhost:4000/v1"),
            ("SCRATCH_DIR", "/var/tmp/srs"),
        ])
        .unwrap();
        assert_eq!(config.subsection_scope, SubsectionScope::CurrentSection);
        assert_eq!(config.fuzzy_threshold, 0.9);
        assert_eq!(config.ocr_provider, Some(OcrProviderKind::Docling));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.openrouter_api_key.as_deref(), Some("sk-test"));
        // blank counts as unset
        assert!(config.embedding_model.is_none());
        assert_eq!(config.openrouter_base_url.as_deref(), Some("http://localhost:4000/v1"));
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/srs"));
        assert_eq!(config.segmenter_options().threshold, 0.9);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("FUZZY_THRESHOLD", "1.5")]).is_err());
        assert!(config_from(&[("FUZZY_THRESHOLD", "high")]).is_err());
        assert!(config_from(&[("SUBSECTION_SCOPE", "nested")]).is_err());
        assert!(config_from(&[("OCR_PROVIDER", "tesseract")]).is_err());
        assert!(config_from(&[("FUZZY_METRIC", "soundex")]).is_err());
    }
}
