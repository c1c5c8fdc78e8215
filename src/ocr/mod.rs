//! Modular OCR provider abstraction.
//!
//! Defines the [`OcrProvider`] trait so figure text can come from different
//! backends (Docling sidecar, Mistral OCR) selected by configuration.

pub mod docling;
pub mod mistral;

use std::path::{Path, PathBuf};

use crate::provider::ProviderError;

/// Text recognized in one image.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,
}

/// An image to recognize.
#[derive(Debug, Clone)]
pub struct OcrInput {
    pub filename: String,
    pub data: Vec<u8>,
}

impl OcrInput {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self { filename, data })
    }

    /// MIME type sniffed from the bytes, PNG when unknown.
    pub fn mime(&self) -> &'static str {
        match image::guess_format(&self.data) {
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            Ok(image::ImageFormat::Gif) => "image/gif",
            Ok(image::ImageFormat::Tiff) => "image/tiff",
            Ok(image::ImageFormat::WebP) => "image/webp",
            Ok(image::ImageFormat::Bmp) => "image/bmp",
            _ => "image/png",
        }
    }
}

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, input: &OcrInput) -> Result<OcrResult, ProviderError>;
}

/// Known provider identifiers used for configuration lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrProviderKind {
    Docling,
    MistralOcr,
}

impl std::str::FromStr for OcrProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docling" => Ok(Self::Docling),
            "mistral_ocr" => Ok(Self::MistralOcr),
            other => Err(format!("unknown OCR provider '{}'", other)),
        }
    }
}

/// Where an OCR'd figure came from.
#[derive(Debug, Clone)]
pub struct FigureText {
    pub section: String,
    pub path: PathBuf,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("docling".parse::<OcrProviderKind>(), Ok(OcrProviderKind::Docling));
        assert_eq!("mistral_ocr".parse::<OcrProviderKind>(), Ok(OcrProviderKind::MistralOcr));
        assert!("tesseract".parse::<OcrProviderKind>().is_err());
    }

    #[test]
    fn test_mime_sniffing() {
        let jpeg = OcrInput {
            filename: "a.jpg".into(),
            data: vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0],
        };
        assert_eq!(jpeg.mime(), "image/jpeg");
        let unknown = OcrInput {
            filename: "a.bin".into(),
            data: vec![1, 2, 3],
        };
        assert_eq!(unknown.mime(), "image/png");
    }
}
