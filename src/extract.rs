//! Text and embedded-image extraction from uploaded documents.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, ObjectId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::normalize::{normalize, strip_numbering};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to open document: {0}")]
    Open(String),
    #[error("failed to extract text: {0}")]
    Text(String),
    #[error("document contains no extractable text")]
    NoText,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An embedded image written to disk, attributed to the section it appeared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    pub section: String,
    pub path: PathBuf,
    pub page: u32,
}

/// Document text/image backend.
pub trait DocumentExtractor: Send + Sync {
    fn extract_text(&self, data: &[u8]) -> Result<String, ExtractionError>;

    /// Write embedded images into `out_dir`. `section_hints` are the headings
    /// to attribute images to; images before any hint go to `"Unassigned"`.
    fn extract_images(
        &self,
        data: &[u8],
        section_hints: &[String],
        out_dir: &Path,
    ) -> Result<Vec<ExtractedImage>, ExtractionError>;

    fn extract_text_from_path(&self, path: &Path) -> Result<String, ExtractionError> {
        let data = std::fs::read(path)?;
        self.extract_text(&data)
    }
}

/// PDF backend built on `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    fn load(data: &[u8]) -> Result<Document, ExtractionError> {
        Document::load_from(Cursor::new(data))
            .map_err(|e| ExtractionError::Open(format!("Failed to load PDF: {}", e)))
    }
}

impl DocumentExtractor for LopdfExtractor {
    fn extract_text(&self, data: &[u8]) -> Result<String, ExtractionError> {
        let doc = Self::load(data)?;

        let mut text = String::new();
        let mut failed_pages = 0;
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(content) => {
                    text.push_str(&content);
                    text.push('\n');
                }
                Err(e) => {
                    failed_pages += 1;
                    debug!("Text extraction failed on page {}: {}", page_num, e);
                }
            }
        }

        if text.trim().is_empty() {
            return Err(if failed_pages > 0 {
                ExtractionError::Text(format!("{} page(s) unreadable", failed_pages))
            } else {
                ExtractionError::NoText
            });
        }
        info!("Extracted {} chars of PDF text", text.len());
        Ok(text)
    }

    fn extract_images(
        &self,
        data: &[u8],
        section_hints: &[String],
        out_dir: &Path,
    ) -> Result<Vec<ExtractedImage>, ExtractionError> {
        let doc = Self::load(data)?;
        std::fs::create_dir_all(out_dir)?;

        let hints: Vec<(String, String)> = section_hints
            .iter()
            .map(|h| (strip_numbering(h), h.clone()))
            .collect();

        let mut current = "Unassigned".to_string();
        let mut images = Vec::new();

        for (page_num, page_id) in doc.get_pages() {
            if let Ok(page_text) = doc.extract_text(&[page_num]) {
                for line in page_text.lines() {
                    let stripped = strip_numbering(line);
                    if stripped.is_empty() {
                        continue;
                    }
                    if let Some((_, hint)) = hints
                        .iter()
                        .find(|(key, hint)| *key == stripped || normalize(hint) == normalize(line))
                    {
                        current = hint.clone();
                    }
                }
            }

            for (n, bytes) in page_images(&doc, page_id).into_iter().enumerate() {
                let Ok(format) = image::guess_format(&bytes) else {
                    debug!("Skipping undecodable image on page {}", page_num);
                    continue;
                };
                let ext = format.extensions_str().first().copied().unwrap_or("img");
                let path = out_dir.join(format!("page{}_img{}.{}", page_num, n + 1, ext));
                std::fs::write(&path, &bytes)?;
                images.push(ExtractedImage {
                    section: current.clone(),
                    path,
                    page: page_num,
                });
            }
        }

        info!("Extracted {} embedded images", images.len());
        Ok(images)
    }
}

/// Raw bytes of every image XObject referenced by a page's resources.
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
    let (resources, resource_ids) = doc.get_page_resources(page_id);

    let mut dictionaries = Vec::new();
    if let Some(dict) = resources {
        dictionaries.push(dict);
    }
    for id in resource_ids {
        if let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) {
            dictionaries.push(dict);
        }
    }

    let mut images = Vec::new();
    for resources in dictionaries {
        let Ok(xobjects) = resources.get(b"XObject") else {
            continue;
        };
        let xobjects = match resolve(doc, xobjects).and_then(|o| o.as_dict().ok()) {
            Some(dict) => dict,
            None => continue,
        };
        for (_, entry) in xobjects.iter() {
            let Some(stream) = resolve(doc, entry).and_then(|o| o.as_stream().ok()) else {
                continue;
            };
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|name| name == b"Image")
                .unwrap_or(false);
            if is_image {
                images.push(stream.content.clone());
            }
        }
    }
    images
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                warn!("Dangling PDF reference {:?}: {}", id, e);
                None
            }
        },
        other => Some(other),
    }
}

/// Plain-text passthrough for non-PDF uploads.
pub fn decode_plain_text(data: &[u8]) -> Result<String, ExtractionError> {
    let text = String::from_utf8_lossy(data).to_string();
    if text.trim().is_empty() {
        return Err(ExtractionError::NoText);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_extraction_error() {
        let err = LopdfExtractor.extract_text(b"definitely not a pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Open(_)));
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(decode_plain_text(b"1 Introduction\n").unwrap(), "1 Introduction\n");
        assert!(matches!(decode_plain_text(b"  \n"), Err(ExtractionError::NoText)));
    }

    #[test]
    fn test_missing_file() {
        let err = LopdfExtractor
            .extract_text_from_path(Path::new("/nonexistent/file.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }
}
