//! Response types returned by the analysis pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::references::Reference;
use crate::segmenter::ParsedDocument;
use crate::similarity::{BlockCategory, DiagramRelations, Relationship, SimilarityMatrix};
use crate::validator::ValidationResult;

/// Generate ISO8601 timestamp for current time.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

/// Format: 2025-02-05T12:00:00Z
fn format_iso8601(secs: u64) -> String {
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let mut year = 1970i32;
    let mut remaining_days = days_since_epoch as i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let february = if is_leap_year(year) { 29 } else { 28 };
    let days_in_months: [i32; 12] = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut month = 1;
    for days in days_in_months {
        if remaining_days < days {
            break;
        }
        remaining_days -= days;
        month += 1;
    }
    let day = remaining_days + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hours, minutes, seconds
    )
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Hex SHA-256 of the analyzed text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Everything produced for one analyzed document.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub id: String,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub analyzed_at: String, // ISO8601 timestamp
    pub analyzer_version: String,
    pub content_hash: String,
    pub validation: ValidationResult,
    pub document: Vec<DocumentSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_analysis: Option<ContentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
    /// Degraded or skipped optional steps.
    pub notices: Vec<String>,
}

impl AnalysisReport {
    pub fn new(template: String, text: &str, validation: ValidationResult) -> Self {
        Self {
            id: format!("rep_{}", Uuid::new_v4().simple()),
            template,
            source_file: None,
            analyzed_at: now_iso8601(),
            analyzer_version: env!("CARGO_PKG_VERSION").to_string(),
            content_hash: content_hash(text),
            validation,
            document: Vec::new(),
            content_analysis: None,
            references: None,
            notices: Vec::new(),
        }
    }
}

/// Serializable projection of a [`ParsedDocument`] section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSection {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subsections: Vec<DocumentSubsection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSubsection {
    pub title: String,
    pub content: String,
}

/// Flatten a parsed document into ordered sections.
pub fn project(parsed: &ParsedDocument) -> Vec<DocumentSection> {
    parsed
        .iter()
        .map(|(title, body)| DocumentSection {
            title: title.clone(),
            content: body.content.clone(),
            subsections: body
                .subsections
                .iter()
                .map(|(title, content)| DocumentSubsection {
                    title: title.clone(),
                    content: content.clone(),
                })
                .collect(),
        })
        .collect()
}

/// Similarity matrix and what was derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct ContentAnalysis {
    pub names: Vec<String>,
    pub categories: Vec<BlockCategory>,
    pub matrix: Vec<Vec<f64>>,
    /// `tfidf` or `embedding`.
    pub method: String,
    pub relationships: Vec<Relationship>,
    pub diagram_summary: Vec<DiagramRelations>,
}

impl ContentAnalysis {
    pub fn new(
        matrix: SimilarityMatrix,
        relationships: Vec<Relationship>,
        diagram_summary: Vec<DiagramRelations>,
    ) -> Self {
        Self {
            names: matrix.names().to_vec(),
            categories: matrix.categories().to_vec(),
            matrix: matrix.values().to_vec(),
            method: matrix.method().to_string(),
            relationships,
            diagram_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateRegistry;
    use crate::segmenter::Segmenter;

    #[test]
    fn test_format_iso8601() {
        assert_eq!(format_iso8601(0), "1970-01-01T00:00:00Z");
        // 2024-02-29T12:30:45Z
        assert_eq!(format_iso8601(1_709_209_845), "2024-02-29T12:30:45Z");
        assert_eq!(now_iso8601().len(), 20);
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn test_project_keeps_order() {
        let registry = TemplateRegistry::builtin().unwrap();
        let template = registry.get("SRS").unwrap();
        let parsed = Segmenter::with_defaults(&template).segment([
            "Abstract",
            "short summary",
            "1 Introduction",
            "1.1 Purpose of this document",
            "why",
        ]);

        let sections = project(&parsed);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Abstract");
        assert_eq!(sections[0].content, "short summary");
        assert_eq!(sections[1].subsections[0].title, "1.1 Purpose of this document");
        assert_eq!(sections[1].subsections[0].content, "why");

        let json = serde_json::to_value(&sections[0]).unwrap();
        assert!(json.get("subsections").is_none());
    }
}
