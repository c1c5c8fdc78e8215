//! Turns a stream of text lines into a section/subsection tree.
//!
//! Two variants share the scan loop shape:
//! - [`Segmenter::segment`] recognizes headings by pattern plus fuzzy match
//!   against the template and nests subsections under their main section.
//! - [`Segmenter::segment_for_content_analysis`] anchors each template title
//!   as a literal regex and emits a flat title → text mapping.

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::normalize::{best_match, normalize, strip_numbering, NormalizedLevenshtein, TitleSimilarity};
use crate::template::Template;

/// `3 System Description`, `8 Preliminary Object-Oriented Domain Analysis`.
/// Titles carry no digits, so contents entries like `1 Introduction 3` stay body text.
static MAIN_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.?\s+[A-Za-z][A-Za-z ,&/()'\-\u{2010}-\u{2015}]*$")
        .expect("main heading regex")
});

/// `3.1 Problem Statement`.
static SUB_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.\d+\.?\s+[A-Za-z][A-Za-z ,&/()'\-\u{2010}-\u{2015}]*$")
        .expect("subsection heading regex")
});

/// Which subsection titles a heading is fuzzy-matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsectionScope {
    /// Any subsection of any main section in the template.
    #[default]
    Global,
    /// Only subsections of the currently open main section.
    CurrentSection,
}

impl std::str::FromStr for SubsectionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "section" | "current_section" => Ok(Self::CurrentSection),
            other => Err(format!("unknown subsection scope '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct SegmenterOptions {
    /// Minimum fuzzy similarity for a numbered line to count as a heading.
    pub threshold: f64,
    pub subsection_scope: SubsectionScope,
    pub similarity: Arc<dyn TitleSimilarity>,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            subsection_scope: SubsectionScope::Global,
            similarity: Arc::new(NormalizedLevenshtein),
        }
    }
}

impl std::fmt::Debug for SegmenterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmenterOptions")
            .field("threshold", &self.threshold)
            .field("subsection_scope", &self.subsection_scope)
            .field("similarity", &self.similarity.name())
            .finish()
    }
}

/// Text body of a main section plus its subsections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionBody {
    pub content: String,
    pub subsections: IndexMap<String, String>,
}

/// Sections keyed by their heading as written, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedDocument {
    sections: IndexMap<String, SectionBody>,
}

impl ParsedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn get(&self, title: &str) -> Option<&SectionBody> {
        self.sections.get(title)
    }

    /// Zero-based order of appearance.
    pub fn position(&self, title: &str) -> Option<usize> {
        self.sections.get_index_of(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SectionBody)> {
        self.sections.iter()
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Open (or reopen) a section; its position is fixed at first insertion.
    pub fn open_section(&mut self, title: &str) -> &mut SectionBody {
        self.sections.entry(title.to_string()).or_default()
    }

    fn section_mut(&mut self, title: &str) -> Option<&mut SectionBody> {
        self.sections.get_mut(title)
    }
}

/// Where buffered lines go when flushed.
#[derive(Debug, Clone)]
struct Cursor {
    section: String,
    /// Template position of the open main section, if it maps to one.
    template_position: Option<usize>,
    subsection: Option<String>,
}

enum LineKind {
    Main { template_position: Option<usize> },
    Sub,
    Body,
}

/// Line scanner bound to one template.
pub struct Segmenter<'t> {
    template: &'t Template,
    options: SegmenterOptions,
}

impl<'t> Segmenter<'t> {
    pub fn new(template: &'t Template, options: SegmenterOptions) -> Self {
        Self { template, options }
    }

    pub fn with_defaults(template: &'t Template) -> Self {
        Self::new(template, SegmenterOptions::default())
    }

    /// Bucket lines into main sections and subsections.
    pub fn segment<I, S>(&self, lines: I) -> ParsedDocument
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut document = ParsedDocument::new();
        let mut cursor: Option<Cursor> = None;
        let mut buffer: Vec<String> = Vec::new();

        for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }

            let scope = cursor.as_ref().and_then(|c| c.template_position);
            match self.classify(line, scope) {
                LineKind::Main { template_position } => {
                    flush(&mut document, cursor.as_ref(), &mut buffer);
                    document.open_section(line);
                    cursor = Some(Cursor {
                        section: line.to_string(),
                        template_position,
                        subsection: None,
                    });
                }
                LineKind::Sub => match cursor.as_mut() {
                    Some(open) => {
                        flush(&mut document, Some(&*open), &mut buffer);
                        if let Some(body) = document.section_mut(&open.section) {
                            body.subsections.entry(line.to_string()).or_default();
                        }
                        open.subsection = Some(line.to_string());
                    }
                    None => {
                        debug!("Dropping subsection heading before any main section: {:?}", line);
                    }
                },
                LineKind::Body => {
                    if cursor.is_some() {
                        buffer.push(line.to_string());
                    }
                }
            }
        }

        flush(&mut document, cursor.as_ref(), &mut buffer);

        if document.is_empty() {
            warn!("No recognizable sections found for template {}", self.template.name);
        }
        document
    }

    /// Flat title → text mapping for similarity analysis.
    ///
    /// A line opens a block only if, once normalized, it equals a template
    /// title either with or without its numbering. Blocks are keyed by the
    /// canonical template title; subsections become blocks of their own.
    pub fn segment_for_content_analysis<I, S>(&self, lines: I) -> IndexMap<String, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let anchors = TitleAnchors::compile(self.template);
        let mut blocks: IndexMap<String, String> = IndexMap::new();
        let mut current: Option<String> = None;
        let mut buffer: Vec<String> = Vec::new();

        for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }

            if let Some(title) = anchors.find(&normalize(line)) {
                if let Some(open) = current.take() {
                    append(blocks.entry(open).or_default(), &mut buffer);
                }
                blocks.entry(title.to_string()).or_default();
                current = Some(title.to_string());
            } else if current.is_some() {
                buffer.push(line.to_string());
            }
        }

        if let Some(open) = current {
            append(blocks.entry(open).or_default(), &mut buffer);
        }
        blocks
    }

    fn classify(&self, line: &str, current_position: Option<usize>) -> LineKind {
        let index = self.template.index();
        let metric = self.options.similarity.as_ref();
        let threshold = self.options.threshold;

        if normalize(line) == "abstract" {
            return LineKind::Main {
                template_position: index.section("abstract").map(|t| t.position),
            };
        }

        let stripped = strip_numbering(line);

        if MAIN_HEADING.is_match(line) {
            let keys = index.section_keys().iter().map(String::as_str);
            if let Some((position, _)) = best_match(metric, &stripped, keys, threshold) {
                return LineKind::Main {
                    template_position: Some(position),
                };
            }
        }

        if SUB_HEADING.is_match(line) {
            let vocabulary: &[String] = match self.options.subsection_scope {
                SubsectionScope::Global => index.all_subsection_keys(),
                SubsectionScope::CurrentSection => match current_position {
                    Some(position) => index.subsection_keys(position),
                    None => &[],
                },
            };
            let keys = vocabulary.iter().map(String::as_str);
            if best_match(metric, &stripped, keys, threshold).is_some() {
                return LineKind::Sub;
            }
        }

        LineKind::Body
    }
}

/// Move buffered lines into the bucket the cursor points at.
fn flush(document: &mut ParsedDocument, cursor: Option<&Cursor>, buffer: &mut Vec<String>) {
    let Some(cursor) = cursor else {
        buffer.clear();
        return;
    };
    let Some(body) = document.section_mut(&cursor.section) else {
        buffer.clear();
        return;
    };
    match &cursor.subsection {
        Some(sub) => append(body.subsections.entry(sub.clone()).or_default(), buffer),
        None => append(&mut body.content, buffer),
    }
}

fn append(target: &mut String, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let joined = buffer.join(" ");
    buffer.clear();
    if target.is_empty() {
        *target = joined;
    } else {
        target.push(' ');
        target.push_str(&joined);
    }
}

/// Anchored `^(?:numbered|stripped)$` patterns, one per template title.
struct TitleAnchors {
    anchors: Vec<(String, Regex)>,
}

impl TitleAnchors {
    fn compile(template: &Template) -> Self {
        let titles = template.sections.iter().flat_map(|section| {
            std::iter::once(section.title.as_str()).chain(section.subsections.iter().map(String::as_str))
        });

        let mut anchors = Vec::new();
        for title in titles {
            let full = regex::escape(&normalize(title));
            let stripped = strip_numbering(title);
            let pattern = if stripped.is_empty() {
                format!("^(?:{})$", full)
            } else {
                format!("^(?:{}|{})$", full, regex::escape(&stripped))
            };
            match Regex::new(&pattern) {
                Ok(regex) => anchors.push((title.to_string(), regex)),
                Err(e) => warn!("Skipping title anchor for '{}': {}", title, e),
            }
        }
        Self { anchors }
    }

    fn find(&self, normalized_line: &str) -> Option<&str> {
        self.anchors
            .iter()
            .find(|(_, regex)| regex.is_match(normalized_line))
            .map(|(title, _)| title.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateRegistry;

    fn srs() -> Arc<Template> {
        TemplateRegistry::builtin().unwrap().get("SRS").unwrap()
    }

    #[test]
    fn test_heading_patterns() {
        assert!(MAIN_HEADING.is_match("3 System Description"));
        assert!(MAIN_HEADING.is_match("6 Non-functional Requirements"));
        assert!(!MAIN_HEADING.is_match("3.1 Problem Statement"));
        assert!(!MAIN_HEADING.is_match("In 2020 we started."));
        assert!(SUB_HEADING.is_match("3.1 Problem Statement"));
        assert!(SUB_HEADING.is_match("12.1 Definitions, Acronyms, and Abbreviations"));
        assert!(!SUB_HEADING.is_match("3 System Description"));
        assert!(!MAIN_HEADING.is_match("1 Introduction 3"));
        assert!(!SUB_HEADING.is_match("1.1 Purpose of this document 3"));
    }

    #[test]
    fn test_table_of_contents_is_not_segmented() {
        let template = srs();
        let lines = [
            "Abstract",
            "1 Introduction 3",
            "1.1 Purpose of this document 3",
            "2 Similar Systems 5",
            "Abstract",
            "Summary text.",
            "1 Introduction",
            "Intro body.",
            "1.1 Purpose of this document",
            "Purpose body.",
            "2 Similar Systems",
            "Systems body.",
        ];
        let doc = Segmenter::with_defaults(&template).segment(lines);
        assert_eq!(
            doc.titles().collect::<Vec<_>>(),
            vec!["Abstract", "1 Introduction", "2 Similar Systems"]
        );

        let result = crate::validator::validate(&doc, &template);
        assert!(result.misplaced_sections.is_empty(), "{:?}", result.misplaced_sections);
        assert!(result.extra_sections.is_empty(), "{:?}", result.extra_sections);
        assert!(result.order_validation.is_correct);
    }

    #[test]
    fn test_basic_segmentation() {
        let template = srs();
        let lines = [
            "Cover page text that is dropped",
            "Abstract",
            "This project validates documents.",
            "",
            "It has two lines.",
            "1 Introduction",
            "Intro body.",
            "1.1 Purpose of this document",
            "Purpose body.",
            "1.2 Scope of this document",
            "Scope body.",
        ];
        let doc = Segmenter::with_defaults(&template).segment(lines);

        assert_eq!(doc.titles().collect::<Vec<_>>(), vec!["Abstract", "1 Introduction"]);
        let abstract_body = doc.get("Abstract").unwrap();
        assert_eq!(abstract_body.content, "This project validates documents. It has two lines.");
        assert!(abstract_body.subsections.is_empty());

        let intro = doc.get("1 Introduction").unwrap();
        assert_eq!(intro.content, "Intro body.");
        assert_eq!(
            intro.subsections.keys().collect::<Vec<_>>(),
            vec!["1.1 Purpose of this document", "1.2 Scope of this document"]
        );
        assert_eq!(intro.subsections["1.1 Purpose of this document"], "Purpose body.");
        assert_eq!(intro.subsections["1.2 Scope of this document"], "Scope body.");
    }

    #[test]
    fn test_fuzzy_heading_and_unrelated_numbers() {
        let template = srs();
        let lines = [
            "1 Introductoin",
            "2 apples were bought",
            "3 System Descripton",
            "Body.",
        ];
        let doc = Segmenter::with_defaults(&template).segment(lines);
        assert_eq!(
            doc.titles().collect::<Vec<_>>(),
            vec!["1 Introductoin", "3 System Descripton"]
        );
        assert_eq!(doc.get("1 Introductoin").unwrap().content, "2 apples were bought");
    }

    #[test]
    fn test_subsection_before_main_is_dropped() {
        let template = srs();
        let lines = ["1.1 Purpose of this document", "orphan", "1 Introduction", "kept"];
        let doc = Segmenter::with_defaults(&template).segment(lines);
        assert_eq!(doc.len(), 1);
        let intro = doc.get("1 Introduction").unwrap();
        assert_eq!(intro.content, "kept");
        assert!(intro.subsections.is_empty());
    }

    #[test]
    fn test_subsection_scope_flag() {
        let template = srs();
        // 3.1 belongs to "3 System Description", not to the open "1 Introduction".
        let lines = ["1 Introduction", "3.1 Problem Statement", "text"];

        let global = Segmenter::with_defaults(&template).segment(lines);
        let intro = global.get("1 Introduction").unwrap();
        assert!(intro.subsections.contains_key("3.1 Problem Statement"));

        let scoped = Segmenter::new(
            &template,
            SegmenterOptions {
                subsection_scope: SubsectionScope::CurrentSection,
                ..SegmenterOptions::default()
            },
        )
        .segment(lines);
        let intro = scoped.get("1 Introduction").unwrap();
        assert!(intro.subsections.is_empty());
        assert_eq!(intro.content, "3.1 Problem Statement text");
    }

    #[test]
    fn test_repeated_heading_reopens_bucket() {
        let template = srs();
        let lines = ["1 Introduction", "a", "2 Similar Systems", "b", "1 Introduction", "c"];
        let doc = Segmenter::with_defaults(&template).segment(lines);
        assert_eq!(doc.position("1 Introduction"), Some(0));
        assert_eq!(doc.get("1 Introduction").unwrap().content, "a c");
    }

    #[test]
    fn test_empty_input() {
        let template = srs();
        let doc = Segmenter::with_defaults(&template).segment(Vec::<String>::new());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_content_analysis_is_flat_and_strict() {
        let template = srs();
        let lines = [
            "ABSTRACT",
            "summary text",
            "1  Introduction",
            "intro text",
            "Purpose of this document",
            "purpose text",
            "1 Introductoin",
            "still purpose",
        ];
        let blocks = Segmenter::with_defaults(&template).segment_for_content_analysis(lines);
        assert_eq!(
            blocks.keys().collect::<Vec<_>>(),
            vec!["Abstract", "1 Introduction", "1.1 Purpose of this document"]
        );
        assert_eq!(blocks["1 Introduction"], "intro text");
        assert_eq!(
            blocks["1.1 Purpose of this document"],
            "purpose text 1 Introductoin still purpose"
        );
    }
}
