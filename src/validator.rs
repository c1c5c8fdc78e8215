//! Reconciles a segmented document against its template.
//!
//! Pure and deterministic. Identifiers reported as matching/missing are the
//! template's canonical titles; extras are titles as found in the document.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::normalize::strip_numbering;
use crate::segmenter::{ParsedDocument, SectionBody};
use crate::template::Template;

/// A template title found somewhere other than where the template puts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Misplaced {
    /// Title as it appears in the document.
    pub found: String,
    /// Canonical template title.
    pub expected: String,
    pub found_position: usize,
    pub expected_position: usize,
    /// Parent main section (template title) for subsections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderValidation {
    pub is_correct: bool,
    /// Template order of all main sections.
    pub expected_order: Vec<String>,
    /// Recognized main sections (template titles) in document order.
    pub actual_order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub template: String,
    pub matching_sections: Vec<String>,
    pub missing_sections: Vec<String>,
    pub extra_sections: Vec<String>,
    pub misplaced_sections: Vec<Misplaced>,
    pub matching_subsections: Vec<String>,
    pub missing_subsections: Vec<String>,
    pub extra_subsections: Vec<String>,
    pub misplaced_subsections: Vec<Misplaced>,
    pub order_validation: OrderValidation,
    /// The document had no recognizable sections at all.
    pub no_sections_recognized: bool,
}

impl ValidationResult {
    /// Nothing missing, misplaced or extra, and the order holds.
    pub fn is_conformant(&self) -> bool {
        self.missing_sections.is_empty()
            && self.misplaced_sections.is_empty()
            && self.extra_sections.is_empty()
            && self.missing_subsections.is_empty()
            && self.misplaced_subsections.is_empty()
            && self.extra_subsections.is_empty()
            && self.order_validation.is_correct
    }
}

/// How a template title was located in the document.
enum Located<'d> {
    Exact { position: usize },
    Renumbered { found: &'d str, position: usize },
    Missing,
}

fn locate<'d>(
    title: &str,
    exact_position: Option<usize>,
    stripped_index: &HashMap<String, (&'d str, usize)>,
) -> Located<'d> {
    if let Some(position) = exact_position {
        return Located::Exact { position };
    }
    match stripped_index.get(&strip_numbering(title)) {
        Some(&(found, position)) => Located::Renumbered { found, position },
        None => Located::Missing,
    }
}

/// Compare `parsed` with `template`.
///
/// Titles are compared exactly or after stripping numbering, never fuzzily:
/// a misspelled heading counts as both an extra and a missing section.
pub fn validate(parsed: &ParsedDocument, template: &Template) -> ValidationResult {
    let index = template.index();

    // First occurrence wins when two headings strip to the same text.
    let mut stripped_sections: HashMap<String, (&str, usize)> = HashMap::new();
    for (position, title) in parsed.titles().enumerate() {
        stripped_sections
            .entry(strip_numbering(title))
            .or_insert((title, position));
    }

    let mut result = ValidationResult {
        template: template.name.clone(),
        matching_sections: Vec::new(),
        missing_sections: Vec::new(),
        extra_sections: Vec::new(),
        misplaced_sections: Vec::new(),
        matching_subsections: Vec::new(),
        missing_subsections: Vec::new(),
        extra_subsections: Vec::new(),
        misplaced_subsections: Vec::new(),
        order_validation: OrderValidation {
            is_correct: true,
            expected_order: template.section_titles().map(str::to_string).collect(),
            actual_order: Vec::new(),
        },
        no_sections_recognized: parsed.is_empty(),
    };

    for (expected_position, section) in template.sections.iter().enumerate() {
        let located = locate(
            &section.title,
            parsed.position(&section.title),
            &stripped_sections,
        );

        let body = match located {
            Located::Exact { position } => {
                if position == expected_position {
                    result.matching_sections.push(section.title.clone());
                } else {
                    result.misplaced_sections.push(Misplaced {
                        found: section.title.clone(),
                        expected: section.title.clone(),
                        found_position: position,
                        expected_position,
                        parent: None,
                        message: format!(
                            "Section '{}' found at position {}, expected at position {}",
                            section.title, position, expected_position
                        ),
                    });
                }
                parsed.get(&section.title)
            }
            Located::Renumbered { found, position } => {
                result.misplaced_sections.push(Misplaced {
                    found: found.to_string(),
                    expected: section.title.clone(),
                    found_position: position,
                    expected_position,
                    parent: None,
                    message: format!(
                        "Section '{}' at position {} should be titled '{}' at position {}",
                        found, position, section.title, expected_position
                    ),
                });
                parsed.get(found)
            }
            Located::Missing => {
                result.missing_sections.push(section.title.clone());
                None
            }
        };

        match body {
            Some(body) => validate_subsections(&mut result, &section.title, &section.subsections, body),
            None => result
                .missing_subsections
                .extend(section.subsections.iter().cloned()),
        }
    }

    // Extras: anything whose stripped form the template does not know.
    // Headings the segmenter accepted only by fuzzy match (`1 Introductoin`)
    // land here while the template title they resemble is reported missing.
    for (title, body) in parsed.iter() {
        if index.section(&strip_numbering(title)).is_none() {
            result.extra_sections.push(title.clone());
        }
        for sub in body.subsections.keys() {
            if index.subsection_owner(&strip_numbering(sub)).is_none() {
                result.extra_subsections.push(sub.clone());
            }
        }
    }

    // Order: recognized sections must keep strictly increasing template positions.
    let mut last: Option<usize> = None;
    for title in parsed.titles() {
        let Some(indexed) = index.section(&strip_numbering(title)) else {
            continue;
        };
        result.order_validation.actual_order.push(indexed.title.clone());
        if let Some(previous) = last {
            if indexed.position <= previous {
                result.order_validation.is_correct = false;
            }
        }
        last = Some(indexed.position);
    }

    if result.no_sections_recognized {
        warn!(
            "Document has no sections recognizable under template {}; all {} reported missing",
            template.name,
            template.sections.len()
        );
    }
    debug!(
        "Validation against {}: {} matching, {} missing, {} misplaced, {} extra, order_ok={}",
        template.name,
        result.matching_sections.len(),
        result.missing_sections.len(),
        result.misplaced_sections.len(),
        result.extra_sections.len(),
        result.order_validation.is_correct
    );

    result
}

fn validate_subsections(
    result: &mut ValidationResult,
    parent: &str,
    expected: &[String],
    body: &SectionBody,
) {
    let mut stripped_subs: HashMap<String, (&str, usize)> = HashMap::new();
    for (position, title) in body.subsections.keys().enumerate() {
        stripped_subs
            .entry(strip_numbering(title))
            .or_insert((title.as_str(), position));
    }

    for (expected_position, sub) in expected.iter().enumerate() {
        match locate(sub, body.subsections.get_index_of(sub), &stripped_subs) {
            Located::Exact { position } if position == expected_position => {
                result.matching_subsections.push(sub.clone());
            }
            Located::Exact { position } => result.misplaced_subsections.push(Misplaced {
                found: sub.clone(),
                expected: sub.clone(),
                found_position: position,
                expected_position,
                parent: Some(parent.to_string()),
                message: format!(
                    "Subsection '{}' of '{}' found at position {}, expected at position {}",
                    sub, parent, position, expected_position
                ),
            }),
            Located::Renumbered { found, position } => {
                result.misplaced_subsections.push(Misplaced {
                    found: found.to_string(),
                    expected: sub.clone(),
                    found_position: position,
                    expected_position,
                    parent: Some(parent.to_string()),
                    message: format!(
                        "Subsection '{}' of '{}' at position {} should be titled '{}' at position {}",
                        found, parent, position, sub, expected_position
                    ),
                })
            }
            Located::Missing => result.missing_subsections.push(sub.clone()),
        }
    }
}
