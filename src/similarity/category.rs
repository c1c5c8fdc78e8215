//! Semantic category of a content block, derived from its name.
//!
//! Only category pairs in the compatibility table are worth comparing;
//! everything else scores 0.0 without running the comparison.

use serde::Serialize;

use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    Requirements,
    SystemDescription,
    Architecture,
    DataDesign,
    UiDesign,
    Testing,
    Deployment,
    ClassDiagram,
    SequenceDiagram,
    UseCaseDiagram,
    ActivityDiagram,
    ErDiagram,
    ComponentDiagram,
    DeploymentDiagram,
    OtherDiagram,
    Other,
}

impl BlockCategory {
    pub fn is_diagram(self) -> bool {
        matches!(
            self,
            Self::ClassDiagram
                | Self::SequenceDiagram
                | Self::UseCaseDiagram
                | Self::ActivityDiagram
                | Self::ErDiagram
                | Self::ComponentDiagram
                | Self::DeploymentDiagram
                | Self::OtherDiagram
        )
    }
}

/// Names that denote a diagram even without a generic marker word.
const IMPORTANT_DIAGRAMS: &[&str] = &[
    "class diagram",
    "sequence diagram",
    "use case diagram",
    "activity diagram",
    "er diagram",
    "erd",
    "component diagram",
    "deployment diagram",
    "context diagram",
    "state diagram",
    "data flow diagram",
    "dfd",
    "block diagram",
    "uml",
];

const DIAGRAM_MARKERS: &[&str] = &["diagram", "figure", "fig", "chart", "graph", "illustration"];

const DIAGRAM_KINDS: &[(BlockCategory, &[&str])] = &[
    (BlockCategory::UseCaseDiagram, &["use case", "usecase"]),
    (BlockCategory::SequenceDiagram, &["sequence"]),
    (BlockCategory::ClassDiagram, &["class"]),
    (BlockCategory::ActivityDiagram, &["activity", "flowchart"]),
    (BlockCategory::ErDiagram, &["er", "erd", "entity relationship", "entity"]),
    (BlockCategory::ComponentDiagram, &["component"]),
    (BlockCategory::DeploymentDiagram, &["deployment"]),
];

/// Checked in order; the first hit wins.
const SECTION_KINDS: &[(BlockCategory, &[&str])] = &[
    (
        BlockCategory::Testing,
        &["test", "testing", "verification", "validation", "test cases"],
    ),
    (
        BlockCategory::UiDesign,
        &["interface", "ui", "user interface", "screen", "screens", "usability", "gui"],
    ),
    (
        BlockCategory::DataDesign,
        &["data", "database", "data dictionary", "schema", "domain analysis"],
    ),
    (
        BlockCategory::Deployment,
        &["deployment", "installation", "hardware", "operational", "environment"],
    ),
    (
        BlockCategory::Architecture,
        &["architecture", "architectural", "decomposition", "component", "design rationale", "system design"],
    ),
    (
        BlockCategory::Requirements,
        &["requirement", "requirements", "functional", "constraints", "security", "performance", "reliability", "functions"],
    ),
    (
        BlockCategory::SystemDescription,
        &["system description", "overview", "problem statement", "scope", "objectives", "context", "introduction", "purpose", "similar systems"],
    ),
];

/// Lowercased words separated by single spaces, padded for whole-word search.
fn padded_words(name: &str) -> String {
    let words: String = normalize(name)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn has_phrase(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {} ", phrase))
}

/// Whether a block name refers to a diagram/figure.
pub fn is_diagram_name(name: &str) -> bool {
    let padded = padded_words(name);
    DIAGRAM_MARKERS.iter().any(|m| has_phrase(&padded, m))
        || IMPORTANT_DIAGRAMS.iter().any(|d| has_phrase(&padded, d))
}

pub fn classify(name: &str) -> BlockCategory {
    let padded = padded_words(name);

    if is_diagram_name(name) {
        return DIAGRAM_KINDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| has_phrase(&padded, w)))
            .map(|(category, _)| *category)
            .unwrap_or(BlockCategory::OtherDiagram);
    }

    SECTION_KINDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| has_phrase(&padded, w)))
        .map(|(category, _)| *category)
        .unwrap_or(BlockCategory::Other)
}

/// Unordered category pairs worth comparing (besides identical categories).
const COMPATIBLE: &[(BlockCategory, BlockCategory)] = {
    use BlockCategory::*;
    &[
        (Requirements, SystemDescription),
        (Requirements, Architecture),
        (Requirements, UiDesign),
        (Requirements, Testing),
        (Requirements, UseCaseDiagram),
        (Requirements, ActivityDiagram),
        (SystemDescription, Architecture),
        (SystemDescription, DataDesign),
        (SystemDescription, UseCaseDiagram),
        (SystemDescription, ComponentDiagram),
        (SystemDescription, OtherDiagram),
        (Architecture, DataDesign),
        (Architecture, Deployment),
        (Architecture, ClassDiagram),
        (Architecture, SequenceDiagram),
        (Architecture, ComponentDiagram),
        (Architecture, DeploymentDiagram),
        (Architecture, OtherDiagram),
        (DataDesign, ClassDiagram),
        (DataDesign, ErDiagram),
        (UiDesign, UseCaseDiagram),
        (UiDesign, ActivityDiagram),
        (Testing, Deployment),
        (Testing, SequenceDiagram),
        (Deployment, DeploymentDiagram),
    ]
};

/// Symmetric compatibility check.
///
/// `Other` (unclassified prose) is compared with every non-diagram block.
pub fn is_compatible(a: BlockCategory, b: BlockCategory) -> bool {
    if a == b {
        return true;
    }
    if a == BlockCategory::Other || b == BlockCategory::Other {
        return !a.is_diagram() && !b.is_diagram();
    }
    COMPATIBLE
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}
