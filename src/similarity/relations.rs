//! Relationships derived from a similarity matrix.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::category::is_diagram_name;
use super::matrix::SimilarityMatrix;
use crate::policy::CallPolicy;
use crate::provider::LlmProvider;

/// Scaled scores above this count as a relationship.
pub const RELATION_THRESHOLD: f64 = 0.3;

/// How many related sections are listed per diagram.
pub const RELATED_PER_DIAGRAM: usize = 3;

/// Characters of each block quoted in an explanation prompt.
const PROMPT_EXCERPT: usize = 1200;

#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedSection {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagramRelations {
    pub diagram: String,
    pub related_sections: Vec<RelatedSection>,
}

/// Every off-diagonal pair above [`RELATION_THRESHOLD`], strongest first.
pub fn strong_pairs(matrix: &SimilarityMatrix) -> Vec<Relationship> {
    let names = matrix.names();
    let mut pairs = Vec::new();
    for i in 0..matrix.len() {
        for j in (i + 1)..matrix.len() {
            let score = matrix.get(i, j);
            if score > RELATION_THRESHOLD {
                pairs.push(Relationship {
                    source: names[i].clone(),
                    target: names[j].clone(),
                    score,
                    explanation: None,
                });
            }
        }
    }
    pairs.sort_by(|a, b| b.score.total_cmp(&a.score));
    pairs
}

/// For each diagram, the top non-diagram blocks scoring above the threshold.
pub fn diagram_summary(matrix: &SimilarityMatrix) -> Vec<DiagramRelations> {
    let names = matrix.names();
    let diagram: Vec<bool> = names
        .iter()
        .zip(matrix.categories())
        .map(|(name, category)| category.is_diagram() || is_diagram_name(name))
        .collect();

    (0..matrix.len())
        .filter(|&i| diagram[i])
        .map(|i| {
            let mut related: Vec<RelatedSection> = (0..matrix.len())
                .filter(|&j| j != i && !diagram[j])
                .map(|j| RelatedSection {
                    name: names[j].clone(),
                    score: matrix.get(i, j),
                })
                .filter(|r| r.score > RELATION_THRESHOLD)
                .collect();
            related.sort_by(|a, b| b.score.total_cmp(&a.score));
            related.truncate(RELATED_PER_DIAGRAM);
            DiagramRelations {
                diagram: names[i].clone(),
                related_sections: related,
            }
        })
        .collect()
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(PROMPT_EXCERPT) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn explanation_prompt(rel: &Relationship, source_text: &str, target_text: &str) -> String {
    format!(
        "Two parts of a software engineering document were found to be related \
         (similarity {:.2}). In two or three sentences, explain how they relate.\n\n\
         --- {} ---\n{}\n\n--- {} ---\n{}",
        rel.score,
        rel.source,
        excerpt(source_text),
        rel.target,
        excerpt(target_text)
    )
}

/// Ask the LLM to describe the strongest relationships.
///
/// Best-effort: a failed call leaves `explanation` empty. Returns how many
/// explanations could not be produced.
pub async fn explain(
    relationships: &mut [Relationship],
    blocks: &IndexMap<String, String>,
    llm: &dyn LlmProvider,
    policy: &CallPolicy,
    limit: usize,
) -> usize {
    let mut failures = 0;
    for rel in relationships.iter_mut().take(limit) {
        let (Some(source), Some(target)) = (blocks.get(&rel.source), blocks.get(&rel.target)) else {
            continue;
        };
        let prompt = explanation_prompt(rel, source, target);
        match policy.call(llm.name(), || llm.complete(&prompt)).await {
            Ok(text) => {
                debug!("Explained {} <-> {}", rel.source, rel.target);
                rel.explanation = Some(text.trim().to_string());
            }
            Err(e) => {
                warn!("Relationship explanation skipped for {} <-> {}: {}", rel.source, rel.target, e);
                failures += 1;
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RateLimiter, RetryPolicy};
    use crate::provider::ProviderError;
    use crate::similarity::matrix::{MatrixBuilder, PairScorer};
    use std::sync::Arc;
    use std::time::Duration;

    /// Score = table lookup, symmetric.
    struct TableScorer(Vec<Vec<f64>>);

    impl PairScorer for TableScorer {
        fn method(&self) -> &'static str {
            "table"
        }

        fn score(&self, i: usize, j: usize) -> f64 {
            self.0[i][j]
        }
    }

    fn sample_matrix() -> SimilarityMatrix {
        let names = vec![
            "Figure 1 class diagram".to_string(),
            "4 Data Design".to_string(),
            "3 System Architecture".to_string(),
            "Data Dictionary".to_string(),
            "Database Schema".to_string(),
            "Figure 2 sequence diagram".to_string(),
        ];
        let mut table = vec![vec![0.0; 6]; 6];
        let mut set = |i: usize, j: usize, v: f64| {
            table[i][j] = v;
            table[j][i] = v;
        };
        set(0, 1, 0.81); // scaled 0.9
        set(0, 2, 0.25); // scaled 0.5
        set(0, 3, 0.64); // scaled 0.8
        set(0, 4, 0.49); // scaled 0.7
        set(0, 5, 0.99); // diagram-diagram, never compared
        set(1, 2, 0.05); // scaled 0.0
        MatrixBuilder::new().build_with(names, &TableScorer(table))
    }

    #[test]
    fn test_diagram_summary_top_three() {
        let summary = diagram_summary(&sample_matrix());
        assert_eq!(summary.len(), 2);

        let class = &summary[0];
        assert_eq!(class.diagram, "Figure 1 class diagram");
        let names: Vec<_> = class.related_sections.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["4 Data Design", "Data Dictionary", "Database Schema"]);
        assert!(class.related_sections[0].score >= class.related_sections[1].score);

        assert!(summary[1].related_sections.is_empty());
    }

    #[test]
    fn test_strong_pairs_sorted() {
        let pairs = strong_pairs(&sample_matrix());
        assert!(pairs.iter().all(|p| p.score > RELATION_THRESHOLD));
        assert_eq!(pairs[0].target, "4 Data Design");
        assert!(pairs.windows(2).all(|w| w[0].score >= w[1].score));
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl LlmProvider for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            Err(ProviderError::Invalid {
                provider: "unreachable".into(),
                detail: "no key".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_explain_failure_is_not_fatal() {
        let mut pairs = strong_pairs(&sample_matrix());
        let blocks: IndexMap<String, String> = sample_matrix()
            .names()
            .iter()
            .map(|n| (n.clone(), "text".to_string()))
            .collect();
        let policy = CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy::no_retry(),
            Arc::new(RateLimiter::unlimited()),
        );
        let failures = explain(&mut pairs, &blocks, &Unreachable, &policy, 2).await;
        assert_eq!(failures, 2);
        assert!(pairs.iter().all(|p| p.explanation.is_none()));
    }
}
