//! Pairwise similarity matrix over named content blocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use super::category::{classify, is_compatible, BlockCategory};
use super::tfidf::{dense_cosine, TfIdfModel};
use crate::policy::CallPolicy;
use crate::provider::EmbeddingProvider;

/// Spread mid-range scores: zero below 0.1, otherwise `sqrt(s)` clamped to `[0, 1]`.
pub fn scale(raw: f64) -> f64 {
    if raw.is_nan() || raw < 0.1 {
        0.0
    } else {
        raw.sqrt().clamp(0.0, 1.0)
    }
}

/// Raw similarity between two blocks, by index into the block list.
pub trait PairScorer: Send + Sync {
    fn method(&self) -> &'static str;
    fn score(&self, i: usize, j: usize) -> f64;
}

/// Default scorer, no external dependency.
#[derive(Debug, Clone)]
pub struct TfIdfScorer {
    model: TfIdfModel,
}

impl TfIdfScorer {
    pub fn fit<S: AsRef<str>>(texts: &[S]) -> Self {
        Self {
            model: TfIdfModel::fit(texts),
        }
    }
}

impl PairScorer for TfIdfScorer {
    fn method(&self) -> &'static str {
        "tfidf"
    }

    fn score(&self, i: usize, j: usize) -> f64 {
        self.model.cosine(i, j)
    }
}

/// Cosine over provider embeddings, TF-IDF for pairs missing an embedding.
#[derive(Debug)]
pub struct EmbeddingScorer {
    embeddings: Vec<Option<Vec<f32>>>,
    fallback: TfIdfScorer,
    fallback_pairs: AtomicUsize,
}

impl EmbeddingScorer {
    /// Embed every block once; failures leave a hole that TF-IDF fills in.
    pub async fn prepare<S: AsRef<str>>(
        texts: &[S],
        provider: &dyn EmbeddingProvider,
        policy: &CallPolicy,
    ) -> Self {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let text = text.as_ref();
            let embedded = policy
                .call(provider.name(), || provider.embed(text))
                .await;
            match embedded {
                Ok(vector) => embeddings.push(Some(vector)),
                Err(e) => {
                    warn!("Embedding failed, block will use tf-idf: {}", e);
                    embeddings.push(None);
                }
            }
        }

        Self::from_parts(embeddings, TfIdfScorer::fit(texts))
    }

    pub fn from_parts(embeddings: Vec<Option<Vec<f32>>>, fallback: TfIdfScorer) -> Self {
        Self {
            embeddings,
            fallback,
            fallback_pairs: AtomicUsize::new(0),
        }
    }

    pub fn missing_embeddings(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_none()).count()
    }

    /// Pairs scored with TF-IDF because an embedding was unavailable.
    pub fn fallback_pairs(&self) -> usize {
        self.fallback_pairs.load(Ordering::Relaxed)
    }
}

impl PairScorer for EmbeddingScorer {
    fn method(&self) -> &'static str {
        "embedding"
    }

    fn score(&self, i: usize, j: usize) -> f64 {
        match (self.embeddings.get(i), self.embeddings.get(j)) {
            (Some(Some(a)), Some(Some(b))) => dense_cosine(a, b),
            _ => {
                self.fallback_pairs.fetch_add(1, Ordering::Relaxed);
                self.fallback.score(i, j)
            }
        }
    }
}

/// Symmetric matrix of scaled scores, rows/columns in block order.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityMatrix {
    names: Vec<String>,
    categories: Vec<BlockCategory>,
    values: Vec<Vec<f64>>,
    method: String,
}

impl SimilarityMatrix {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn categories(&self) -> &[BlockCategory] {
        &self.categories
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values
            .get(i)
            .and_then(|row| row.get(j))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Builds matrices on a bounded rayon pool.
#[derive(Clone, Default)]
pub struct MatrixBuilder {
    type_filter: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for MatrixBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixBuilder")
            .field("type_filter", &self.type_filter)
            .field("workers", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

impl MatrixBuilder {
    pub fn new() -> Self {
        Self {
            type_filter: true,
            pool: None,
        }
    }

    pub fn with_type_filter(mut self, enabled: bool) -> Self {
        self.type_filter = enabled;
        self
    }

    /// Use a dedicated pool of `workers` threads; zero keeps rayon's global pool.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        if workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("similarity-{}", i))
                .build()?;
            self.pool = Some(Arc::new(pool));
        }
        Ok(self)
    }

    /// TF-IDF matrix over `blocks`.
    pub fn build(&self, blocks: &IndexMap<String, String>) -> SimilarityMatrix {
        let texts: Vec<&str> = blocks.values().map(String::as_str).collect();
        let scorer = TfIdfScorer::fit(&texts);
        self.build_with(blocks.keys().cloned().collect(), &scorer)
    }

    /// Matrix over `names` using `scorer`; only the upper triangle is scored.
    pub fn build_with(&self, names: Vec<String>, scorer: &dyn PairScorer) -> SimilarityMatrix {
        let n = names.len();
        let categories: Vec<BlockCategory> = names.iter().map(|name| classify(name)).collect();

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .filter(|&(i, j)| !self.type_filter || is_compatible(categories[i], categories[j]))
            .collect();

        debug!(
            "Scoring {} of {} block pairs with {}",
            pairs.len(),
            n * n.saturating_sub(1) / 2,
            scorer.method()
        );

        let compute = || -> Vec<f64> {
            pairs
                .par_iter()
                .map(|&(i, j)| scale(scorer.score(i, j)))
                .collect()
        };
        let scores = match &self.pool {
            Some(pool) => pool.install(compute),
            None => compute(),
        };

        let mut values = vec![vec![0.0; n]; n];
        for (&(i, j), score) in pairs.iter().zip(scores) {
            values[i][j] = score;
            values[j][i] = score;
        }

        SimilarityMatrix {
            names,
            categories,
            values,
            method: scorer.method().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts invocations and returns a fixed score.
    struct CountingScorer {
        calls: AtomicUsize,
        value: f64,
    }

    impl PairScorer for CountingScorer {
        fn method(&self) -> &'static str {
            "counting"
        }

        fn score(&self, _i: usize, _j: usize) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value
        }
    }

    fn blocks(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale(0.0), 0.0);
        assert_eq!(scale(0.099), 0.0);
        assert!((scale(0.25) - 0.5).abs() < 1e-12);
        assert_eq!(scale(1.0), 1.0);
        assert_eq!(scale(4.0), 1.0);
        let mut previous = scale(0.1);
        for step in 1..=90 {
            let current = scale(0.1 + step as f64 * 0.01);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_identical_compatible_blocks_score_one() {
        let text = "the operator uploads an srs document for structure checks";
        let matrix = MatrixBuilder::new().build(&blocks(&[
            ("4 Functional Requirements", text),
            ("3 System Description", text),
        ]));
        assert!((matrix.get(0, 1) - 1.0).abs() < 1e-9);
        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.method(), "tfidf");
    }

    #[test]
    fn test_incompatible_pairs_are_never_scored() {
        let names = vec![
            "Acceptance Testing".to_string(),
            "6 Human Interface Design".to_string(),
        ];
        let scorer = CountingScorer {
            calls: AtomicUsize::new(0),
            value: 0.9,
        };
        let matrix = MatrixBuilder::new().build_with(names.clone(), &scorer);
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);

        let unfiltered = MatrixBuilder::new()
            .with_type_filter(false)
            .build_with(names, &scorer);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert!(unfiltered.get(0, 1) > 0.9);
    }

    #[test]
    fn test_symmetric_and_ordered_on_dedicated_pool() {
        let builder = MatrixBuilder::new().with_workers(3).unwrap();
        let matrix = builder.build(&blocks(&[
            ("1 Introduction", "students submit software requirement documents"),
            ("4 Functional Requirements", "the system validates requirement documents"),
            ("3 System Description", "a web system for document validation"),
            ("7 Data Design", "tables store documents and validation results"),
            ("Figure 1 class diagram", "Document Validator Template classes"),
        ]));
        assert_eq!(matrix.names()[3], "7 Data Design");
        assert_eq!(matrix.index_of("Figure 1 class diagram"), Some(4));
        for i in 0..matrix.len() {
            for j in 0..matrix.len() {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
                assert!((0.0..=1.0).contains(&matrix.get(i, j)));
            }
        }
    }

    #[test]
    fn test_embedding_scorer_falls_back_per_pair() {
        let texts = ["alpha beta", "alpha beta", "gamma"];
        let scorer = EmbeddingScorer::from_parts(
            vec![Some(vec![1.0, 0.0]), Some(vec![1.0, 0.0]), None],
            TfIdfScorer::fit(&texts),
        );
        assert!((scorer.score(0, 1) - 1.0).abs() < 1e-9);
        assert_eq!(scorer.fallback_pairs(), 0);
        assert_eq!(scorer.score(0, 2), 0.0);
        assert_eq!(scorer.fallback_pairs(), 1);
        assert_eq!(scorer.missing_embeddings(), 1);
    }

    #[test]
    fn test_empty_input() {
        let matrix = MatrixBuilder::new().build(&IndexMap::new());
        assert!(matrix.is_empty());
        assert!(matrix.values().is_empty());
    }
}
