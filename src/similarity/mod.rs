//! Similarity analysis between document sections and figures.
//!
//! [`matrix::MatrixBuilder`] scores every compatible block pair (TF-IDF by
//! default, provider embeddings when configured), [`relations`] derives the
//! strong links and per-diagram related sections from the result.

pub mod category;
pub mod matrix;
pub mod relations;
pub mod tfidf;

pub use category::{classify, is_compatible, BlockCategory};
pub use matrix::{scale, EmbeddingScorer, MatrixBuilder, PairScorer, SimilarityMatrix, TfIdfScorer};
pub use relations::{diagram_summary, strong_pairs, DiagramRelations, RelatedSection, Relationship};
