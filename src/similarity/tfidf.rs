//! TF-IDF vector space model with cosine similarity.
//!
//! Smoothed IDF `ln((1 + n) / (1 + df)) + 1` and L2-normalized rows, so the
//! cosine of two rows is their dot product.

use std::collections::{HashMap, HashSet};

/// Common English words that carry no topical signal.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be",
    "been", "being", "between", "both", "but", "by", "can", "could", "did", "do", "does",
    "each", "for", "from", "had", "has", "have", "he", "her", "his", "how", "if", "in",
    "into", "is", "it", "its", "may", "more", "most", "must", "no", "not", "of", "on",
    "one", "only", "or", "other", "our", "shall", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "under", "up", "us", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Lowercased alphanumeric tokens of two or more characters, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOPWORDS.iter().copied().collect();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !stop.contains(t.as_str()))
        .collect()
}

/// Fitted model: one sparse, unit-length vector per input document.
#[derive(Debug, Clone, Default)]
pub struct TfIdfModel {
    rows: Vec<HashMap<usize, f64>>,
}

impl TfIdfModel {
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d.as_ref())).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: Vec<usize> = Vec::new();
        for tokens in &tokenized {
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                let next_id = vocabulary.len();
                let id = *vocabulary.entry(token.clone()).or_insert(next_id);
                if id == doc_freq.len() {
                    doc_freq.push(0);
                }
                doc_freq[id] += 1;
            }
        }

        let n = documents.len() as f64;
        let idf: Vec<f64> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let rows = tokenized
            .iter()
            .map(|tokens| {
                let mut counts: HashMap<usize, f64> = HashMap::new();
                for token in tokens {
                    if let Some(&id) = vocabulary.get(token) {
                        *counts.entry(id).or_insert(0.0) += 1.0;
                    }
                }
                for (id, weight) in counts.iter_mut() {
                    *weight *= idf[*id];
                }
                let norm = counts.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for weight in counts.values_mut() {
                        *weight /= norm;
                    }
                }
                counts
            })
            .collect();

        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cosine similarity of documents `i` and `j`, in `[0, 1]`.
    ///
    /// Zero when either document has no usable tokens or an index is out of range.
    pub fn cosine(&self, i: usize, j: usize) -> f64 {
        let (Some(a), Some(b)) = (self.rows.get(i), self.rows.get(j)) else {
            return 0.0;
        };
        let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        let dot: f64 = small
            .iter()
            .filter_map(|(id, w)| large.get(id).map(|v| w * v))
            .sum();
        dot.clamp(0.0, 1.0)
    }
}

/// Cosine similarity of two dense vectors, clamped to `[0, 1]`.
pub fn dense_cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The system SHALL log in users, via OAuth2."),
            vec!["system", "log", "users", "via", "oauth2"]
        );
        assert!(tokenize("a I . ,").is_empty());
    }

    #[test]
    fn test_identical_documents_score_one() {
        let text = "users upload documents for structure validation";
        let model = TfIdfModel::fit(&[text, text]);
        assert!((model.cosine(0, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_and_partial() {
        let model = TfIdfModel::fit(&[
            "database schema tables",
            "login screen buttons",
            "database tables indexes",
        ]);
        assert_eq!(model.cosine(0, 1), 0.0);
        let partial = model.cosine(0, 2);
        assert!(partial > 0.0 && partial < 1.0);
        assert!((model.cosine(0, 2) - model.cosine(2, 0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_inputs() {
        let model = TfIdfModel::fit(&["", "text here"]);
        assert_eq!(model.cosine(0, 1), 0.0);
        assert_eq!(model.cosine(0, 9), 0.0);
        assert!(TfIdfModel::fit::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_dense_cosine() {
        assert!((dense_cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-9);
        assert_eq!(dense_cosine(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(dense_cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
