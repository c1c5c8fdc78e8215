//! Title canonicalization and fuzzy title similarity.
//!
//! Every heading comparison in the crate goes through [`normalize`] or
//! [`strip_numbering`], so matching stays agnostic to numbering, case,
//! whitespace runs and dash variants.

use once_cell::sync::Lazy;
use regex::Regex;

/// Leading section numbering: `3`, `3.1`, `3.1.2.`, repeated runs like `1 2`.
static NUMBERING_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+(?:\.\d+)*\.?\s*)+").expect("numbering regex"));

/// Characters treated as a plain `-`.
const HYPHENS: &[char] = &[
    '\u{2010}', // hyphen
    '\u{2011}', // non-breaking hyphen
    '\u{2012}', // figure dash
    '\u{2013}', // en dash
    '\u{2014}', // em dash
    '\u{2015}', // horizontal bar
    '\u{2043}', // hyphen bullet
    '\u{2212}', // minus sign
    '\u{FE58}', // small em dash
    '\u{FE63}', // small hyphen-minus
    '\u{FF0D}', // fullwidth hyphen-minus
];

/// Lowercase, unify dashes, collapse whitespace runs and trim.
pub fn normalize(title: &str) -> String {
    let unified: String = title
        .chars()
        .map(|c| if HYPHENS.contains(&c) { '-' } else { c })
        .collect::<String>()
        .to_lowercase();

    unified.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize`], then drop any leading numeric prefix.
///
/// `"3.1  Problem   Statement"` becomes `"problem statement"`.
pub fn strip_numbering(title: &str) -> String {
    let normalized = normalize(title);
    match NUMBERING_PREFIX.find(&normalized) {
        Some(m) => normalized[m.end()..].to_string(),
        None => normalized,
    }
}

/// A symmetric similarity over already-normalized titles, in `[0, 1]`.
///
/// Implementations must return `1.0` for identical input and `0.0` for
/// strings sharing nothing.
pub trait TitleSimilarity: Send + Sync {
    fn name(&self) -> &str;
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Edit-distance ratio: `1 - levenshtein / max_len`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedLevenshtein;

impl TitleSimilarity for NormalizedLevenshtein {
    fn name(&self) -> &str {
        "levenshtein"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }
}

/// Sørensen–Dice over character bigrams; more forgiving of word reordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct SorensenDice;

impl TitleSimilarity for SorensenDice {
    fn name(&self) -> &str {
        "sorensen_dice"
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        strsim::sorensen_dice(a, b)
    }
}

/// Resolve a metric by its configured name. Unknown names yield `None`.
pub fn similarity_by_name(name: &str) -> Option<std::sync::Arc<dyn TitleSimilarity>> {
    match name {
        "levenshtein" => Some(std::sync::Arc::new(NormalizedLevenshtein)),
        "sorensen_dice" | "dice" => Some(std::sync::Arc::new(SorensenDice)),
        _ => None,
    }
}

/// Best scoring candidate at or above `threshold`, first one wins on ties.
pub fn best_match<'a, I>(
    metric: &dyn TitleSimilarity,
    needle: &str,
    candidates: I,
    threshold: f64,
) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = metric.similarity(needle, candidate);
        if score < threshold {
            continue;
        }
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((idx, score)),
        }
    }
    best
}
