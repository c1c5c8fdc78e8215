//! Citation analysis: reference-list parsing, IEEE-style format checks,
//! in-text citation lookup and best-effort online verification.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use tracing::{debug, info, warn};

use crate::normalize::normalize;
use crate::policy::CallPolicy;
use crate::provider::{LlmProvider, ProviderError};

/// Characters of surrounding text kept on each side of a citation.
const CONTEXT_CHARS: usize = 60;

/// Ranges like `[3-40]` are expanded only up to this many numbers.
const MAX_RANGE: u32 = 50;

const UNVERIFIED: &str = "unverified";

static REFERENCES_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\d+\.?\s+)?(?:references|bibliography|works cited)$").expect("references heading regex")
});

static APPENDIX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:\d+\.?\s+)?(?:appendix|appendices)\b").expect("appendix heading regex"));

static ENTRY_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d+)\]\s*").expect("entry marker regex"));

static CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+(?:\s*[,\-\u{2013}]\s*\d+)*)\]").expect("citation regex"));

static QUOTED_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["\u{201C}]([^"\u{201C}\u{201D}]{3,})["\u{201D}]"#).expect("quoted title regex"));

static AUTHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z]\.(?:\s*-?[A-Z]\.)*\s+[A-Z][A-Za-z'\-]+").expect("author regex")
});

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year regex"));

static VENUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:in|proc|proceedings|journal|conf|conference|symposium|workshop|vol|pp|press|publisher|available|online|doi|arxiv|ieee|acm|springer|trans|standard|rfc)\b|https?://",
    )
    .expect("venue regex")
});

// ============================================================================
// Types
// ============================================================================

/// One place in the body text where a reference is cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationOccurrence {
    pub context: String,
    /// Character (not byte) offset of the `[` in the document text.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub raw: String,
    /// `[n]` marker value; serialized as `-1` when the entry has none.
    #[serde(with = "reference_number")]
    pub number: Option<u32>,
    pub reformatted: String,
    pub format_valid: bool,
    pub format_issues: Vec<String>,
    pub citations: Vec<CitationOccurrence>,
    pub verified: bool,
    pub verification_source: String,
}

mod reference_number {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(n) => serializer.serialize_i64(i64::from(*n)),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let n = i64::deserialize(deserializer)?;
        Ok(u32::try_from(n).ok())
    }
}

/// Outcome of an online lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,
    pub source: String,
}

/// Looks a reference up in a bibliographic database.
#[async_trait::async_trait]
pub trait ReferenceVerifier: Send + Sync {
    fn name(&self) -> &str;
    async fn verify(&self, title: &str) -> Result<Verification, ProviderError>;
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse the reference list of `text` and attach in-text citations.
///
/// Returns nothing when no references heading is found.
pub fn analyze(text: &str) -> Vec<Reference> {
    let Some((body_end, section)) = references_section(text) else {
        debug!("No references section found");
        return Vec::new();
    };

    let citations = find_citations(&text[..body_end]);
    let references: Vec<Reference> = split_entries(section)
        .into_iter()
        .map(|(number, raw)| {
            let format_issues = format_issues(&raw, number.is_some());
            Reference {
                reformatted: raw.clone(),
                format_valid: format_issues.is_empty(),
                format_issues,
                citations: number
                    .and_then(|n| citations.get(&n).cloned())
                    .unwrap_or_default(),
                verified: false,
                verification_source: UNVERIFIED.to_string(),
                number,
                raw,
            }
        })
        .collect();

    info!(
        "Parsed {} references ({} cited in text)",
        references.len(),
        references.iter().filter(|r| !r.citations.is_empty()).count()
    );
    references
}

/// Byte offset where the references heading starts, and the section body.
fn references_section(text: &str) -> Option<(usize, &str)> {
    let mut heading: Option<(usize, usize)> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if REFERENCES_HEADING.is_match(line.trim()) {
            heading = Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    let (start, body_start) = heading?;

    let rest = &text[body_start..];
    let mut end = rest.len();
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if APPENDIX_HEADING.is_match(line.trim()) {
            end = offset;
            break;
        }
        offset += line.len();
    }
    Some((start, &rest[..end]))
}

/// Split a references section into `(number, text)` entries.
///
/// With `[n]` markers each marker opens an entry and following lines
/// continue it. Without markers, blank lines separate entries when present,
/// otherwise every line is its own entry.
fn split_entries(section: &str) -> Vec<(Option<u32>, String)> {
    let lines: Vec<&str> = section.lines().map(str::trim).collect();

    if lines.iter().any(|l| ENTRY_MARKER.is_match(l)) {
        let mut entries: Vec<(Option<u32>, String)> = Vec::new();
        for line in lines.iter().filter(|l| !l.is_empty()) {
            if let Some(caps) = ENTRY_MARKER.captures(line) {
                let number = caps[1].parse::<u32>().ok();
                entries.push((number, line.to_string()));
            } else if let Some((_, text)) = entries.last_mut() {
                text.push(' ');
                text.push_str(line);
            }
        }
        return entries;
    }

    let has_paragraphs = lines
        .iter()
        .skip_while(|l| l.is_empty())
        .any(|l| l.is_empty());
    if has_paragraphs {
        lines
            .split(|l| l.is_empty())
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| (None, chunk.join(" ")))
            .collect()
    } else {
        lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .map(|l| (None, l.to_string()))
            .collect()
    }
}

/// IEEE-style heuristics; empty means the entry looks well formed.
fn format_issues(raw: &str, has_number: bool) -> Vec<String> {
    let mut issues = Vec::new();
    let body = ENTRY_MARKER.replace(raw, "");

    if !has_number {
        issues.push("missing [n] reference number".to_string());
    }

    let title = QUOTED_TITLE.find(&body);
    let before_title = match title {
        Some(m) => &body[..m.start()],
        None => &body[..],
    };
    if !AUTHOR.is_match(before_title) {
        issues.push("no author list in \"A. Surname\" form before the title".to_string());
    }
    if title.is_none() {
        issues.push("title is not in quotation marks".to_string());
    }
    if !YEAR.is_match(&body) {
        issues.push("no publication year".to_string());
    }
    if !VENUE.is_match(&body) {
        issues.push("no venue, publisher or URL".to_string());
    }
    if body.chars().count() < 20 {
        issues.push("entry is too short to be a complete reference".to_string());
    }
    issues
}

/// Every `[n]`, `[n, m]` and `[n-m]` in `body`, grouped by reference number.
fn find_citations(body: &str) -> HashMap<u32, Vec<CitationOccurrence>> {
    let mut found: HashMap<u32, Vec<CitationOccurrence>> = HashMap::new();

    for caps in CITATION.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let occurrence = CitationOccurrence {
            context: context_around(body, whole.start(), whole.end()),
            offset: body[..whole.start()].chars().count(),
        };
        for n in citation_numbers(&caps[1]) {
            found.entry(n).or_default().push(occurrence.clone());
        }
    }
    found
}

fn citation_numbers(inner: &str) -> Vec<u32> {
    let mut numbers = Vec::new();
    for part in inner.split(',') {
        let bounds: Vec<u32> = part
            .split(['-', '\u{2013}'])
            .filter_map(|n| n.trim().parse().ok())
            .collect();
        match bounds.as_slice() {
            [single] => numbers.push(*single),
            [from, to] if from <= to && to - from <= MAX_RANGE => numbers.extend(*from..=*to),
            [from, to] => numbers.extend([*from, *to]),
            _ => {}
        }
    }
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

fn context_around(text: &str, start: usize, end: usize) -> String {
    let before: Vec<char> = text[..start].chars().rev().take(CONTEXT_CHARS).collect();
    let before: String = before.into_iter().rev().collect();
    let after: String = text[end..].chars().take(CONTEXT_CHARS).collect();
    format!("{}{}{}", before, &text[start..end], after)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best guess at the cited work's title: the quoted part, else the longest
/// comma-separated chunk after the marker.
pub fn title_guess(raw: &str) -> Option<String> {
    if let Some(caps) = QUOTED_TITLE.captures(raw) {
        return Some(caps[1].trim().trim_end_matches(',').to_string());
    }
    let body = ENTRY_MARKER.replace(raw, "");
    body.split(',')
        .map(str::trim)
        .filter(|chunk| chunk.split_whitespace().count() >= 3)
        .max_by_key(|chunk| chunk.len())
        .map(str::to_string)
}

// ============================================================================
// Collaborator steps
// ============================================================================

fn reformat_prompt(raw: &str) -> String {
    format!(
        "Rewrite the following bibliography entry in IEEE citation style. \
         Keep every fact, invent nothing, and reply with the single reformatted \
         entry only.\n\n{}",
        raw
    )
}

/// Reformat references through the LLM and verify them online.
///
/// Both steps are best-effort. Failures keep the raw text / unverified state
/// and are reported as notices.
pub async fn enrich(
    references: &mut [Reference],
    llm: Option<&dyn LlmProvider>,
    verifier: Option<&dyn ReferenceVerifier>,
    policy: &CallPolicy,
    notices: &mut Vec<String>,
) {
    if let Some(llm) = llm {
        let mut failed = 0;
        for reference in references.iter_mut() {
            let prompt = reformat_prompt(&reference.raw);
            match policy.call(llm.name(), || llm.complete(&prompt)).await {
                Ok(text) => reference.reformatted = text.trim().to_string(),
                Err(e) => {
                    warn!("Reformatting reference failed: {}", e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            notices.push(format!(
                "citation reformatting unavailable for {} of {} references",
                failed,
                references.len()
            ));
        }
    }

    if let Some(verifier) = verifier {
        let mut failed = 0;
        for reference in references.iter_mut() {
            let Some(title) = title_guess(&reference.raw) else {
                continue;
            };
            match policy.call(verifier.name(), || verifier.verify(&title)).await {
                Ok(outcome) => {
                    reference.verified = outcome.verified;
                    reference.verification_source = outcome.source;
                }
                Err(e) => {
                    warn!("Verifying \"{}\" failed: {}", title, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            notices.push(format!(
                "online verification via {} failed for {} references",
                verifier.name(),
                failed
            ));
        }
    }
}

// ============================================================================
// Crossref
// ============================================================================

const CROSSREF_URL: &str = "https://api.crossref.org/works";
const CROSSREF: &str = "crossref";

/// Titles at least this similar (after normalization) count as a match.
const TITLE_MATCH: f64 = 0.85;

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(default)]
    title: Vec<String>,
}

/// Verifier backed by the public Crossref works API.
pub struct CrossrefVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl CrossrefVerifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: CROSSREF_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

fn title_matches(wanted: &str, candidates: &[String]) -> bool {
    let wanted = normalize(wanted);
    candidates
        .iter()
        .any(|t| normalized_levenshtein(&wanted, &normalize(t)) >= TITLE_MATCH)
}

#[async_trait::async_trait]
impl ReferenceVerifier for CrossrefVerifier {
    fn name(&self) -> &str {
        CROSSREF
    }

    async fn verify(&self, title: &str) -> Result<Verification, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("query.bibliographic", title), ("rows", "3")])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(CROSSREF, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(CROSSREF, status, body));
        }

        let parsed: CrossrefResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            provider: CROSSREF.to_string(),
            detail: e.to_string(),
        })?;

        let titles: Vec<String> = parsed
            .message
            .items
            .into_iter()
            .flat_map(|item| item.title)
            .collect();
        let verified = title_matches(title, &titles);
        debug!("Crossref: \"{}\" verified={}", title, verified);

        Ok(Verification {
            verified,
            source: if verified { CROSSREF } else { UNVERIFIED }.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{RateLimiter, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    const DOC: &str = "\
1 Introduction
The system follows the layered style of [1] and the risk model in [2, 3].
Earlier tools [1-2] lacked validation.

11 References
[1] A. Smith and B. Jones, \"Layered architectures for document services,\" in Proc. IEEE ICSE, 2019, pp. 1-10.
[2] C. Lee, Risk analysis
 in practice, 2020.
[3] short
[4] D. Kim, \"Unused work,\" J. Softw. Eng., vol. 3, 2021.

12 Appendices
[9] not a reference
";

    fn quick_policy() -> CallPolicy {
        CallPolicy::new(
            Duration::from_secs(1),
            RetryPolicy::no_retry(),
            Arc::new(RateLimiter::unlimited()),
        )
    }

    #[test]
    fn test_entries_and_numbers() {
        let refs = analyze(DOC);
        let numbers: Vec<_> = refs.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(refs[1].raw, "[2] C. Lee, Risk analysis in practice, 2020.");
    }

    #[test]
    fn test_format_checks() {
        let refs = analyze(DOC);
        assert!(refs[0].format_valid, "{:?}", refs[0].format_issues);

        assert!(!refs[1].format_valid);
        assert!(refs[1]
            .format_issues
            .iter()
            .any(|i| i.contains("quotation marks")));

        assert!(refs[2]
            .format_issues
            .iter()
            .any(|i| i.contains("too short")));
    }

    #[test]
    fn test_citations_with_lists_and_ranges() {
        let refs = analyze(DOC);
        assert_eq!(refs[0].citations.len(), 2);
        assert_eq!(refs[1].citations.len(), 2);
        assert_eq!(refs[2].citations.len(), 1);
        assert!(refs[3].citations.is_empty());

        let first = &refs[0].citations[0];
        assert!(first.context.contains("layered style of [1]"));
        assert_eq!(DOC.chars().skip(first.offset).take(3).collect::<String>(), "[1]");
    }

    #[test]
    fn test_no_references_heading() {
        assert!(analyze("1 Introduction\nSee [1].\n").is_empty());
        assert!(analyze("").is_empty());
    }

    #[test]
    fn test_unnumbered_entries_use_sentinel() {
        let text = "References\nSmith, A study of things, 2001.\nJones, Another study, 2002.\n";
        let refs = analyze(text);
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.number.is_none()));
        assert!(refs[0].format_issues.iter().any(|i| i.contains("[n]")));

        let json = serde_json::to_value(&refs[0]).unwrap();
        assert_eq!(json["number"], -1);
    }

    #[test]
    fn test_paragraph_entries() {
        let text = "Bibliography\nSmith, A study\nof things, 2001.\n\nJones, Another, 2002.\n";
        let refs = analyze(text);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].raw, "Smith, A study of things, 2001.");
    }

    #[test]
    fn test_citation_numbers() {
        assert_eq!(citation_numbers("1"), vec![1]);
        assert_eq!(citation_numbers("2, 3"), vec![2, 3]);
        assert_eq!(citation_numbers("4\u{2013}6"), vec![4, 5, 6]);
        assert_eq!(citation_numbers("1-1000"), vec![1, 1000]);
    }

    #[test]
    fn test_title_guess() {
        assert_eq!(
            title_guess("[1] A. Smith, \u{201C}Layered things,\u{201D} 2019.").as_deref(),
            Some("Layered things")
        );
        assert_eq!(
            title_guess("[2] C. Lee, Risk analysis in practice, 2020.").as_deref(),
            Some("Risk analysis in practice")
        );
        assert_eq!(title_guess("[3] x"), None);
    }

    #[test]
    fn test_title_matches_ignores_case() {
        let titles = vec!["Layered Architectures for Document Services".to_string()];
        assert!(title_matches("layered architectures for document services", &titles));
        assert!(!title_matches("Something else entirely", &titles));
    }

    struct EchoLlm;

    #[async_trait::async_trait]
    impl LlmProvider for EchoLlm {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            if prompt.contains("short") {
                return Err(ProviderError::Invalid {
                    provider: "echo".into(),
                    detail: "refused".into(),
                });
            }
            Ok("  formatted  ".to_string())
        }
    }

    struct AlwaysFound;

    #[async_trait::async_trait]
    impl ReferenceVerifier for AlwaysFound {
        fn name(&self) -> &str {
            "stub"
        }

        async fn verify(&self, _title: &str) -> Result<Verification, ProviderError> {
            Ok(Verification {
                verified: true,
                source: "stub".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_enrich_is_best_effort() {
        let mut refs = analyze(DOC);
        let mut notices = Vec::new();
        enrich(&mut refs, Some(&EchoLlm), Some(&AlwaysFound), &quick_policy(), &mut notices).await;

        assert_eq!(refs[0].reformatted, "formatted");
        assert_eq!(refs[2].reformatted, refs[2].raw);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("1 of 4"));

        assert!(refs[0].verified);
        assert_eq!(refs[0].verification_source, "stub");
        // "[3] short" has no usable title
        assert!(!refs[2].verified);
        assert_eq!(refs[2].verification_source, "unverified");
    }
}
