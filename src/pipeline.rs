//! End-to-end analysis of one document.
//!
//! Extraction → segmentation → validation, then the optional content
//! analysis (similarity matrix, relationships, figure OCR) and citation
//! analysis. Optional steps degrade into `notices`; only the named
//! [`AnalysisError`] kinds fail a request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::AnalysisError;
use crate::extract::{decode_plain_text, DocumentExtractor, LopdfExtractor};
use crate::ocr::docling::DoclingProvider;
use crate::ocr::mistral::MistralOcrProvider;
use crate::ocr::{FigureText, OcrInput, OcrProvider, OcrProviderKind};
use crate::openrouter::OpenRouterClient;
use crate::policy::{CallPolicy, RateLimiter, RetryPolicy};
use crate::provider::{EmbeddingProvider, LlmProvider};
use crate::references::{self, CrossrefVerifier, ReferenceVerifier};
use crate::schema::{project, AnalysisReport, ContentAnalysis};
use crate::segmenter::{Segmenter, SegmenterOptions};
use crate::similarity::relations::explain;
use crate::similarity::{
    diagram_summary, strong_pairs, EmbeddingScorer, MatrixBuilder, SimilarityMatrix,
};
use crate::template::{Template, TemplateRegistry};
use crate::validator::validate;

/// At most this many relationships get an LLM explanation per request.
const EXPLAIN_LIMIT: usize = 12;

/// The uploaded or pasted document.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    Text(String),
    File { filename: String, data: Vec<u8> },
}

impl DocumentInput {
    fn filename(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::File { filename, .. } => Some(filename),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub template: String,
    pub document: DocumentInput,
    pub content_analysis: bool,
    pub references: bool,
    /// OCR embedded figures into extra similarity blocks (PDF uploads only).
    pub figures: bool,
}

impl AnalysisRequest {
    pub fn text(template: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            document: DocumentInput::Text(text.into()),
            content_analysis: false,
            references: false,
            figures: false,
        }
    }
}

/// External services the pipeline may call. Everything but the extractor
/// is optional.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn DocumentExtractor>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub ocr: Option<Arc<dyn OcrProvider>>,
    pub verifier: Option<Arc<dyn ReferenceVerifier>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            extractor: Arc::new(LopdfExtractor),
            llm: None,
            embedder: None,
            ocr: None,
            verifier: None,
        }
    }
}

impl Collaborators {
    /// Wire up whichever providers the configuration enables.
    pub fn from_config(config: &ServiceConfig, client: reqwest::Client) -> anyhow::Result<Self> {
        let mut collaborators = Self::default();

        if let Some(api_key) = &config.openrouter_api_key {
            let mut openrouter = OpenRouterClient::new(client.clone(), api_key.clone())
                .with_model(config.openrouter_model.clone());
            if let Some(model) = &config.embedding_model {
                openrouter = openrouter.with_embedding_model(model.clone());
            }
            if let Some(url) = &config.openrouter_base_url {
                openrouter = openrouter.with_base_url(url.clone());
            }
            let openrouter = Arc::new(openrouter);
            info!(
                "OpenRouter enabled (model={}, embeddings={:?})",
                config.openrouter_model,
                openrouter.embedding_model()
            );
            if openrouter.embedding_model().is_some() {
                collaborators.embedder = Some(openrouter.clone());
            }
            collaborators.llm = Some(openrouter);
        }

        let ocr: Option<Arc<dyn OcrProvider>> = match config.ocr_provider {
            Some(OcrProviderKind::Docling) => Some(Arc::new(DoclingProvider::new(client.clone()))),
            Some(OcrProviderKind::MistralOcr) => {
                Some(Arc::new(MistralOcrProvider::from_env(client.clone())?))
            }
            None => None,
        };
        if let Some(ocr) = &ocr {
            info!("OCR provider: {}", ocr.name());
        }
        collaborators.ocr = ocr;

        if config.verify_references {
            collaborators.verifier = Some(Arc::new(CrossrefVerifier::new(client)));
            info!("Reference verification via Crossref enabled");
        }

        Ok(collaborators)
    }
}

/// Request orchestrator. Cheap to share behind an `Arc`.
pub struct Analyzer {
    registry: Arc<TemplateRegistry>,
    options: SegmenterOptions,
    matrix: MatrixBuilder,
    policy: CallPolicy,
    collaborators: Collaborators,
    deadline: Duration,
    scratch_dir: PathBuf,
}

impl Analyzer {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self {
            registry,
            options: SegmenterOptions::default(),
            matrix: MatrixBuilder::new(),
            policy: default_policy(),
            collaborators: Collaborators::default(),
            deadline: Duration::from_secs(120),
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn from_config(
        config: &ServiceConfig,
        registry: Arc<TemplateRegistry>,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let matrix = MatrixBuilder::new().with_workers(config.similarity_workers)?;
        Ok(Self::new(registry)
            .with_options(config.segmenter_options())
            .with_matrix_builder(matrix)
            .with_policy(config.call_policy())
            .with_collaborators(collaborators)
            .with_deadline(config.request_deadline)
            .with_scratch_dir(config.scratch_dir.clone()))
    }

    pub fn with_options(mut self, options: SegmenterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_matrix_builder(mut self, matrix: MatrixBuilder) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Parent directory for extracted figure images.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Run one request under the overall deadline.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        match tokio::time::timeout(self.deadline, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Analysis exceeded deadline of {:?}", self.deadline);
                Err(AnalysisError::DeadlineExceeded(self.deadline))
            }
        }
    }

    async fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        let template = self.registry.get(&request.template)?;
        let source_file = request.document.filename().map(str::to_string);

        info!(
            "Starting analysis: template={} source={:?} content_analysis={} references={} figures={}",
            template.name,
            source_file,
            request.content_analysis,
            request.references,
            request.figures
        );

        let (text, pdf) = self.extract_text(request.document).await?;

        let segmenter = Segmenter::new(&template, self.options.clone());
        let parsed = segmenter.segment(text.lines());
        let validation = validate(&parsed, &template);
        info!(
            "Validation: {} matching, {} missing, {} misplaced, {} extra sections, order_correct={}",
            validation.matching_sections.len(),
            validation.missing_sections.len(),
            validation.misplaced_sections.len(),
            validation.extra_sections.len(),
            validation.order_validation.is_correct
        );

        let mut report = AnalysisReport::new(template.name.clone(), &text, validation);
        report.source_file = source_file;
        report.document = project(&parsed);

        if request.content_analysis {
            let mut blocks = segmenter.segment_for_content_analysis(text.lines());

            if request.figures {
                match &pdf {
                    Some(data) => {
                        let figures = self.figures(data.clone(), &template, &mut report.notices).await?;
                        for (n, figure) in figures.into_iter().enumerate() {
                            let name = format!("Figure {} ({}) diagram", n + 1, figure.section);
                            blocks.insert(name, figure.text);
                        }
                    }
                    None => report
                        .notices
                        .push("figure analysis requires a PDF upload; skipped".to_string()),
                }
            }

            let analysis = self.content_analysis(blocks, &mut report.notices).await?;
            report.content_analysis = Some(analysis);
        } else if request.figures {
            report
                .notices
                .push("figure analysis only runs with content analysis; skipped".to_string());
        }

        if request.references {
            let mut refs = references::analyze(&text);
            references::enrich(
                &mut refs,
                self.collaborators.llm.as_deref(),
                self.collaborators.verifier.as_deref(),
                &self.policy,
                &mut report.notices,
            )
            .await;
            report.references = Some(refs);
        }

        info!("Analysis complete: {} ({} notices)", report.id, report.notices.len());
        Ok(report)
    }

    /// Document text, plus the raw bytes when the upload is a PDF.
    async fn extract_text(
        &self,
        document: DocumentInput,
    ) -> Result<(String, Option<Arc<Vec<u8>>>), AnalysisError> {
        match document {
            DocumentInput::Text(text) => Ok((text, None)),
            DocumentInput::File { filename, data } if filename.to_lowercase().ends_with(".pdf") => {
                let data = Arc::new(data);
                let extractor = self.collaborators.extractor.clone();
                let bytes = data.clone();
                let text = tokio::task::spawn_blocking(move || extractor.extract_text(&bytes))
                    .await
                    .map_err(join_error)??;
                Ok((text, Some(data)))
            }
            DocumentInput::File { data, .. } => Ok((decode_plain_text(&data)?, None)),
        }
    }

    async fn content_analysis(
        &self,
        blocks: IndexMap<String, String>,
        notices: &mut Vec<String>,
    ) -> Result<ContentAnalysis, AnalysisError> {
        let (matrix, blocks) = self.similarity_matrix(blocks, notices).await?;

        let mut relationships = strong_pairs(&matrix);
        if let Some(llm) = self.collaborators.llm.as_deref() {
            let failures = explain(&mut relationships, &blocks, llm, &self.policy, EXPLAIN_LIMIT).await;
            if failures > 0 {
                notices.push(format!(
                    "relationship explanations unavailable for {} pairs",
                    failures
                ));
            }
        }
        let summary = diagram_summary(&matrix);

        info!(
            "Content analysis: {} blocks, {} relationships, {} diagrams, method={}",
            matrix.len(),
            relationships.len(),
            summary.len(),
            matrix.method()
        );
        Ok(ContentAnalysis::new(matrix, relationships, summary))
    }

    /// Build the matrix off the async runtime; embeddings when available.
    async fn similarity_matrix(
        &self,
        blocks: IndexMap<String, String>,
        notices: &mut Vec<String>,
    ) -> Result<(SimilarityMatrix, IndexMap<String, String>), AnalysisError> {
        let builder = self.matrix.clone();

        if let Some(embedder) = self.collaborators.embedder.as_deref() {
            let texts: Vec<&str> = blocks.values().map(String::as_str).collect();
            let scorer = EmbeddingScorer::prepare(&texts, embedder, &self.policy).await;
            let missing = scorer.missing_embeddings();

            if missing < blocks.len() {
                let names: Vec<String> = blocks.keys().cloned().collect();
                let (matrix, fallback_pairs) = tokio::task::spawn_blocking(move || {
                    let matrix = builder.build_with(names, &scorer);
                    (matrix, scorer.fallback_pairs())
                })
                .await
                .map_err(join_error)?;
                if fallback_pairs > 0 {
                    notices.push(format!(
                        "embeddings unavailable for {} blocks, used tf-idf for {} pairs",
                        missing, fallback_pairs
                    ));
                }
                return Ok((matrix, blocks));
            }

            if !blocks.is_empty() {
                notices.push("embedding provider unavailable, used tf-idf for all pairs".to_string());
            }
        }

        tokio::task::spawn_blocking(move || {
            let matrix = builder.build(&blocks);
            (matrix, blocks)
        })
        .await
        .map_err(join_error)
    }

    /// OCR every embedded image; failures drop that figure with a notice.
    async fn figures(
        &self,
        pdf: Arc<Vec<u8>>,
        template: &Template,
        notices: &mut Vec<String>,
    ) -> Result<Vec<FigureText>, AnalysisError> {
        let Some(ocr) = self.collaborators.ocr.as_deref() else {
            notices.push("no OCR provider configured; figures skipped".to_string());
            return Ok(Vec::new());
        };

        let hints: Vec<String> = template.section_titles().map(str::to_string).collect();
        // Removed on drop, including when the request deadline cancels us.
        let scratch = tempfile::Builder::new()
            .prefix("srs-figures-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| AnalysisError::Internal(format!("could not create figure directory: {}", e)))?;
        let extractor = self.collaborators.extractor.clone();
        // The blocking task owns the directory while it writes into it.
        let (_scratch, extracted) = tokio::task::spawn_blocking(move || {
            let extracted = extractor.extract_images(&pdf, &hints, scratch.path());
            (scratch, extracted)
        })
        .await
        .map_err(join_error)?;

        let images = match extracted {
            Ok(images) => images,
            Err(e) => {
                warn!("Image extraction failed: {}", e);
                notices.push(format!("figure extraction failed: {}", e));
                return Ok(Vec::new());
            }
        };

        let mut figures = Vec::new();
        let mut failed = 0;
        for image in images {
            let input = match OcrInput::from_path(&image.path) {
                Ok(input) => input,
                Err(e) => {
                    warn!("Reading {:?} failed: {}", image.path, e);
                    failed += 1;
                    continue;
                }
            };
            match self.policy.call(ocr.name(), || ocr.recognize(&input)).await {
                Ok(result) if !result.text.trim().is_empty() => {
                    debug!(
                        "OCR {} ({}): {} chars, confidence {:.2}",
                        input.filename,
                        image.section,
                        result.text.len(),
                        result.confidence
                    );
                    figures.push(FigureText {
                        section: image.section,
                        path: image.path,
                        text: result.text,
                    });
                }
                Ok(_) => debug!("OCR found no text in {}", input.filename),
                Err(e) => {
                    warn!("OCR failed for {}: {}", input.filename, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            notices.push(format!("OCR failed for {} figures; they were dropped", failed));
        }
        info!("Recognized text in {} figures", figures.len());
        Ok(figures)
    }
}

/// Policy for analyzers built without a [`ServiceConfig`].
fn default_policy() -> CallPolicy {
    CallPolicy::new(
        Duration::from_secs(30),
        RetryPolicy::default(),
        Arc::new(RateLimiter::unlimited()),
    )
}

fn join_error(e: JoinError) -> AnalysisError {
    AnalysisError::Internal(format!("worker task failed: {}", e))
}
