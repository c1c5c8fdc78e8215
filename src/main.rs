//! SRS Validator - document structure validation server.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use srs_validator::config::ServiceConfig;
use srs_validator::{
    AnalysisError, AnalysisReport, AnalysisRequest, Analyzer, Collaborators, DocumentInput,
    ErrorKind, Template, TemplateRegistry,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TEMPLATE: &str = "SRS";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    analyzer: Arc<Analyzer>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "srs_validator=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;

    // Built-in outlines plus any JSON files in TEMPLATE_DIR
    let registry = TemplateRegistry::load_with_dir(&config.template_dir)
        .with_context(|| format!("Failed to load templates from {:?}", config.template_dir))?;
    info!("Loaded {} templates: {:?}", registry.names().len(), registry.names());

    let collaborators = Collaborators::from_config(&config, reqwest::Client::new())?;
    let analyzer = Analyzer::from_config(&config, Arc::new(registry), collaborators)?;

    let state = AppState {
        analyzer: Arc::new(analyzer),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/templates", get(list_templates))
        .route("/templates/:name", get(get_template))
        .route("/validate", post(validate_upload))
        .route("/validate/text", post(validate_text))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

/// `AnalysisError` rendered as `{ "kind": ..., "message": ... }`.
struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::UnknownTemplate => StatusCode::NOT_FOUND,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::ExtractionError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError(AnalysisError::InvalidRequest(message.into()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available templates.
async fn list_templates(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.analyzer.registry().names())
}

/// Get a template outline.
async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Template>, ApiError> {
    let template = state.analyzer.registry().get(&name)?;
    Ok(Json(template.as_ref().clone()))
}

#[derive(Deserialize)]
struct ValidateQuery {
    template: Option<String>,
    #[serde(default)]
    content_analysis: bool,
    #[serde(default)]
    references: bool,
    #[serde(default)]
    figures: bool,
}

/// Upload a document (PDF or plain text) and validate it.
async fn validate_upload(
    State(state): State<AppState>,
    Query(query): Query<ValidateQuery>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisReport>, ApiError> {
    // Read the uploaded file
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| invalid(format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err(invalid("No file uploaded"));
    }

    let template = query.template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
    info!("Received file: {} ({} bytes) for template: {}", filename, file_data.len(), template);

    let request = AnalysisRequest {
        template,
        document: DocumentInput::File {
            filename,
            data: file_data,
        },
        content_analysis: query.content_analysis,
        references: query.references,
        figures: query.figures,
    };

    let report = state.analyzer.analyze(request).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct TextRequest {
    template: Option<String>,
    text: String,
    #[serde(default)]
    content_analysis: bool,
    #[serde(default)]
    references: bool,
}

/// Validate already-extracted text.
async fn validate_text(
    State(state): State<AppState>,
    Json(body): Json<TextRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    let template = body.template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
    info!("Received {} chars of text for template: {}", body.text.len(), template);

    let request = AnalysisRequest {
        content_analysis: body.content_analysis,
        references: body.references,
        ..AnalysisRequest::text(template, body.text)
    };

    let report = state.analyzer.analyze(request).await?;
    Ok(Json(report))
}
