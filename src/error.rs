//! Request-level error taxonomy.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractionError;
use crate::provider::ProviderError;

/// Stable, serializable error kind reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTemplate,
    ExtractionError,
    ProviderError,
    DeadlineExceeded,
    InvalidRequest,
    Internal,
}

/// Everything that can fail a single analysis request.
///
/// Local computation (segmentation, validation, TF-IDF) never produces one
/// of these; a document without recognizable sections is a valid result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unknown template '{name}' (available: {available:?})")]
    UnknownTemplate {
        name: String,
        available: Vec<String>,
    },
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("request exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTemplate { .. } => ErrorKind::UnknownTemplate,
            Self::Extraction(_) => ErrorKind::ExtractionError,
            Self::Provider(_) => ErrorKind::ProviderError,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// JSON body shown to clients: kind plus message, nothing internal.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}
