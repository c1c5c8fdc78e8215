//! SRS Validator - template-driven structure validation for software
//! requirement and design documents.
//!
//! Documents are segmented into sections, reconciled against a canonical
//! outline ([`template`]), and optionally analyzed for section similarity
//! and citation quality.

pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod ocr;
pub mod openrouter;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod references;
pub mod schema;
pub mod segmenter;
pub mod similarity;
pub mod template;
pub mod validator;

pub use error::{AnalysisError, ErrorKind};
pub use pipeline::{AnalysisRequest, Analyzer, Collaborators, DocumentInput};
pub use schema::AnalysisReport;
pub use segmenter::{ParsedDocument, Segmenter, SegmenterOptions, SubsectionScope};
pub use template::{Template, TemplateRegistry};
pub use validator::{validate, ValidationResult};
