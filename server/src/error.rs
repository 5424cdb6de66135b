//! Crate-wide error type.
//!
//! Per-file parse failures never become `EngineError` values: parsers swallow
//! them and return empty chunk lists. Everything that crosses a component
//! boundary (storage, encoder, indexing, query routing) is an `EngineError`.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("matrix serialization error: {0}")]
    Matrix(#[from] bincode::Error),

    #[error("invalid project_id: must be hex characters only, got {0:?}")]
    InvalidProjectId(String),

    #[error("path traversal detected for {0}")]
    PathTraversal(PathBuf),

    #[error("project {0} not found in storage")]
    ProjectNotFound(String),

    #[error("embedding model '{model}' is not in the allowed list: {allowed:?}")]
    ModelNotAllowed { model: String, allowed: Vec<&'static str> },

    #[error("encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("encoder failure: {0}")]
    Encoder(String),
}
