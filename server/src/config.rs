//! Runtime configuration resolved from environment variables, with CLI
//! overrides applied in `main.rs`.
//!
//! Recognized variables:
//! - `CONTEXT_ENGINE_EMBEDDING_MODEL`: encoder identifier (subject to the allowlist)
//! - `CONTEXT_ENGINE_EMBEDDING_DIMENSIONS`: positive integer, falls back to 384
//! - `CONTEXT_ENGINE_SEMANTIC_WEIGHT`: float clamped to [0, 1], default 0.6
//! - `CONTEXT_ENGINE_INDEX_PATH`: storage base path override
//! - `CONTEXT_ENGINE_ALLOW_CUSTOM_MODELS`: `true`/`1` bypasses the allowlist
//! - `CONTEXT_ENGINE_LOG_LEVEL`: standard level name, read in `main.rs`

use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-small-en-v1.5";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    /// Weight of the dense score in fusion; sparse gets `1 - weight`.
    pub semantic_weight: f32,
    /// Storage base override. `None` means `~/.context-engine/indexes/`.
    pub index_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            index_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let embedding_model = std::env::var("CONTEXT_ENGINE_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string());

        let embedding_dimensions = match std::env::var("CONTEXT_ENGINE_EMBEDDING_DIMENSIONS") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(
                        value = raw.as_str(),
                        "Invalid CONTEXT_ENGINE_EMBEDDING_DIMENSIONS, using default 384"
                    );
                    DEFAULT_EMBEDDING_DIMENSIONS
                }
            },
            Err(_) => DEFAULT_EMBEDDING_DIMENSIONS,
        };

        let semantic_weight = match std::env::var("CONTEXT_ENGINE_SEMANTIC_WEIGHT") {
            Ok(raw) => match raw.parse::<f32>() {
                Ok(w) if w.is_finite() => w.clamp(0.0, 1.0),
                _ => {
                    warn!(
                        value = raw.as_str(),
                        "Invalid CONTEXT_ENGINE_SEMANTIC_WEIGHT, using default 0.6"
                    );
                    DEFAULT_SEMANTIC_WEIGHT
                }
            },
            Err(_) => DEFAULT_SEMANTIC_WEIGHT,
        };

        let index_path = std::env::var("CONTEXT_ENGINE_INDEX_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Self { embedding_model, embedding_dimensions, semantic_weight, index_path }
    }
}

/// True when `CONTEXT_ENGINE_ALLOW_CUSTOM_MODELS` opts out of the encoder
/// allowlist. Checked at model load time, not at startup.
pub fn allow_custom_models() -> bool {
    std::env::var("CONTEXT_ENGINE_ALLOW_CUSTOM_MODELS")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(false)
}
