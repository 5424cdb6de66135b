//! Text encoder behind an opaque trait.
//!
//! The production implementation wraps fastembed (feature `semantic`,
//! enabled by default). The model identifier must come from a compile-time
//! allowlist unless `CONTEXT_ENGINE_ALLOW_CUSTOM_MODELS` opts out, and the
//! model itself is loaded lazily on first use behind a mutex so concurrent
//! cold starts initialize exactly once.

use crate::error::{EngineError, Result};
#[cfg(feature = "semantic")]
use crate::types::{EMBEDDING_BATCH, MAX_EMBED_INPUT_CHARS};

/// Vetted embedding models. Everything else needs the explicit override.
pub const ALLOWED_EMBEDDING_MODELS: &[&str] = &[
    "BAAI/bge-small-en-v1.5",
    "BAAI/bge-base-en-v1.5",
    "BAAI/bge-large-en-v1.5",
    "sentence-transformers/all-MiniLM-L6-v2",
    "sentence-transformers/all-MiniLM-L12-v2",
];

/// Opaque text-to-vector interface.
///
/// `encode` returns one L2-normalized row per input text. Implementations
/// must be safe to share across threads.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
    /// Identifier recorded as `embedding_model` in project metadata.
    fn identifier(&self) -> &str;
}

/// Truncate to a character budget without splitting a UTF-8 boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// fastembed-backed encoder
// ---------------------------------------------------------------------------

#[cfg(feature = "semantic")]
mod fastembed_impl {
    use super::*;
    use crate::config::allow_custom_models;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Mutex, OnceLock};
    use tracing::{info, warn};

    fn allowlisted_model(name: &str) -> Option<(EmbeddingModel, usize)> {
        match name {
            "BAAI/bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
            "BAAI/bge-base-en-v1.5" => Some((EmbeddingModel::BGEBaseENV15, 768)),
            "BAAI/bge-large-en-v1.5" => Some((EmbeddingModel::BGELargeENV15, 1024)),
            "sentence-transformers/all-MiniLM-L6-v2" => {
                Some((EmbeddingModel::AllMiniLML6V2, 384))
            }
            "sentence-transformers/all-MiniLM-L12-v2" => {
                Some((EmbeddingModel::AllMiniLML12V2, 384))
            }
            _ => None,
        }
    }

    pub struct FastembedEncoder {
        model_name: String,
        dimension: usize,
        init_lock: Mutex<()>,
        model: OnceLock<TextEmbedding>,
    }

    impl FastembedEncoder {
        /// `fallback_dimension` is used for custom models whose dimensionality
        /// is not known from the allowlist table.
        pub fn new(model_name: &str, fallback_dimension: usize) -> Self {
            let dimension = allowlisted_model(model_name)
                .map(|(_, dim)| dim)
                .unwrap_or(fallback_dimension);
            Self {
                model_name: model_name.to_string(),
                dimension,
                init_lock: Mutex::new(()),
                model: OnceLock::new(),
            }
        }

        fn resolve(&self) -> Result<EmbeddingModel> {
            if let Some((model, _)) = allowlisted_model(&self.model_name) {
                return Ok(model);
            }
            if !allow_custom_models() {
                return Err(EngineError::ModelNotAllowed {
                    model: self.model_name.clone(),
                    allowed: ALLOWED_EMBEDDING_MODELS.to_vec(),
                });
            }
            warn!(
                model = self.model_name.as_str(),
                "Embedding model allowlist bypassed via CONTEXT_ENGINE_ALLOW_CUSTOM_MODELS; \
                 model not verified for safety"
            );
            TextEmbedding::list_supported_models()
                .into_iter()
                .find(|info| info.model_code == self.model_name)
                .map(|info| info.model)
                .ok_or_else(|| {
                    EngineError::Encoder(format!(
                        "model '{}' is not supported by the embedding runtime",
                        self.model_name
                    ))
                })
        }

        /// Lazy double-checked load. The lock only guards initialization;
        /// afterwards the model is shared read-only.
        fn model(&self) -> Result<&TextEmbedding> {
            if let Some(model) = self.model.get() {
                return Ok(model);
            }
            let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(model) = self.model.get() {
                return Ok(model);
            }

            let resolved = self.resolve()?;
            info!(
                model = self.model_name.as_str(),
                "Loading embedding model (this may take a moment on first use)"
            );
            let loaded =
                TextEmbedding::try_new(InitOptions::new(resolved).with_show_download_progress(false))
                    .map_err(|e| EngineError::Encoder(e.to_string()))?;
            info!(model = self.model_name.as_str(), "Embedding model loaded");

            let _ = self.model.set(loaded);
            Ok(self.model.get().expect("model was just set"))
        }
    }

    impl TextEncoder for FastembedEncoder {
        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.model()?;

            let mut rows = Vec::with_capacity(texts.len());
            for batch in texts.chunks(EMBEDDING_BATCH) {
                let inputs: Vec<&str> =
                    batch.iter().map(|t| truncate_chars(t, MAX_EMBED_INPUT_CHARS)).collect();
                let embeddings = model
                    .embed(inputs, None)
                    .map_err(|e| EngineError::Encoder(e.to_string()))?;
                for mut row in embeddings {
                    l2_normalize(&mut row);
                    rows.push(row);
                }
            }
            Ok(rows)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn identifier(&self) -> &str {
            &self.model_name
        }
    }
}

#[cfg(feature = "semantic")]
pub use fastembed_impl::FastembedEncoder;

// ---------------------------------------------------------------------------
// No-op encoder for builds without the semantic feature
// ---------------------------------------------------------------------------

/// Placeholder encoder when semantic search is compiled out. Indexing
/// proceeds without a dense matrix and queries run sparse-only.
pub struct DisabledEncoder {
    model_name: String,
    dimension: usize,
}

impl DisabledEncoder {
    pub fn new(model_name: &str, dimension: usize) -> Self {
        Self { model_name: model_name.to_string(), dimension }
    }
}

impl TextEncoder for DisabledEncoder {
    fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(EngineError::EncoderUnavailable(
            "this binary was built without the `semantic` feature".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn identifier(&self) -> &str {
        &self.model_name
    }
}

/// Build the process-wide encoder from configuration.
pub fn create_encoder(config: &crate::config::EngineConfig) -> std::sync::Arc<dyn TextEncoder> {
    #[cfg(feature = "semantic")]
    {
        std::sync::Arc::new(FastembedEncoder::new(
            &config.embedding_model,
            config.embedding_dimensions,
        ))
    }
    #[cfg(not(feature = "semantic"))]
    {
        tracing::warn!(
            "Semantic search disabled at compile time, queries will use sparse scores only"
        );
        std::sync::Arc::new(DisabledEncoder::new(
            &config.embedding_model,
            config.embedding_dimensions,
        ))
    }
}
