//! Top-level index build pipeline.
//!
//! Walks the project tree, routes files to parsers, truncates oversized
//! chunks, hashes file bytes for change detection, encodes chunk texts into
//! the dense matrix, tokenizes the sparse corpus, and persists every blob
//! in a fixed order (embeddings, sparse, chunks, manifest, metadata last)
//! so a reader that sees metadata can rely on the companions being complete.

use crate::encoder::{truncate_chars, TextEncoder};
use crate::error::{EngineError, Result};
use crate::ignore_rules::IgnoreRules;
use crate::parsers::{default_parsers, parser_for, Parser};
use crate::sparse::tokenize;
use crate::storage::Storage;
use crate::types::{
    Chunk, EmbeddingMatrix, FileMetadata, IndexMode, ProjectIndex, SparsePayload,
    MAX_CHUNK_CHARS, MAX_TOTAL_CHUNKS,
};
use crate::walker::discover_files;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Files handed to the parallel parse stage at a time. The chunk cap is
/// checked between batches, so at most one batch is parsed past it.
const PARSE_BATCH_FILES: usize = 64;

pub struct Indexer {
    storage: Arc<dyn Storage>,
    encoder: Arc<dyn TextEncoder>,
    parsers: Vec<Box<dyn Parser>>,
}

impl Indexer {
    pub fn new(storage: Arc<dyn Storage>, encoder: Arc<dyn TextEncoder>) -> Self {
        Self { storage, encoder, parsers: default_parsers() }
    }

    /// Compile the ignore rules for a project root. Shared with the watcher
    /// so both sides filter the same paths.
    pub fn load_ignore_rules(&self, project_path: &Path) -> Arc<IgnoreRules> {
        Arc::new(IgnoreRules::load(project_path))
    }

    /// Build a complete index for a project and persist it.
    pub fn index_project(
        &self,
        project_path: &Path,
        project_id: &str,
        index_mode: IndexMode,
    ) -> Result<ProjectIndex> {
        let root = project_path.canonicalize()?;
        info!(path = %root.display(), id = project_id, "Indexing project");

        let rules = self.load_ignore_rules(&root);
        let files = discover_files(&root, &rules, &self.parsers);
        info!(files = files.len(), "Discovered files to index");

        // Parse and hash in parallel one batch of files at a time; the
        // ordered collect keeps results aligned with the sorted walk for
        // deterministic chunk ids, and the cap check between batches stops
        // parse work shortly after the limit is reached.
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut file_metadata: Vec<FileMetadata> = Vec::new();
        'batches: for batch in files.chunks(PARSE_BATCH_FILES) {
            let parsed: Vec<Option<(Vec<Chunk>, FileMetadata)>> =
                batch.par_iter().map(|file| self.parse_one(file, &root)).collect();

            for (file_chunks, metadata) in parsed.into_iter().flatten() {
                chunks.extend(file_chunks);
                file_metadata.push(metadata);
                if chunks.len() >= MAX_TOTAL_CHUNKS {
                    warn!(
                        limit = MAX_TOTAL_CHUNKS,
                        "Chunk limit reached, remaining files left unparsed"
                    );
                    break 'batches;
                }
            }
        }
        info!(chunks = chunks.len(), files = file_metadata.len(), "Extracted chunks");

        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.embedding_id = Some(i);
        }

        let embeddings = self.generate_embeddings(&chunks)?;
        let sparse = SparsePayload {
            tokenized_corpus: chunks.par_iter().map(|c| tokenize(&c.content)).collect(),
            chunk_count: chunks.len(),
        };

        let now = chrono::Utc::now().to_rfc3339();
        let total_chunks = chunks.len();
        let total_files = file_metadata.len();
        let index = ProjectIndex {
            project_id: project_id.to_string(),
            project_path: root.to_string_lossy().to_string(),
            chunks,
            files: file_metadata,
            created_at: now.clone(),
            updated_at: now,
            embedding_model: self.encoder.identifier().to_string(),
            total_chunks,
            total_files,
            index_mode,
        };

        // Metadata is written last: its presence implies complete companions.
        self.storage.save_embeddings(project_id, &embeddings)?;
        self.storage.save_sparse(project_id, &sparse)?;
        self.storage.save_chunks(project_id, &index.chunks)?;
        let manifest: HashMap<String, FileMetadata> =
            index.files.iter().map(|fm| (fm.path.clone(), fm.clone())).collect();
        self.storage.save_file_manifest(project_id, &manifest)?;
        self.storage.save_metadata(project_id, &index)?;

        info!(
            chunks = index.total_chunks,
            files = index.total_files,
            "Project indexed successfully"
        );
        Ok(index)
    }

    /// Apply a change set to an existing index.
    ///
    /// Performs a full re-index while preserving the stored `index_mode`.
    /// A true per-file incremental path is a permitted optimization behind
    /// this same contract.
    pub fn incremental_update(
        &self,
        project_path: &Path,
        project_id: &str,
        changed_files: &[PathBuf],
    ) -> Result<ProjectIndex> {
        let existing = self.storage.load_metadata(project_id).unwrap_or_default();
        let Some(existing) = existing else {
            info!(id = project_id, "No existing index found, performing full index");
            return self.index_project(project_path, project_id, IndexMode::Ondemand);
        };

        warn!(
            changed = changed_files.len(),
            "Incremental update performs a full re-index"
        );
        let index_mode = existing
            .get("index_mode")
            .and_then(|v| serde_json::from_value::<IndexMode>(v.clone()).ok())
            .unwrap_or(IndexMode::Ondemand);
        self.index_project(project_path, project_id, index_mode)
    }

    // -----------------------------------------------------------------------
    // Pipeline steps
    // -----------------------------------------------------------------------

    fn parse_one(&self, file: &Path, root: &Path) -> Option<(Vec<Chunk>, FileMetadata)> {
        let parser = parser_for(&self.parsers, file)?;
        let mut chunks = parser.parse(file, root);
        let mut metadata = parser.metadata(file)?;

        for chunk in &mut chunks {
            if chunk.content.chars().count() > MAX_CHUNK_CHARS {
                chunk.content = truncate_chars(&chunk.content, MAX_CHUNK_CHARS).to_string();
            }
        }

        metadata.content_hash = file_hash(file);
        metadata.chunk_count = chunks.len();
        Some((chunks, metadata))
    }

    fn generate_embeddings(&self, chunks: &[Chunk]) -> Result<EmbeddingMatrix> {
        if chunks.is_empty() {
            return Ok(EmbeddingMatrix::empty(self.encoder.dimension()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let rows = match self.encoder.encode(&texts) {
            Ok(rows) => rows,
            Err(EngineError::EncoderUnavailable(reason)) => {
                warn!(reason = reason.as_str(), "Indexing without dense embeddings");
                return Ok(EmbeddingMatrix::empty(self.encoder.dimension()));
            }
            Err(e) => return Err(e),
        };

        let cols = rows.first().map(|r| r.len()).unwrap_or(self.encoder.dimension());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in &rows {
            data.extend_from_slice(row);
        }
        Ok(EmbeddingMatrix { rows: rows.len(), cols, data })
    }
}

/// SHA-256 hex of the file bytes, streamed. Empty string on I/O failure.
pub fn file_hash(path: &Path) -> String {
    let Ok(mut file) = std::fs::File::open(path) else { return String::new() };
    let mut hasher = Sha256::new();
    if std::io::copy(&mut file, &mut hasher).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}
