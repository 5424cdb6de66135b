//! Core data model: chunks, file metadata, project indexes, query results,
//! and the engine-wide resource caps.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resource caps (compile-time constants)
// ---------------------------------------------------------------------------

/// Maximum size of a single indexable file. Larger files are skipped.
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of indexable files per project walk.
pub const MAX_FILES: usize = 10_000;

/// Maximum total chunks per project. The walk stops early once reached.
pub const MAX_TOTAL_CHUNKS: usize = 100_000;

/// Maximum characters kept per chunk. Longer chunk content is truncated;
/// the full text stays available in the source file.
pub const MAX_CHUNK_CHARS: usize = 10_000;

/// Maximum characters fed to the encoder per chunk.
pub const MAX_EMBED_INPUT_CHARS: usize = 2048;

/// Batch size for embedding generation, caps peak memory.
pub const EMBEDDING_BATCH: usize = 1000;

/// Maximum projects held in memory before LRU eviction kicks in.
pub const MAX_LOADED_PROJECTS: usize = 10;

/// Maximum pages extracted from a single PDF.
pub const MAX_PDF_PAGES: usize = 500;

/// Quiet window before a burst of file events is flushed to the callback.
pub const DEBOUNCE_MS: u64 = 500;

/// Maximum accepted query length.
pub const MAX_QUERY_LEN: usize = 10_000;

/// Maximum content length echoed into a log line.
pub const MAX_LOG_CONTENT_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Content model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Document,
    Data,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Realtime,
    Ondemand,
}

/// A chunk of content extracted from a project file.
///
/// Chunks are the atomic unit of indexing and retrieval. Once indexed,
/// `embedding_id` equals the chunk's position in the project's chunk list
/// and is a valid row index into the dense matrix when one is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Path shown to the caller, relative to the project root where possible.
    pub source_path: String,
    /// 1-based inclusive. 0/0 for non-line content such as image metadata.
    pub start_line: usize,
    pub end_line: usize,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Section heading or definition name, when the parser can name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_id: Option<usize>,
}

/// Metadata about one indexed file, kept in the file manifest for change
/// detection between index runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub size_bytes: u64,
    /// Epoch seconds of the last modification.
    pub last_modified: u64,
    /// SHA-256 hex of the file bytes. Empty when hashing failed.
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub chunk_count: usize,
}

/// Complete index for a single project.
///
/// `chunks` and `files` are serialized to their own blobs, never into
/// `metadata.json`, so listing and status calls stay cheap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectIndex {
    pub project_id: String,
    pub project_path: String,
    #[serde(skip)]
    pub chunks: Vec<Chunk>,
    #[serde(skip)]
    pub files: Vec<FileMetadata>,
    /// ISO-8601 UTC timestamps.
    pub created_at: String,
    pub updated_at: String,
    pub embedding_model: String,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub total_files: usize,
    pub index_mode: IndexMode,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// One ranked hit. All three scores are within [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub chunk: Chunk,
    pub semantic_score: f32,
    pub sparse_score: f32,
    pub combined_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectQueryResult {
    pub query: String,
    pub project_id: String,
    pub project_path: String,
    pub results: Vec<QueryResult>,
    pub total_results: usize,
    pub query_time_ms: f64,
}

/// Lifecycle state of a project's watcher, surfaced through status calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherStatus {
    Running,
    Stopped,
    CircuitBroken,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project_id: String,
    pub project_path: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub index_mode: IndexMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub index_size_bytes: u64,
    pub embedding_model: String,
    pub watcher_status: WatcherStatus,
}

// ---------------------------------------------------------------------------
// Dense matrix and sparse payload
// ---------------------------------------------------------------------------

/// Row-major dense embedding matrix. One L2-normalized row per chunk.
///
/// Stored flat for cache-friendly scoring, serialized with bincode so the
/// round trip is bit-exact and carries no executable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn empty(cols: usize) -> Self {
        Self { rows: 0, cols, data: Vec::new() }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.cols;
        &self.data[start..start + self.cols]
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Serializable payload backing the sparse scorer, persisted as
/// `sparse_index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparsePayload {
    pub tokenized_corpus: Vec<Vec<String>>,
    pub chunk_count: usize,
}
