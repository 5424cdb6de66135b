//! Persistent storage for project indexes.
//!
//! The `Storage` trait keeps the engine testable against alternate backends;
//! `FilesystemStorage` is the production implementation, writing one
//! directory per project under the base path:
//!
//! ```text
//! <base>/<project_id>/
//!     content_embeddings.bin   # bincode EmbeddingMatrix, rows = chunks
//!     sparse_index.json        # tokenized corpus + chunk count
//!     chunks.json              # ordered chunk list
//!     metadata.json            # ProjectIndex minus chunks/files
//!     file_manifest.json       # path -> FileMetadata
//! ```
//!
//! Serialization is JSON plus bincode for the dense matrix; neither can
//! carry executable payloads. Project ids are validated as hex on every
//! call and every computed path must stay inside the base directory.

use crate::error::{EngineError, Result};
use crate::types::{Chunk, EmbeddingMatrix, FileMetadata, ProjectIndex, SparsePayload};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const EMBEDDINGS_FILE: &str = "content_embeddings.bin";
const SPARSE_FILE: &str = "sparse_index.json";
const CHUNKS_FILE: &str = "chunks.json";
const METADATA_FILE: &str = "metadata.json";
const MANIFEST_FILE: &str = "file_manifest.json";

/// Project ids are SHA-256 prefixes: hex only, at most a full digest.
static PROJECT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{1,64}$").expect("static pattern"));

fn validate_project_id(project_id: &str) -> Result<()> {
    if PROJECT_ID_PATTERN.is_match(project_id) {
        Ok(())
    } else {
        Err(EngineError::InvalidProjectId(project_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

pub trait Storage: Send + Sync {
    fn save_embeddings(&self, project_id: &str, matrix: &EmbeddingMatrix) -> Result<()>;
    fn load_embeddings(&self, project_id: &str) -> Result<Option<EmbeddingMatrix>>;

    fn save_sparse(&self, project_id: &str, payload: &SparsePayload) -> Result<()>;
    fn load_sparse(&self, project_id: &str) -> Result<Option<SparsePayload>>;

    fn save_chunks(&self, project_id: &str, chunks: &[Chunk]) -> Result<()>;
    fn load_chunks(&self, project_id: &str) -> Result<Option<Vec<Chunk>>>;

    fn save_metadata(&self, project_id: &str, index: &ProjectIndex) -> Result<()>;
    /// Raw JSON so callers can salvage fields from schema-corrupt records.
    fn load_metadata(&self, project_id: &str) -> Result<Option<serde_json::Value>>;

    fn save_file_manifest(
        &self,
        project_id: &str,
        manifest: &HashMap<String, FileMetadata>,
    ) -> Result<()>;
    fn load_file_manifest(
        &self,
        project_id: &str,
    ) -> Result<Option<HashMap<String, FileMetadata>>>;

    /// True only when the metadata blob is present.
    fn project_exists(&self, project_id: &str) -> Result<bool>;
    fn list_projects(&self) -> Vec<String>;
    fn delete_project(&self, project_id: &str) -> Result<()>;
    fn index_path(&self, project_id: &str) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Open (and create if missing) the storage root.
    /// Defaults to `~/.context-engine/indexes/`.
    pub fn new(base_path: Option<PathBuf>) -> Result<Self> {
        let base = base_path.unwrap_or_else(|| {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".context-engine").join("indexes")
        });
        fs::create_dir_all(&base)?;
        let base_path = base.canonicalize()?;
        Ok(Self { base_path })
    }

    /// Derive a project id from a project path: the first 16 lower-hex
    /// characters of the SHA-256 of the absolute canonical path.
    pub fn project_id_from_path(project_path: &Path) -> String {
        let abs = project_path.canonicalize().unwrap_or_else(|_| {
            if project_path.is_absolute() {
                project_path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(project_path))
                    .unwrap_or_else(|_| project_path.to_path_buf())
            }
        });
        let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checked_path(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;
        let path = self.base_path.join(project_id);
        // The validated id is a single normal component, but the containment
        // check stays as the last line of defense before any I/O.
        let resolved = path.canonicalize().unwrap_or_else(|_| path.clone());
        if !resolved.starts_with(&self.base_path) {
            return Err(EngineError::PathTraversal(resolved));
        }
        Ok(path)
    }

    fn ensure_dir(&self, project_id: &str) -> Result<PathBuf> {
        let path = self.checked_path(project_id)?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), value)?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path)?;
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }
}

impl Storage for FilesystemStorage {
    fn save_embeddings(&self, project_id: &str, matrix: &EmbeddingMatrix) -> Result<()> {
        let dir = self.ensure_dir(project_id)?;
        let file = fs::File::create(dir.join(EMBEDDINGS_FILE))?;
        bincode::serialize_into(BufWriter::new(file), matrix)?;
        Ok(())
    }

    fn load_embeddings(&self, project_id: &str) -> Result<Option<EmbeddingMatrix>> {
        let path = self.checked_path(project_id)?.join(EMBEDDINGS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path)?;
        Ok(Some(bincode::deserialize_from(BufReader::new(file))?))
    }

    fn save_sparse(&self, project_id: &str, payload: &SparsePayload) -> Result<()> {
        let dir = self.ensure_dir(project_id)?;
        self.write_json(&dir.join(SPARSE_FILE), payload)
    }

    fn load_sparse(&self, project_id: &str) -> Result<Option<SparsePayload>> {
        let path = self.checked_path(project_id)?.join(SPARSE_FILE);
        self.read_json(&path)
    }

    fn save_chunks(&self, project_id: &str, chunks: &[Chunk]) -> Result<()> {
        let dir = self.ensure_dir(project_id)?;
        self.write_json(&dir.join(CHUNKS_FILE), &chunks)
    }

    fn load_chunks(&self, project_id: &str) -> Result<Option<Vec<Chunk>>> {
        let path = self.checked_path(project_id)?.join(CHUNKS_FILE);
        self.read_json(&path)
    }

    fn save_metadata(&self, project_id: &str, index: &ProjectIndex) -> Result<()> {
        let dir = self.ensure_dir(project_id)?;
        // ProjectIndex skips chunks/files during serialization, keeping this
        // blob small enough for cheap listing.
        self.write_json(&dir.join(METADATA_FILE), index)
    }

    fn load_metadata(&self, project_id: &str) -> Result<Option<serde_json::Value>> {
        let path = self.checked_path(project_id)?.join(METADATA_FILE);
        self.read_json(&path)
    }

    fn save_file_manifest(
        &self,
        project_id: &str,
        manifest: &HashMap<String, FileMetadata>,
    ) -> Result<()> {
        let dir = self.ensure_dir(project_id)?;
        self.write_json(&dir.join(MANIFEST_FILE), manifest)
    }

    fn load_file_manifest(
        &self,
        project_id: &str,
    ) -> Result<Option<HashMap<String, FileMetadata>>> {
        let path = self.checked_path(project_id)?.join(MANIFEST_FILE);
        self.read_json(&path)
    }

    fn project_exists(&self, project_id: &str) -> Result<bool> {
        let path = self.checked_path(project_id)?;
        Ok(path.join(METADATA_FILE).exists())
    }

    fn list_projects(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.base_path) else { return Vec::new() };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|name| PROJECT_ID_PATTERN.is_match(name))
            .filter(|name| self.base_path.join(name).join(METADATA_FILE).exists())
            .collect();
        ids.sort();
        ids
    }

    fn delete_project(&self, project_id: &str) -> Result<()> {
        let path = self.checked_path(project_id)?;
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        Ok(())
    }

    fn index_path(&self, project_id: &str) -> Result<PathBuf> {
        self.checked_path(project_id)
    }
}
