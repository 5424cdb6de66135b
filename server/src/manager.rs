//! Multi-project lifecycle and the hybrid query path.
//!
//! Owns the in-memory roster of loaded projects, the per-project watchers,
//! LRU eviction, score fusion, and the watcher circuit breaker. One mutex
//! guards all of that shared state; the encoder and storage are thread-safe
//! on their own and accessed without it. Watcher callbacks do their
//! expensive work (re-index, blob reloads) outside the lock and only take
//! it to swap in-memory structures, so queries always observe a consistent
//! pre- or post-update snapshot.

use crate::config::EngineConfig;
use crate::encoder::{create_encoder, TextEncoder};
use crate::error::{EngineError, Result};
use crate::indexer::Indexer;
use crate::sparse::{tokenize, SparseScorer};
use crate::storage::{FilesystemStorage, Storage};
use crate::types::{
    Chunk, EmbeddingMatrix, IndexMode, ProjectIndex, ProjectQueryResult, ProjectStatus,
    QueryResult, WatcherStatus, MAX_LOADED_PROJECTS,
};
use crate::watcher::{ChangeCallback, FileWatcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{error, info, warn};

/// Consecutive watcher-callback failures before the circuit breaker trips.
const WATCHER_FAILURE_LIMIT: u32 = 3;

struct LoadedProject {
    index: ProjectIndex,
    embeddings: Option<EmbeddingMatrix>,
    sparse: Option<SparseScorer>,
}

#[derive(Default)]
struct ManagerState {
    loaded: HashMap<String, LoadedProject>,
    watchers: HashMap<String, Arc<FileWatcher>>,
    /// LRU order, most recently used last.
    access_order: Vec<String>,
    watcher_failures: HashMap<String, u32>,
    circuit_broken: HashSet<String>,
}

pub struct ProjectManager {
    storage: Arc<dyn Storage>,
    encoder: Arc<dyn TextEncoder>,
    indexer: Indexer,
    semantic_weight: f32,
    state: Mutex<ManagerState>,
}

impl ProjectManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        encoder: Arc<dyn TextEncoder>,
        semantic_weight: f32,
    ) -> Arc<Self> {
        Arc::new(Self {
            indexer: Indexer::new(storage.clone(), encoder.clone()),
            storage,
            encoder,
            semantic_weight: semantic_weight.clamp(0.0, 1.0),
            state: Mutex::new(ManagerState::default()),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Arc<Self>> {
        let storage = Arc::new(FilesystemStorage::new(config.index_path.clone())?);
        let encoder = create_encoder(config);
        Ok(Self::new(storage, encoder, config.semantic_weight))
    }

    // -----------------------------------------------------------------------
    // Public lifecycle operations
    // -----------------------------------------------------------------------

    /// Return the project's index, building it if absent. A watcher is
    /// started only for realtime mode.
    pub fn get_or_create_index(
        self: &Arc<Self>,
        project_path: &Path,
        index_mode: IndexMode,
    ) -> Result<ProjectIndex> {
        let project_id = FilesystemStorage::project_id_from_path(project_path);
        let mut st = self.lock_state();
        self.ensure_loaded(&mut st, project_path, &project_id, index_mode)?;
        Self::touch(&mut st, &project_id);
        Ok(st.loaded[&project_id].index.clone())
    }

    /// Hybrid query over one project's content. Defaults to the current
    /// working directory when no path is given.
    pub fn query_project(
        self: &Arc<Self>,
        query: &str,
        project_path: Option<&Path>,
        max_results: usize,
    ) -> Result<ProjectQueryResult> {
        let start = Instant::now();
        let path = match project_path {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let project_id = FilesystemStorage::project_id_from_path(&path);

        let results = {
            let mut st = self.lock_state();
            self.ensure_loaded(&mut st, &path, &project_id, IndexMode::Realtime)?;
            Self::touch(&mut st, &project_id);

            let project = st.loaded.get(&project_id);
            match project {
                Some(project) if !project.index.chunks.is_empty() => {
                    let semantic = self.semantic_scores(query, project)?;
                    let sparse = Self::sparse_scores(query, project);
                    self.fuse_scores(&project.index.chunks, &semantic, &sparse, max_results)
                }
                _ => Vec::new(),
            }
        };

        let elapsed_ms = (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;
        Ok(ProjectQueryResult {
            query: query.to_string(),
            project_id,
            project_path: path.to_string_lossy().to_string(),
            total_results: results.len(),
            results,
            query_time_ms: elapsed_ms,
        })
    }

    /// Force a full rebuild, preserving the stored index mode and clearing
    /// any circuit-breaker state.
    pub fn reindex_project(self: &Arc<Self>, project_path: &Path) -> Result<ProjectIndex> {
        let project_id = FilesystemStorage::project_id_from_path(project_path);
        let mut st = self.lock_state();

        if let Some(watcher) = st.watchers.remove(&project_id) {
            watcher.stop();
        }
        st.loaded.remove(&project_id);

        let index_mode = self
            .storage
            .load_metadata(&project_id)
            .ok()
            .flatten()
            .and_then(|v| {
                v.get("index_mode")
                    .and_then(|m| serde_json::from_value::<IndexMode>(m.clone()).ok())
            })
            .unwrap_or(IndexMode::Realtime);

        let index = self.indexer.index_project(project_path, &project_id, index_mode)?;
        let (embeddings, sparse) = self.load_search_blobs(&project_id, &index.embedding_model);
        st.loaded
            .insert(project_id.clone(), LoadedProject { index: index.clone(), embeddings, sparse });
        Self::touch(&mut st, &project_id);

        st.circuit_broken.remove(&project_id);
        st.watcher_failures.remove(&project_id);

        if index_mode == IndexMode::Realtime {
            self.start_watcher(&mut st, project_path, &project_id);
        }
        Ok(index)
    }

    /// Summaries of every stored project, without loading chunk content.
    pub fn list_projects(&self) -> Vec<ProjectStatus> {
        let mut statuses = Vec::new();
        for project_id in self.storage.list_projects() {
            match self.storage.load_metadata(&project_id) {
                Ok(Some(metadata)) => statuses.push(self.build_status(&project_id, &metadata)),
                Ok(None) => {}
                Err(e) => {
                    warn!(id = project_id.as_str(), error = %e, "Error loading project");
                }
            }
        }
        statuses
    }

    /// Status for one project, `None` when it has never been indexed.
    pub fn get_project_status(&self, project_path: Option<&Path>) -> Result<Option<ProjectStatus>> {
        let path = match project_path {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let project_id = FilesystemStorage::project_id_from_path(&path);
        match self.storage.load_metadata(&project_id) {
            Ok(Some(metadata)) => Ok(Some(self.build_status(&project_id, &metadata))),
            _ => Ok(None),
        }
    }

    /// Stop every watcher and drop all caches.
    pub fn shutdown(&self) {
        let watchers: Vec<Arc<FileWatcher>> = {
            let mut st = self.lock_state();
            st.loaded.clear();
            st.access_order.clear();
            st.watchers.drain().map(|(_, w)| w).collect()
        };
        for watcher in watchers {
            watcher.stop();
        }
        info!("Project manager shut down");
    }

    // -----------------------------------------------------------------------
    // Loading and eviction
    // -----------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_loaded(
        self: &Arc<Self>,
        st: &mut ManagerState,
        project_path: &Path,
        project_id: &str,
        index_mode: IndexMode,
    ) -> Result<()> {
        if st.loaded.contains_key(project_id) {
            return Ok(());
        }
        self.evict_if_needed(st);

        if self.storage.project_exists(project_id)? {
            self.load_project(st, project_id)?;
            return Ok(());
        }

        let index = self.indexer.index_project(project_path, project_id, index_mode)?;
        let (embeddings, sparse) = self.load_search_blobs(project_id, &index.embedding_model);
        st.loaded.insert(project_id.to_string(), LoadedProject { index, embeddings, sparse });
        if index_mode == IndexMode::Realtime {
            self.start_watcher(st, project_path, project_id);
        }
        Ok(())
    }

    /// Mark a project as most recently used. Call with the state lock held.
    fn touch(st: &mut ManagerState, project_id: &str) {
        st.access_order.retain(|id| id != project_id);
        st.access_order.push(project_id.to_string());
    }

    /// Evict least-recently-used projects until there is room for one more.
    fn evict_if_needed(&self, st: &mut ManagerState) {
        while st.loaded.len() >= MAX_LOADED_PROJECTS && !st.access_order.is_empty() {
            let evict_id = st.access_order.remove(0);
            if st.loaded.remove(&evict_id).is_none() {
                continue;
            }
            if let Some(watcher) = st.watchers.remove(&evict_id) {
                watcher.stop();
            }
            info!(id = evict_id.as_str(), "Evicted project from memory (LRU)");
        }
    }

    /// Load a stored project into memory. Corrupt metadata degrades to an
    /// empty index so the caller can trigger a re-index.
    fn load_project(&self, st: &mut ManagerState, project_id: &str) -> Result<()> {
        let mut index = match self.storage.load_metadata(project_id) {
            Ok(Some(value)) => match serde_json::from_value::<ProjectIndex>(value.clone()) {
                Ok(index) => index,
                Err(e) => {
                    warn!(id = project_id, error = %e, "Corrupt metadata, creating empty index");
                    salvage_index(project_id, Some(&value))
                }
            },
            Ok(None) => return Err(EngineError::ProjectNotFound(project_id.to_string())),
            Err(e) => {
                warn!(id = project_id, error = %e, "Unreadable metadata, creating empty index");
                salvage_index(project_id, None)
            }
        };

        match self.storage.load_chunks(project_id) {
            Ok(Some(chunks)) => index.chunks = chunks,
            Ok(None) => {}
            Err(e) => warn!(id = project_id, error = %e, "Failed to load chunk blob"),
        }

        let (embeddings, sparse) = self.load_search_blobs(project_id, &index.embedding_model);
        st.loaded.insert(project_id.to_string(), LoadedProject { index, embeddings, sparse });
        Ok(())
    }

    /// Load the search blobs for a project from storage. Embeddings
    /// recorded under a different encoder are discarded so the project
    /// serves sparse-only scores until re-indexed.
    fn load_search_blobs(
        &self,
        project_id: &str,
        embedding_model: &str,
    ) -> (Option<EmbeddingMatrix>, Option<SparseScorer>) {
        let model_matches = embedding_model == self.encoder.identifier();
        if !model_matches {
            warn!(
                id = project_id,
                stored = embedding_model,
                configured = self.encoder.identifier(),
                "Embedding model mismatch, semantic search disabled until re-index"
            );
        }

        let embeddings = if model_matches {
            match self.storage.load_embeddings(project_id) {
                Ok(matrix) => matrix.filter(|m| !m.is_empty()),
                Err(e) => {
                    warn!(id = project_id, error = %e, "Failed to load embeddings");
                    None
                }
            }
        } else {
            None
        };

        let sparse = match self.storage.load_sparse(project_id) {
            Ok(Some(payload)) if !payload.tokenized_corpus.is_empty() => {
                Some(SparseScorer::from_payload(&payload))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(id = project_id, error = %e, "Failed to load sparse payload");
                None
            }
        };

        (embeddings, sparse)
    }

    // -----------------------------------------------------------------------
    // Query path
    // -----------------------------------------------------------------------

    /// Cosine similarity of the query against every chunk embedding,
    /// clamped to [0, 1]. Empty when no compatible matrix is loaded.
    fn semantic_scores(&self, query: &str, project: &LoadedProject) -> Result<Vec<f32>> {
        let Some(matrix) = &project.embeddings else { return Ok(Vec::new()) };
        if matrix.is_empty() || matrix.rows != project.index.chunks.len() {
            return Ok(Vec::new());
        }

        let query_row = match self.encoder.encode(&[query.to_string()]) {
            Ok(mut rows) if !rows.is_empty() => rows.remove(0),
            Ok(_) => return Ok(Vec::new()),
            Err(EngineError::EncoderUnavailable(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if query_row.len() != matrix.cols {
            warn!(
                query_dim = query_row.len(),
                matrix_dim = matrix.cols,
                "Query embedding dimensionality mismatch"
            );
            return Ok(Vec::new());
        }

        // Rows are L2-normalized, so the dot product is the cosine similarity.
        let scores = (0..matrix.rows)
            .map(|i| {
                let dot: f32 = matrix.row(i).iter().zip(query_row.iter()).map(|(a, b)| a * b).sum();
                dot.clamp(0.0, 1.0)
            })
            .collect();
        Ok(scores)
    }

    /// BM25 scores normalized to [0, 1] by the per-query maximum.
    fn sparse_scores(query: &str, project: &LoadedProject) -> Vec<f32> {
        let Some(scorer) = &project.sparse else { return Vec::new() };
        let mut scores = scorer.score(&tokenize(query));
        let max = scores.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for s in &mut scores {
                *s /= max;
            }
        }
        scores
    }

    /// Fuse per-chunk scores and keep the top results with positive
    /// combined score, in non-increasing order.
    fn fuse_scores(
        &self,
        chunks: &[Chunk],
        semantic: &[f32],
        sparse: &[f32],
        max_results: usize,
    ) -> Vec<QueryResult> {
        let n = chunks.len();
        if n == 0 {
            return Vec::new();
        }
        let sem = |i: usize| if semantic.len() == n { semantic[i] } else { 0.0 };
        let sp = |i: usize| if sparse.len() == n { sparse[i] } else { 0.0 };

        let w = self.semantic_weight;
        let mut ranked: Vec<(usize, f32)> =
            (0..n).map(|i| (i, w * sem(i) + (1.0 - w) * sp(i))).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });

        ranked
            .into_iter()
            .take(max_results)
            .take_while(|&(_, combined)| combined > 0.0)
            .map(|(i, combined)| QueryResult {
                chunk: chunks[i].clone(),
                semantic_score: sem(i).min(1.0),
                sparse_score: sp(i).min(1.0),
                combined_score: combined.min(1.0),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Watchers and the circuit breaker
    // -----------------------------------------------------------------------

    fn start_watcher(self: &Arc<Self>, st: &mut ManagerState, project_path: &Path, project_id: &str) {
        if st.watchers.contains_key(project_id) {
            return;
        }
        let root = project_path.canonicalize().unwrap_or_else(|_| project_path.to_path_buf());
        let ignore = self.indexer.load_ignore_rules(&root);

        // The callback holds only a weak reference; the manager owns the
        // watcher, not the other way around.
        let weak = Arc::downgrade(self);
        let callback_root = root.clone();
        let callback_id = project_id.to_string();
        let callback: ChangeCallback = Arc::new(move |changed| {
            if let Some(manager) = weak.upgrade() {
                manager.on_files_changed(&callback_root, &callback_id, changed);
            }
        });

        let watcher = Arc::new(FileWatcher::new(root, ignore, callback));
        watcher.start();
        st.watchers.insert(project_id.to_string(), watcher);
    }

    /// Watcher callback body. Runs on the debounce thread: all I/O happens
    /// before the lock is taken, and the in-memory structures are swapped
    /// in one critical section.
    fn on_files_changed(&self, project_path: &Path, project_id: &str, changed: Vec<PathBuf>) {
        let rebuilt = self.rebuild_for_changes(project_path, project_id, &changed);

        match rebuilt {
            Ok(loaded) => {
                let mut st = self.lock_state();
                st.loaded.insert(project_id.to_string(), loaded);
                st.watcher_failures.remove(project_id);
            }
            Err(e) => {
                let mut watcher_to_stop = None;
                let failures;
                {
                    let mut st = self.lock_state();
                    let count = st.watcher_failures.entry(project_id.to_string()).or_insert(0);
                    *count += 1;
                    failures = *count;
                    if failures >= WATCHER_FAILURE_LIMIT {
                        watcher_to_stop = st.watchers.remove(project_id);
                        st.circuit_broken.insert(project_id.to_string());
                    }
                }
                error!(id = project_id, consecutive = failures, error = %e, "Incremental update failed");
                if let Some(watcher) = watcher_to_stop {
                    error!(
                        id = project_id,
                        failures,
                        "Stopping watcher after consecutive failures"
                    );
                    watcher.stop();
                }
            }
        }
    }

    fn rebuild_for_changes(
        &self,
        project_path: &Path,
        project_id: &str,
        changed: &[PathBuf],
    ) -> Result<LoadedProject> {
        let index = self.indexer.incremental_update(project_path, project_id, changed)?;
        let (embeddings, sparse) = self.load_search_blobs(project_id, &index.embedding_model);
        Ok(LoadedProject { index, embeddings, sparse })
    }

    fn watcher_status(
        st: &ManagerState,
        project_id: &str,
        index_mode: IndexMode,
    ) -> WatcherStatus {
        if index_mode == IndexMode::Ondemand {
            return WatcherStatus::Disabled;
        }
        if st.circuit_broken.contains(project_id) {
            return WatcherStatus::CircuitBroken;
        }
        match st.watchers.get(project_id) {
            Some(watcher) if watcher.is_running() => WatcherStatus::Running,
            _ => WatcherStatus::Stopped,
        }
    }

    fn build_status(&self, project_id: &str, metadata: &serde_json::Value) -> ProjectStatus {
        let index_size_bytes = self
            .storage
            .index_path(project_id)
            .ok()
            .and_then(|path| std::fs::read_dir(path).ok())
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_file() && !e.path().is_symlink())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        let index_mode = metadata
            .get("index_mode")
            .and_then(|m| serde_json::from_value::<IndexMode>(m.clone()).ok())
            .unwrap_or(IndexMode::Realtime);

        let watcher_status = {
            let st = self.lock_state();
            Self::watcher_status(&st, project_id, index_mode)
        };

        let str_field = |key: &str, default: &str| {
            metadata.get(key).and_then(|v| v.as_str()).unwrap_or(default).to_string()
        };
        let count_field = |key: &str| {
            metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as usize
        };

        ProjectStatus {
            project_id: project_id.to_string(),
            project_path: str_field("project_path", "unknown"),
            total_files: count_field("total_files"),
            total_chunks: count_field("total_chunks"),
            index_mode,
            last_updated: metadata.get("updated_at").and_then(|v| v.as_str()).map(String::from),
            index_size_bytes,
            embedding_model: str_field("embedding_model", "unknown"),
            watcher_status,
        }
    }
}

/// Minimal index standing in for missing or corrupt metadata. Whatever
/// string fields survive in the raw JSON are kept for status reporting.
fn salvage_index(project_id: &str, raw: Option<&serde_json::Value>) -> ProjectIndex {
    let field = |key: &str| {
        raw.and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    ProjectIndex {
        project_id: project_id.to_string(),
        project_path: field("project_path"),
        chunks: Vec::new(),
        files: Vec::new(),
        created_at: field("created_at"),
        updated_at: field("updated_at"),
        embedding_model: field("embedding_model"),
        total_chunks: 0,
        total_files: 0,
        index_mode: raw
            .and_then(|v| v.get("index_mode"))
            .and_then(|m| serde_json::from_value::<IndexMode>(m.clone()).ok())
            .unwrap_or(IndexMode::Realtime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashEncoder;
    use tempfile::TempDir;

    fn manager_with(storage_dir: &TempDir, model: &str) -> Arc<ProjectManager> {
        let storage =
            Arc::new(FilesystemStorage::new(Some(storage_dir.path().to_path_buf())).unwrap());
        ProjectManager::new(storage, Arc::new(HashEncoder::named(model)), 0.6)
    }

    fn project_with_files(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn query_returns_scored_results_in_order() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = project_with_files(&[
            ("hello.py", "def greet():\n    return \"hi\"\n"),
            ("other.py", "def unrelated():\n    return 42\n"),
        ]);

        manager.get_or_create_index(project.path(), IndexMode::Ondemand).unwrap();
        let result = manager.query_project("greet", Some(project.path()), 10).unwrap();

        assert!(result.total_results > 0);
        assert!(result.query_time_ms >= 0.0);
        let top = &result.results[0];
        assert_eq!(top.chunk.source_path, "hello.py");
        assert!(top.combined_score > 0.0);
        for r in &result.results {
            assert!((0.0..=1.0).contains(&r.semantic_score));
            assert!((0.0..=1.0).contains(&r.sparse_score));
            assert!((0.0..=1.0).contains(&r.combined_score));
        }
        for pair in result.results.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
    }

    #[test]
    fn empty_project_query_returns_zero_results() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = TempDir::new().unwrap();

        let result = manager.query_project("anything", Some(project.path()), 10).unwrap();
        assert_eq!(result.total_results, 0);
        assert!(result.results.is_empty());
        assert!(result.query_time_ms >= 0.0);
    }

    #[test]
    fn model_mismatch_serves_sparse_only() {
        let storage_dir = TempDir::new().unwrap();
        let project = project_with_files(&[("notes.md", "# Notes\nthe bravo section\n")]);

        // Index under encoder E1, then reopen the store under encoder E2
        let m1 = manager_with(&storage_dir, "E1");
        m1.get_or_create_index(project.path(), IndexMode::Ondemand).unwrap();
        m1.shutdown();

        let m2 = manager_with(&storage_dir, "E2");
        let result = m2.query_project("bravo", Some(project.path()), 10).unwrap();

        assert!(result.total_results > 0);
        assert!(result.results.iter().all(|r| r.semantic_score == 0.0));
        assert!(result.results.iter().any(|r| r.sparse_score > 0.0));
    }

    #[test]
    fn loaded_roster_is_bounded_by_lru_eviction() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");

        let mut projects = Vec::new();
        for i in 0..=MAX_LOADED_PROJECTS {
            let project = project_with_files(&[("f.py", &format!("x{i} = {i}\n"))]);
            manager.get_or_create_index(project.path(), IndexMode::Ondemand).unwrap();
            projects.push(project);
        }

        let st = manager.lock_state();
        assert!(st.loaded.len() <= MAX_LOADED_PROJECTS);
        // The first project was the least recently used and got evicted
        let first_id = FilesystemStorage::project_id_from_path(projects[0].path());
        assert!(!st.loaded.contains_key(&first_id));
    }

    #[test]
    fn circuit_breaker_trips_after_three_failures_and_reindex_clears_it() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = project_with_files(&[("a.py", "x = 1\n")]);

        let index = manager.get_or_create_index(project.path(), IndexMode::Realtime).unwrap();
        let project_id = index.project_id.clone();
        {
            let st = manager.lock_state();
            assert_eq!(
                ProjectManager::watcher_status(&st, &project_id, IndexMode::Realtime),
                WatcherStatus::Running
            );
        }

        // Drive the callback against a root that no longer resolves
        let missing = project.path().join("gone");
        for _ in 0..WATCHER_FAILURE_LIMIT {
            manager.on_files_changed(&missing, &project_id, vec![missing.clone()]);
        }
        {
            let st = manager.lock_state();
            assert!(st.circuit_broken.contains(&project_id));
            assert_eq!(
                ProjectManager::watcher_status(&st, &project_id, IndexMode::Realtime),
                WatcherStatus::CircuitBroken
            );
        }

        manager.reindex_project(project.path()).unwrap();
        {
            let st = manager.lock_state();
            assert!(!st.circuit_broken.contains(&project_id));
            assert!(st.watcher_failures.get(&project_id).is_none());
        }
        manager.shutdown();
    }

    #[test]
    fn reindex_preserves_stored_index_mode() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = project_with_files(&[("a.py", "x = 1\n")]);

        manager.get_or_create_index(project.path(), IndexMode::Ondemand).unwrap();
        let reindexed = manager.reindex_project(project.path()).unwrap();
        assert_eq!(reindexed.index_mode, IndexMode::Ondemand);
        let status = manager.get_project_status(Some(project.path())).unwrap().unwrap();
        assert_eq!(status.watcher_status, WatcherStatus::Disabled);
    }

    #[test]
    fn status_is_none_for_unindexed_projects() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = TempDir::new().unwrap();
        assert!(manager.get_project_status(Some(project.path())).unwrap().is_none());
        assert!(manager.list_projects().is_empty());
    }

    #[test]
    fn stored_project_reloads_with_chunks() {
        let storage_dir = TempDir::new().unwrap();
        let project = project_with_files(&[("doc.md", "# Title\nalpha beta\n")]);

        let m1 = manager_with(&storage_dir, "test-encoder");
        let built = m1.get_or_create_index(project.path(), IndexMode::Ondemand).unwrap();
        m1.shutdown();

        // Fresh manager over the same storage must serve queries from disk
        let m2 = manager_with(&storage_dir, "test-encoder");
        let result = m2.query_project("alpha", Some(project.path()), 10).unwrap();
        assert_eq!(result.project_id, built.project_id);
        assert!(result.total_results > 0);
    }

    #[test]
    fn watcher_swap_updates_results_within_a_debounce_window() {
        let storage_dir = TempDir::new().unwrap();
        let manager = manager_with(&storage_dir, "test-encoder");
        let project = project_with_files(&[("a.md", "# One\nfirst body\n")]);

        let before = manager.get_or_create_index(project.path(), IndexMode::Realtime).unwrap();
        std::fs::write(project.path().join("b.md"), "# Two\nsecond body\n").unwrap();

        // Wait out the debounce window plus the re-index itself
        let project_id = before.project_id.clone();
        let deadline = Instant::now() + std::time::Duration::from_secs(15);
        let mut updated_chunks = before.total_chunks;
        while Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(200));
            let st = manager.lock_state();
            if let Some(loaded) = st.loaded.get(&project_id) {
                if loaded.index.total_chunks > before.total_chunks {
                    updated_chunks = loaded.index.total_chunks;
                    break;
                }
            }
        }
        assert!(updated_chunks > before.total_chunks, "watcher never swapped in the new index");
        manager.shutdown();
    }
}
