//! Test harness for MCP tool integration tests.
//!
//! Builds a `ProjectManager` over a temp project and temp storage dir, then
//! dispatches JSON-RPC values through `dispatch_jsonrpc()` directly (no
//! subprocess). Tools resolve the current working directory, so tool calls
//! run under a process-wide cwd lock.

use context_engine_server::encoder::{l2_normalize, TextEncoder};
use context_engine_server::manager::ProjectManager;
use context_engine_server::mcp::{dispatch_jsonrpc, new_rate_limiter, RateLimiter};
use context_engine_server::sparse::tokenize;
use context_engine_server::storage::FilesystemStorage;
use serde_json::Value;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;

/// Deterministic offline encoder: bag-of-words hashing, L2-normalized.
pub struct StubEncoder {
    name: String,
    dim: usize,
}

impl StubEncoder {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), dim: 32 }
    }
}

impl TextEncoder for StubEncoder {
    fn encode(
        &self,
        texts: &[String],
    ) -> context_engine_server::error::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut row = vec![0.0f32; self.dim];
                for token in tokenize(text) {
                    let mut hasher = DefaultHasher::new();
                    token.hash(&mut hasher);
                    row[(hasher.finish() as usize) % self.dim] += 1.0;
                }
                l2_normalize(&mut row);
                row
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn identifier(&self) -> &str {
        &self.name
    }
}

/// Tool handlers resolve std::env::current_dir(); serialize cwd changes
/// across the whole test binary.
fn cwd_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub struct TestHarness {
    pub manager: Arc<ProjectManager>,
    pub limiter: RateLimiter,
    pub project_dir: TempDir,
    storage_dir: TempDir,
}

impl TestHarness {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::with_encoder(files, "stub-encoder")
    }

    pub fn with_encoder(files: &[(&str, &str)], encoder_name: &str) -> Self {
        let project_dir = TempDir::new().expect("failed to create project dir");
        for (name, content) in files {
            let path = project_dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }

        let storage_dir = TempDir::new().expect("failed to create storage dir");
        let storage =
            Arc::new(FilesystemStorage::new(Some(storage_dir.path().to_path_buf())).unwrap());
        let manager = ProjectManager::new(storage, Arc::new(StubEncoder::named(encoder_name)), 0.6);

        Self { manager, limiter: new_rate_limiter(), project_dir, storage_dir }
    }

    /// A second manager over the same storage dir, as if the server had
    /// been restarted under a different encoder configuration.
    pub fn manager_with_encoder(&self, encoder_name: &str) -> Arc<ProjectManager> {
        let storage =
            Arc::new(FilesystemStorage::new(Some(self.storage_dir.path().to_path_buf())).unwrap());
        ProjectManager::new(storage, Arc::new(StubEncoder::named(encoder_name)), 0.6)
    }

    /// Send a JSON-RPC request with the project dir as cwd.
    pub fn dispatch(&self, msg: Value) -> Option<Value> {
        let _guard = cwd_lock().lock().unwrap_or_else(|e| e.into_inner());
        let original = std::env::current_dir().expect("no cwd");
        std::env::set_current_dir(self.project_dir.path()).expect("chdir to project");
        let response = dispatch_jsonrpc(&self.manager, &self.limiter, &msg);
        std::env::set_current_dir(original).expect("chdir back");
        response
    }

    /// Call an MCP tool by name. Returns the text content of the response.
    pub fn call_tool(&self, tool: &str, args: Value) -> String {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": args }
        });
        let resp = self.dispatch(msg).expect("expected response for tools/call");
        resp["result"]["content"][0]["text"].as_str().unwrap_or("").to_string()
    }

    /// Call a tool and parse its JSON text body.
    pub fn call_tool_json(&self, tool: &str, args: Value) -> Value {
        let text = self.call_tool(tool, args);
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("tool returned non-JSON ({e}): {text}"))
    }

    pub fn initialize(&self) -> Value {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.1.0" }
            }
        });
        self.dispatch(msg).expect("expected initialize response")
    }
}
