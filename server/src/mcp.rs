//! MCP JSON-RPC server over stdio.
//!
//! Exposes four tools (`query_project`, `index_project`, `list_projects`,
//! `project_status`) with input validation, a token-bucket rate limit on
//! indexing, and error sanitization. Tool handlers run on the blocking
//! pool so the stdin read loop never stalls behind an index build; stdout
//! carries protocol frames exclusively and diagnostics go to stderr via
//! tracing.

use crate::encoder::truncate_chars;
use crate::manager::ProjectManager;
use crate::types::{MAX_LOG_CONTENT_LEN, MAX_QUERY_LEN};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tracing::{error, info};

const VALID_TOOLS: &[&str] =
    &["query_project", "index_project", "list_projects", "project_status"];

/// Protocol revisions this server knows how to speak.
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Maximum results returned by a single query.
const MAX_QUERY_RESULTS: usize = 50;

/// Characters of chunk content echoed per result.
const RESULT_CONTENT_CHARS: usize = 500;

const SERVER_INSTRUCTIONS: &str = "Context Engine — semantic and keyword search across project \
content. Use query_project to find code, docs, and data by meaning or keyword; index_project to \
build or refresh the current project's index; list_projects and project_status for index state.";

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Token bucket for index_project: indexing is expensive, so requests are
/// capped at 5 per minute with burst capacity 5.
const INDEX_RATE_CAPACITY: f64 = 5.0;
const INDEX_RATE_REFILL_PER_SEC: f64 = 5.0 / 60.0;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Error sanitization
// ---------------------------------------------------------------------------

static ABS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[A-Za-z]:)?(?:[/\\][^/\\:*?"<>|\n]+)+[/\\]([^/\\:*?"<>|\s]+)"#).unwrap()
});
static REL_TRAVERSAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:\.\.[/\\])+([^/\\:*?"<>|\s]+)"#).unwrap());
static UNC_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\\\[^\\:*?"<>|\s]+(?:\\[^\\:*?"<>|\s]+)*\\([^\\:*?"<>|\s]+)"#).unwrap()
});
static LINE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r", line \d+").unwrap());
static HEX_ADDR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());
static MODULE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+(?:\.\w+){2,}\b").unwrap());
static FUNC_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bin\s+\w+\s*\(").unwrap());
static FRAME_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File\s+["'][^"']+["']"#).unwrap());

const MAX_ERROR_LEN: usize = 500;

/// Strip paths, addresses, and frame references from an error message
/// before it reaches the caller. Basenames are kept so messages stay
/// actionable.
pub fn sanitize_error_message(message: &str) -> String {
    // Traversal prefixes go first so absolute-path rewriting never leaves
    // a dangling ".." behind.
    let message = UNC_PATH.replace_all(message, "$1");
    let message = REL_TRAVERSAL.replace_all(&message, "$1");
    let message = ABS_PATH.replace_all(&message, "$1");
    let message = LINE_REF.replace_all(&message, "");
    let message = HEX_ADDR.replace_all(&message, "0x***");
    let message = MODULE_PATH.replace_all(&message, "[module]");
    let message = FUNC_REF.replace_all(&message, "in [func](");
    let message = FRAME_REF.replace_all(&message, "File [redacted]");

    if message.chars().count() > MAX_ERROR_LEN {
        format!("{}...[truncated]", truncate_chars(&message, MAX_ERROR_LEN))
    } else {
        message.into_owned()
    }
}

/// Truncate content destined for a log line.
pub fn sanitize_for_logging(content: &str) -> String {
    if content.chars().count() > MAX_LOG_CONTENT_LEN {
        format!("{}...[TRUNCATED]", truncate_chars(content, MAX_LOG_CONTENT_LEN))
    } else {
        content.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

fn tool_definitions() -> Value {
    json!([
        {
            "name": "query_project",
            "description": "Search project content using semantic and keyword matching. \
                Returns ranked results with file paths and line numbers. Use for: finding \
                code patterns, locating implementations, discovering related files, \
                understanding project structure.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language query or keyword search. Examples: \
                            'where do we handle authentication?', 'validate_token function', \
                            'error handling patterns'",
                        "minLength": 1,
                        "maxLength": MAX_QUERY_LEN
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum results to return (default: 10)",
                        "default": 10,
                        "minimum": 1,
                        "maximum": MAX_QUERY_RESULTS
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "index_project",
            "description": "Trigger a full re-index of the current project. Use when files \
                have changed and the index may be stale, or after initial project setup.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "list_projects",
            "description": "Show all indexed projects with basic stats.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "project_status",
            "description": "Get detailed index statistics for the current project: file \
                count, chunk count, last updated, index size.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

// ---------------------------------------------------------------------------
// Tool handlers
// ---------------------------------------------------------------------------

fn round3(score: f32) -> f64 {
    (score as f64 * 1000.0).round() / 1000.0
}

fn handle_query_project(manager: &Arc<ProjectManager>, args: &Value) -> String {
    let Some(query) = args.get("query").and_then(|q| q.as_str()) else {
        return "Error: query must be a string".to_string();
    };
    let query = query.trim();
    if query.is_empty() {
        return "Error: query cannot be empty".to_string();
    }
    if query.chars().count() > MAX_QUERY_LEN {
        return format!("Error: query exceeds maximum length of {MAX_QUERY_LEN}");
    }

    let max_results = args
        .get("max_results")
        .and_then(|v| v.as_i64())
        .map(|n| n.clamp(1, MAX_QUERY_RESULTS as i64) as usize)
        .unwrap_or(10);

    let result = match manager.query_project(query, None, max_results) {
        Ok(result) => result,
        Err(e) => {
            return tool_error_json("query_project", &e.to_string());
        }
    };

    if result.results.is_empty() {
        return serde_json::to_string_pretty(&json!({
            "query": query,
            "message": "No results found. The project may not be indexed yet. \
                Use index_project to create the index.",
            "total_results": 0,
        }))
        .unwrap_or_default();
    }

    let formatted: Vec<Value> = result
        .results
        .iter()
        .map(|r| {
            json!({
                "file": r.chunk.source_path,
                "lines": format!("{}-{}", r.chunk.start_line, r.chunk.end_line),
                "type": r.chunk.content_type,
                "score": round3(r.combined_score),
                "heading": r.chunk.heading,
                "content": truncate_chars(&r.chunk.content, RESULT_CONTENT_CHARS),
            })
        })
        .collect();

    serde_json::to_string_pretty(&json!({
        "query": query,
        "total_results": result.total_results,
        "query_time_ms": result.query_time_ms,
        "results": formatted,
    }))
    .unwrap_or_default()
}

fn handle_index_project(manager: &Arc<ProjectManager>, limiter: &RateLimiter) -> String {
    if !limiter.try_acquire() {
        return serde_json::to_string_pretty(&json!({
            "error": "Rate limited. index_project is an expensive operation. \
                Please wait before trying again.",
        }))
        .unwrap_or_default();
    }

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => return tool_error_json("index_project", &e.to_string()),
    };

    match manager.reindex_project(&cwd) {
        Ok(index) => serde_json::to_string_pretty(&json!({
            "message": "Project indexed successfully",
            "project_path": index.project_path,
            "total_files": index.total_files,
            "total_chunks": index.total_chunks,
            "embedding_model": index.embedding_model,
        }))
        .unwrap_or_default(),
        Err(e) => tool_error_json("index_project", &e.to_string()),
    }
}

fn handle_list_projects(manager: &Arc<ProjectManager>) -> String {
    let projects = manager.list_projects();
    if projects.is_empty() {
        return serde_json::to_string_pretty(&json!({
            "message": "No indexed projects found",
            "projects": [],
        }))
        .unwrap_or_default();
    }

    let formatted: Vec<Value> = projects
        .iter()
        .map(|p| {
            json!({
                "project_id": p.project_id,
                "project_path": p.project_path,
                "total_files": p.total_files,
                "total_chunks": p.total_chunks,
                "last_updated": p.last_updated,
                "index_mode": p.index_mode,
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "projects": formatted })).unwrap_or_default()
}

fn handle_project_status(manager: &Arc<ProjectManager>) -> String {
    match manager.get_project_status(None) {
        Ok(Some(status)) => serde_json::to_string_pretty(&status).unwrap_or_default(),
        Ok(None) => {
            let cwd = std::env::current_dir().unwrap_or_default();
            serde_json::to_string_pretty(&json!({
                "message": "Current project is not indexed. Use index_project to create the index.",
                "project_path": cwd.to_string_lossy(),
            }))
            .unwrap_or_default()
        }
        Err(e) => tool_error_json("project_status", &e.to_string()),
    }
}

fn tool_error_json(tool: &str, message: &str) -> String {
    error!(tool, error = sanitize_for_logging(message).as_str(), "Tool call failed");
    serde_json::to_string_pretty(&json!({
        "error": sanitize_error_message(message),
        "tool": tool,
    }))
    .unwrap_or_default()
}

/// Dispatch one tool call by name. Returns the JSON text body for the
/// response content.
pub fn handle_tool_call(
    manager: &Arc<ProjectManager>,
    limiter: &RateLimiter,
    name: &str,
    args: &Value,
) -> String {
    match name {
        "query_project" => handle_query_project(manager, args),
        "index_project" => handle_index_project(manager, limiter),
        "list_projects" => handle_list_projects(manager),
        "project_status" => handle_project_status(manager),
        _ => serde_json::to_string_pretty(&json!({
            "error": format!("Unknown tool: {name}"),
            "valid_tools": VALID_TOOLS,
        }))
        .unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC dispatch (shared between the stdio loop and tests)
// ---------------------------------------------------------------------------

fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == client_version)
        .copied()
        .unwrap_or_else(|| SUPPORTED_PROTOCOL_VERSIONS[SUPPORTED_PROTOCOL_VERSIONS.len() - 1])
}

/// Process a single JSON-RPC request and return the response.
/// Returns `None` for notifications (no `id` field).
pub fn dispatch_jsonrpc(
    manager: &Arc<ProjectManager>,
    limiter: &RateLimiter,
    msg: &Value,
) -> Option<Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();

    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => {
            let client_version = msg["params"]["protocolVersion"].as_str().unwrap_or("");
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiate_version(client_version),
                    "capabilities": {
                        "tools": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": "context-engine",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": SERVER_INSTRUCTIONS
                }
            })
        }
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tool_definitions() }
        }),
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments = msg["params"].get("arguments").cloned().unwrap_or(json!({}));
            let text = handle_tool_call(manager, limiter, tool_name, &arguments);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "content": [{ "type": "text", "text": text }],
                    "isError": false
                }
            })
        }
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    };

    Some(response)
}

// ---------------------------------------------------------------------------
// Stdio server loop
// ---------------------------------------------------------------------------

/// Run the MCP stdio loop until stdin closes.
///
/// Tool calls are dispatched onto the blocking pool and their responses
/// funneled through one writer task, so a slow index build never blocks
/// the transport. Responses may complete out of order; clients match on id.
pub async fn run_mcp(manager: Arc<ProjectManager>) {
    let limiter = Arc::new(RateLimiter::new(INDEX_RATE_CAPACITY, INDEX_RATE_REFILL_PER_SEC));
    let mut initialized = false;

    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.write_all(b"\n").await;
            let _ = stdout.flush().await;
        }
    });

    info!("MCP server ready");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": "Parse error" }
                });
                let _ = out_tx.send(err.to_string());
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("").to_string();
        if method.starts_with("notifications/") {
            continue;
        }

        // Init ordering: reject everything but initialize and ping first
        if !initialized && method != "initialize" && method != "ping" {
            if let Some(id) = msg.get("id").cloned() {
                let err = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32002,
                        "message": "Server not initialized. Send 'initialize' first."
                    }
                });
                let _ = out_tx.send(err.to_string());
            }
            continue;
        }
        if method == "initialize" {
            initialized = true;
        }

        if method == "tools/call" {
            // CPU-bound work goes to the blocking pool; the read loop moves on.
            let manager = Arc::clone(&manager);
            let limiter = Arc::clone(&limiter);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let response = tokio::task::spawn_blocking(move || {
                    dispatch_jsonrpc(&manager, &limiter, &msg)
                })
                .await
                .ok()
                .flatten();
                if let Some(response) = response {
                    let _ = out_tx.send(response.to_string());
                }
            });
        } else if let Some(response) = dispatch_jsonrpc(&manager, &limiter, &msg) {
            let _ = out_tx.send(response.to_string());
        }
    }

    drop(out_tx);
    let _ = writer.await;
}

/// Handle on manager plus rate limiter for harnesses that drive the
/// dispatch function directly.
pub fn new_rate_limiter() -> RateLimiter {
    RateLimiter::new(INDEX_RATE_CAPACITY, INDEX_RATE_REFILL_PER_SEC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_strips_unix_paths_to_basenames() {
        let msg = "failed to open /home/alice/project/secret/config.toml for reading";
        let clean = sanitize_error_message(msg);
        assert!(!clean.contains("/home"), "got: {clean}");
        assert!(clean.contains("config.toml"));
    }

    #[test]
    fn sanitizer_strips_windows_and_unc_paths() {
        let clean = sanitize_error_message(r"error at C:\Users\bob\app\main.rs");
        assert!(!clean.contains(r"C:\Users"), "got: {clean}");
        assert!(clean.contains("main.rs"));

        let clean = sanitize_error_message(r"cannot read \\server\share\file.txt");
        assert!(!clean.contains("server"), "got: {clean}");
        assert!(clean.contains("file.txt"));
    }

    #[test]
    fn sanitizer_strips_traversal_line_refs_and_addresses() {
        let clean = sanitize_error_message("open ../../etc/passwd failed, line 42 at 0xdeadbeef");
        assert!(!clean.contains(".."), "got: {clean}");
        assert!(clean.contains("passwd"));
        assert!(!clean.contains("line 42"));
        assert!(clean.contains("0x***"));
        assert!(!clean.contains("0xdeadbeef"));
    }

    #[test]
    fn sanitizer_collapses_module_paths_and_truncates() {
        let clean = sanitize_error_message("raised in app.services.auth.validate");
        assert!(clean.contains("[module]"), "got: {clean}");

        let long = "x".repeat(600);
        let clean = sanitize_error_message(&long);
        assert!(clean.ends_with("...[truncated]"));
        assert!(clean.chars().count() <= MAX_ERROR_LEN + "...[truncated]".len());
    }

    #[test]
    fn log_sanitizer_truncates_long_content() {
        let short = sanitize_for_logging("short message");
        assert_eq!(short, "short message");

        let long = "y".repeat(MAX_LOG_CONTENT_LEN + 100);
        let clean = sanitize_for_logging(&long);
        assert!(clean.ends_with("...[TRUNCATED]"));
    }

    #[test]
    fn rate_limiter_allows_burst_then_blocks() {
        let limiter = RateLimiter::new(5.0, 5.0 / 60.0);
        for i in 0..5 {
            assert!(limiter.try_acquire(), "request {i} should pass");
        }
        assert!(!limiter.try_acquire(), "sixth request should be limited");
    }

    #[test]
    fn rate_limiter_refills_over_time() {
        // Fast refill so the test does not sleep for real minutes
        let limiter = RateLimiter::new(1.0, 1000.0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn protocol_version_negotiation_echoes_known_versions() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("2025-06-18"), "2025-06-18");
        // Unknown versions fall back to the newest supported revision
        assert_eq!(negotiate_version("1999-01-01"), "2025-06-18");
    }

    #[test]
    fn score_rounding_keeps_three_decimals() {
        assert_eq!(round3(0.123456), 0.123);
        assert_eq!(round3(0.9999), 1.0);
        assert_eq!(round3(0.0), 0.0);
    }
}
