//! Context Engine binary: a thin CLI shell over the engine library.
//!
//! Configuration comes from `CONTEXT_ENGINE_*` environment variables with
//! CLI flag overrides. Diagnostics go to stderr; stdout belongs to the MCP
//! protocol.

use clap::Parser;
use context_engine_server::config::EngineConfig;
use context_engine_server::manager::ProjectManager;
use context_engine_server::mcp::run_mcp;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Local content indexing and hybrid retrieval engine, exposed to AI
/// assistants over MCP.
#[derive(Parser)]
#[command(name = "context-engine", version, about, long_about = None)]
struct Cli {
    /// Storage base path (overrides CONTEXT_ENGINE_INDEX_PATH)
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// Embedding model identifier (overrides CONTEXT_ENGINE_EMBEDDING_MODEL)
    #[arg(long)]
    embedding_model: Option<String>,

    /// Dense score weight in [0, 1] (overrides CONTEXT_ENGINE_SEMANTIC_WEIGHT)
    #[arg(long)]
    semantic_weight: Option<f32>,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    let log_level = std::env::var("CONTEXT_ENGINE_LOG_LEVEL")
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let directive = format!("context_engine_server={log_level}")
        .parse()
        .unwrap_or_else(|_| "context_engine_server=info".parse().expect("static directive"));
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(path) = cli.index_path {
        config.index_path = Some(path);
    }
    if let Some(model) = cli.embedding_model {
        config.embedding_model = model;
    }
    if let Some(weight) = cli.semantic_weight {
        if !weight.is_finite() {
            error!("--semantic-weight must be a finite number");
            std::process::exit(1);
        }
        config.semantic_weight = weight.clamp(0.0, 1.0);
    }

    info!(
        model = config.embedding_model.as_str(),
        semantic_weight = config.semantic_weight,
        "Starting Context Engine MCP server"
    );

    let manager = match ProjectManager::from_config(&config) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Fatal initialization error");
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = run_mcp(Arc::clone(&manager)) => info!("stdin closed, shutting down"),
        _ = shutdown_signal() => {}
    }

    manager.shutdown();
}
