//! Binary entry point (spec.md §6 "EXTERNAL INTERFACES"): wires shared
//! state, mounts the MCP Streamable HTTP service into an `axum::Router`, and
//! serves it with signal-aware graceful shutdown. Grounded on the teacher's
//! `main.rs` for the tracing/config/signal-handling shape, and on
//! `ConaryLabs-Mira`'s `web::mcp_http`/`web::mod` for the
//! `StreamableHttpService` + `axum::Router` wiring the teacher's own
//! stdio-only `main.rs` doesn't need.

mod bridge;
mod builtin;
mod cache;
mod config;
mod discovery;
mod hub;
mod legacy;
mod model;
mod registry;
mod schema;
mod selection;
mod server;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::{MetadataCache, SchemaCache};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::registry::Registry;
use crate::server::GradioMcpServer;

/// Command-line flags. Everything else is configured via environment
/// variables (spec.md §6); there is no config file.
#[derive(Debug, Parser)]
#[command(version, about = "Aggregating MCP server for built-in hub tools and Gradio Space tools")]
struct Cli {
    /// Address to bind the Streamable HTTP MCP endpoint to.
    #[arg(long, env = "GRADIO_MCP_BIND", default_value = "127.0.0.1:3333")]
    bind: SocketAddr,

    /// Log level / `tracing_subscriber::EnvFilter` directive.
    #[arg(long, env = "GRADIO_MCP_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::from_env();
    info!(bind = %cli.bind, "gradio-mcp-proxy starting");

    let client = reqwest::Client::builder()
        .build()
        .expect("failed to build the shared HTTP client");
    let metadata_cache = Arc::new(MetadataCache::new(config.space_cache_ttl));
    let schema_cache = Arc::new(SchemaCache::new(config.schema_cache_ttl));
    let discovery = Arc::new(Discovery::new(
        Arc::clone(&metadata_cache),
        Arc::clone(&schema_cache),
        client.clone(),
        config.clone(),
    ));
    let registry = Arc::new(Registry::new(
        metadata_cache,
        schema_cache,
        discovery,
        client,
        config.clone(),
    ));

    // Named bouquets/mixes (spec.md §4.6) are sourced from the service
    // catalogue at runtime, not hardcoded here; with none configured, the
    // bouquet/mix headers simply have nothing to resolve against and
    // selection falls through to user settings or the full built-in set.
    let known_bouquets = Vec::new();

    let cancellation_token = CancellationToken::new();
    let ct = cancellation_token.clone();
    let service_factory = move || {
        Ok(GradioMcpServer::new(
            Arc::clone(&registry),
            known_bouquets.clone(),
            config.search_enables_fetch,
        ))
    };
    let session_manager = Arc::new(LocalSessionManager::default());
    let http_config = StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        sse_retry: Some(Duration::from_secs(3)),
        stateful_mode: true,
        cancellation_token: ct,
    };
    let mcp_service = StreamableHttpService::new(service_factory, session_manager, http_config);

    let router = Router::new().nest_service("/mcp", mcp_service);

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    info!(bind = %cli.bind, "listening for MCP Streamable HTTP connections");

    let shutdown_token = cancellation_token.clone();
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_token.cancel();
    });

    if let Err(e) = serve.await {
        warn!(error = %e, "server exited with error");
    }

    info!("shut down");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}
