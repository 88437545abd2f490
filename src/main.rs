//! Multi-Database MCP Server - Main entry point.
//!
//! This server provides MCP (Model Context Protocol) tools for AI assistants
//! to query and introspect SQL databases (PostgreSQL, MySQL, SQL Server, SQLite).

use clap::Parser;
use multidb_mcp_server::config::{Config, TransportMode};
use multidb_mcp_server::db::{AdapterRegistry, PoolManager};
use multidb_mcp_server::mcp::ServiceContext;
use multidb_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr; stdout carries the
/// stdio protocol.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        transport = %config.transport,
        config_path = %config.config_path.display(),
        "Starting Multi-Database MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let databases = match config.load_databases() {
        Ok(databases) => databases,
        Err(e) => {
            error!(error = %e, "Invalid database configuration");
            return Err(e.into());
        }
    };
    if databases.is_empty() {
        error!(config_path = %config.config_path.display(), "No databases configured");
        return Err("at least one database must be configured".into());
    }

    let registry = Arc::new(AdapterRegistry::new(databases)?);
    let pools = Arc::new(PoolManager::new(registry));

    // Unreachable databases stay registered and are retried on first use
    pools.connect_all().await;

    let context = ServiceContext::new(
        pools,
        config.query_timeout_duration(),
        config.fanout_timeout_duration(),
    );
    let grace = config.shutdown_grace_duration();

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(context, grace).run().await,
        TransportMode::Http => {
            info!(
                bind = %config.http_bind_addr(),
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                context,
                grace,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
