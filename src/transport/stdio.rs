//! Stdio transport for the MCP server.
//!
//! This transport uses standard input/output for communication,
//! which is the standard mode for CLI-based MCP integrations.

use crate::error::{DbError, DbResult};
use crate::mcp::{MultiDbService, ServiceContext};
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::time::Duration;
use tracing::{info, warn};

/// Stdio transport implementation.
///
/// This transport reads JSON-RPC messages from stdin and writes
/// responses to stdout, one message per line.
pub struct StdioTransport {
    context: ServiceContext,
    shutdown_grace: Duration,
}

impl StdioTransport {
    pub fn new(context: ServiceContext, shutdown_grace: Duration) -> Self {
        Self {
            context,
            shutdown_grace,
        }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = MultiDbService::new(&self.context);
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        self.context.pools.shutdown(self.shutdown_grace).await;
                        return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        self.context.pools.shutdown(self.shutdown_grace).await;

        if shutdown_requested {
            // stdin reads block; select! cannot interrupt them
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AdapterRegistry, PoolManager};
    use std::sync::Arc;

    #[test]
    fn test_stdio_transport_creation() {
        let registry = Arc::new(AdapterRegistry::new(Vec::new()).unwrap());
        let pools = Arc::new(PoolManager::new(registry));
        let context = ServiceContext::new(pools, Duration::from_secs(1), Duration::from_secs(1));
        let transport = StdioTransport::new(context, Duration::from_secs(1));
        assert_eq!(transport.name(), "stdio");
    }
}
