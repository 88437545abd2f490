//! Streamable HTTP transport.
//!
//! Each MCP session gets its own service over the shared pools. Pools are
//! drained once the listener stops.

use crate::error::{DbError, DbResult};
use crate::mcp::{MultiDbService, ServiceContext};
use crate::transport::{Transport, wait_for_signal};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// SSE streams can hold the server open; force it down after this long.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves MCP over HTTP with SSE responses.
pub struct HttpTransport {
    context: ServiceContext,
    shutdown_grace: Duration,
    host: String,
    port: u16,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        context: ServiceContext,
        shutdown_grace: Duration,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            context,
            shutdown_grace,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl HttpTransport {
    /// Router serving MCP at the configured endpoint, one service per session.
    fn router(&self) -> axum::Router {
        let context = self.context.clone();
        let service = StreamableHttpService::new(
            move || Ok(MultiDbService::new(&context)),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // nest_service rejects "/"
        match self.endpoint.as_str() {
            "/" => axum::Router::new().fallback_service(service),
            path => axum::Router::new().nest_service(path, service),
        }
    }
}

/// Resolves once the server should stop waiting for open streams.
async fn forced_stop(notified: Arc<Notify>) {
    notified.notified().await;
    info!(
        timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
        "Waiting for sessions to close (signal again to force exit)"
    );
    tokio::select! {
        _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => warn!("Session drain timed out"),
        _ = wait_for_signal() => warn!("Second signal received, exiting now"),
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let app = self.router();

        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| DbError::internal(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        info!(addr = %bind_addr, endpoint = %self.endpoint, "HTTP transport listening");

        let stop = Arc::new(Notify::new());
        let on_signal = {
            let stop = stop.clone();
            async move {
                wait_for_signal().await;
                stop.notify_one();
            }
        };
        let server = axum::serve(listener, app).with_graceful_shutdown(on_signal);

        let outcome = tokio::select! {
            served = server => served.map_err(|e| {
                error!(error = %e, "HTTP server failed");
                DbError::internal(format!("HTTP server error: {}", e))
            }),
            _ = forced_stop(stop.clone()) => Ok(()),
        };

        self.context.pools.shutdown(self.shutdown_grace).await;
        info!("HTTP transport stopped");
        outcome
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AdapterRegistry, PoolManager};

    fn transport(host: &str, port: u16, endpoint: &str) -> HttpTransport {
        let registry = Arc::new(AdapterRegistry::new(Vec::new()).unwrap());
        let pools = Arc::new(PoolManager::new(registry));
        let context = ServiceContext::new(pools, Duration::from_secs(1), Duration::from_secs(1));
        HttpTransport::new(context, Duration::from_secs(1), host, port, endpoint)
    }

    #[test]
    fn test_http_transport_creation() {
        let transport = transport("127.0.0.1", 8080, "/mcp");
        assert_eq!(transport.name(), "http");
        assert_eq!(transport.bind_addr(), "127.0.0.1:8080");
        assert_eq!(transport.endpoint(), "/mcp");
    }

    #[test]
    fn test_http_transport_root_endpoint() {
        let transport = transport("0.0.0.0", 3000, "/");
        assert_eq!(transport.bind_addr(), "0.0.0.0:3000");
        assert_eq!(transport.endpoint(), "/");
    }
}
