//! Ingest server setup and configuration.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::routes;
use crate::error::{Error, Result};
use crate::ingest::IngestDispatcher;

/// Server listen configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ApiServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::ApiError(format!("Invalid address: {}", e)))
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Upload dispatcher shared by all connections
    pub dispatcher: Arc<IngestDispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<IngestDispatcher>) -> Self {
        Self {
            start_time: Instant::now(),
            dispatcher,
        }
    }
}

/// HTTP ingest server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token that stops the server.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            // Upload size is bounded by the ingest configuration instead.
            .layer(DefaultBodyLimit::disable())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.socket_addr()?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ApiError(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Serve on an already bound listener until the cancel token fires.
    ///
    /// Cancellation closes the listener immediately; requests still in flight
    /// are not waited for.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Ingest server listening on http://{}", addr);
        }

        let router = self.build_router();
        let cancel_token = self.cancel_token.clone();

        tokio::select! {
            result = axum::serve(listener, router).into_future() => {
                result.map_err(|e| Error::ApiError(format!("Server error: {}", e)))?;
            }
            _ = cancel_token.cancelled() => {
                tracing::info!("Ingest server shutting down...");
            }
        }

        Ok(())
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
