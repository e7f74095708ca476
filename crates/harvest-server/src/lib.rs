//! Harvest Server - local control API.
//!
//! Exposes the capture session and backend workflows over HTTP for the
//! presentation layer.
//!
//! ## Endpoints
//!
//! - `GET /api/entries?filtered=&only_relevant=` - List entries
//! - `DELETE /api/entries` - Clear all entries
//! - `DELETE /api/entries/{id}` - Delete one entry
//! - `POST /api/entries/delete` - Delete several entries
//! - `POST /api/entries/relevant` - Mark entries relevant again
//! - `GET|PUT /api/recording` - Recording gate
//! - `GET|PUT /api/filter` - URL filter pattern
//! - `POST /api/export` - Export entries to a HAR file
//! - `POST /api/import` - Replace entries from a HAR file
//! - `POST /api/analyze` - Start analysis
//! - `POST /api/tests` - Start test creation
//! - `GET /api/workflows` - Workflow states
//! - `GET /api/proxy` - Proxy port
//! - `GET /api/events` - Server-sent session events

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 48780;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/entries",
            get(handlers::list_entries).delete(handlers::clear_entries),
        )
        .route("/api/entries/{id}", delete(handlers::delete_entry))
        .route("/api/entries/delete", post(handlers::delete_entries))
        .route("/api/entries/relevant", post(handlers::mark_relevant))
        .route(
            "/api/recording",
            get(handlers::get_recording).put(handlers::set_recording),
        )
        .route(
            "/api/filter",
            get(handlers::get_filter).put(handlers::set_filter),
        )
        .route("/api/export", post(handlers::export))
        .route("/api/import", post(handlers::import))
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/tests", post(handlers::create_test))
        .route("/api/workflows", get(handlers::workflows))
        .route("/api/proxy", get(handlers::proxy))
        .route("/api/events", get(handlers::events))
        .layer(cors)
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server for `state`.
    pub fn new(config: ServerConfig, state: AppState) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until `shutdown` resolves.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::result::Result<(), ServerError> {
        info!("Starting Harvest API server on {}", self.addr);
        let listener = self.bind()?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("API server stopped");
        Ok(())
    }

    /// Runs the server until the process exits.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    fn bind(&self) -> std::result::Result<tokio::net::TcpListener, ServerError> {
        let bind_err = |e| ServerError::BindError(self.addr, e);
        let domain = if self.addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
        // Rebind promptly after a restart while old sockets linger in TIME_WAIT
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.bind(&self.addr.into()).map_err(bind_err)?;
        socket.listen(128).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;

        let std_listener: std::net::TcpListener = socket.into();
        tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
