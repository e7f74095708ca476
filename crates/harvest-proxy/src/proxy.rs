//! Intercepting proxy server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use harvest_core::Session;
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use crate::ca::CaManager;
use crate::error::{ProxyError, Result};
use crate::handler::CaptureHandler;
use crate::port::bind_listener;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// The CA manager for certificate generation.
    pub ca_manager: CaManager,
}

impl ProxyConfig {
    /// Creates a configuration on `port` using the default CA directory.
    pub fn new(port: u16) -> Result<Self> {
        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            ca_manager: CaManager::with_default_dir()?,
        })
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the CA manager.
    pub fn with_ca_manager(mut self, ca_manager: CaManager) -> Self {
        self.ca_manager = ca_manager;
        self
    }
}

/// Intercepting proxy that records into a [`Session`].
pub struct ProxyServer {
    config: ProxyConfig,
    session: Arc<Session>,
}

impl ProxyServer {
    /// Creates a server, generating the CA if it does not exist yet.
    pub fn new(config: ProxyConfig, session: Arc<Session>) -> Result<Self> {
        config.ca_manager.ensure_ca()?;
        Ok(Self { config, session })
    }

    /// Returns the address the proxy listens on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for user installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Builds the hudsucker proxy on `listener` and returns its serve future.
    ///
    /// Runs before anything is spawned so setup failures reach the caller.
    fn build(
        &self,
        listener: std::net::TcpListener,
    ) -> Result<(
        SocketAddr,
        impl Future<Output = std::result::Result<(), hudsucker::Error>> + Send + 'static,
    )> {
        let addr = listener.local_addr()?;
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let authority = self.config.ca_manager.ensure_ca()?;
        let handler = CaptureHandler::new(self.session.clone());

        let proxy = Proxy::builder()
            .with_listener(listener)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler.clone())
            .with_websocket_handler(handler)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        Ok((addr, proxy.start()))
    }

    /// Runs the proxy on the configured address until it fails.
    pub async fn run(self) -> Result<()> {
        let listener = bind_listener(self.config.addr)?;
        let (addr, serve) = self.build(listener)?;

        tracing::info!("Starting capture proxy on {}", addr);
        tracing::info!("CA certificate: {:?}", self.ca_cert_path());

        serve
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Binds the configured address and serves in the background.
    ///
    /// Returns an error if the address cannot be bound.
    pub fn start(self) -> Result<ProxyHandle> {
        let listener = bind_listener(self.config.addr)?;
        self.start_with_listener(listener)
    }

    /// Serves on an already bound listener, such as one from
    /// [`PortAllocator::bind`](crate::PortAllocator::bind).
    pub fn start_with_listener(self, listener: std::net::TcpListener) -> Result<ProxyHandle> {
        let (addr, serve) = self.build(listener)?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tracing::info!("Starting capture proxy on {}", addr);

        let handle = tokio::spawn(async move {
            tokio::select! {
                result = serve => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::SessionConfig;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ProxyConfig {
        ProxyConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ca_manager: CaManager::new(dir.path().join("ca")),
        }
    }

    fn session(dir: &TempDir) -> Arc<Session> {
        Arc::new(Session::new(
            SessionConfig::default().with_downloads_dir(dir.path()),
        ))
    }

    #[test]
    fn config_with_port() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir).with_port(1235);
        assert_eq!(config.addr.port(), 1235);
    }

    #[test]
    fn new_server_generates_ca() {
        let dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&dir), session(&dir)).unwrap();

        assert!(server.ca_cert_path().exists());
        assert!(server
            .ca_cert_path()
            .to_string_lossy()
            .ends_with("harvest-ca.crt"));
    }

    #[tokio::test]
    async fn start_on_occupied_port_fails() {
        let dir = TempDir::new().unwrap();
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = test_config(&dir).with_addr(held.local_addr().unwrap());
        let server = ProxyServer::new(config, session(&dir)).unwrap();

        assert!(matches!(server.start(), Err(ProxyError::Io(_))));
    }

    #[tokio::test]
    async fn start_with_allocated_listener() {
        let dir = TempDir::new().unwrap();
        let (held, port) = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = l.local_addr().unwrap().port();
            (l, port)
        };
        drop(held);
        let allocator = crate::PortAllocator::new(port..=port);
        let listener = allocator.bind().unwrap();

        let server = ProxyServer::new(test_config(&dir), session(&dir)).unwrap();
        let handle = server.start_with_listener(listener).unwrap();
        assert_eq!(handle.addr().port(), port);

        tokio::net::TcpStream::connect(handle.addr()).await.unwrap();
        handle.stop().await;
    }

    #[tokio::test]
    async fn handle_shutdown() {
        let dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&dir), session(&dir)).unwrap();

        let handle = server.start().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.stop().await;
    }
}
