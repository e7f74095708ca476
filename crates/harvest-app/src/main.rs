//! Harvest - traffic capture and analysis pipeline.
//!
//! This is the main binary that runs the full pipeline:
//! - Intercepting proxy (records traffic into the session)
//! - HTTP control API (entries, filter, export/import, workflows, events)
//! - Backend client for analysis and test creation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use directories::ProjectDirs;
use harvest_backend::{BackendConfig, HttpBackend, Orchestrator, StaticToken, DEFAULT_BASE_URL};
use harvest_core::{Session, SessionConfig, SessionEvent};
use harvest_proxy::{CaManager, PortAllocator, ProxyConfig, ProxyServer};
use harvest_server::{AppState, Server, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
use harvest_storage::Database;
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Harvest - capture HTTP traffic and turn it into API tests
#[derive(Parser, Debug)]
#[command(name = "harvest", version, about)]
struct Args {
    /// First port tried for the capture proxy
    #[arg(long, default_value_t = 1234)]
    proxy_port_start: u16,

    /// Last port tried for the capture proxy
    #[arg(long, default_value_t = 1239)]
    proxy_port_end: u16,

    /// Host for the control API
    #[arg(long, default_value = DEFAULT_HOST)]
    api_host: String,

    /// Port for the control API
    #[arg(long, default_value_t = DEFAULT_PORT)]
    api_port: u16,

    /// Directory exported HAR files are written to
    #[arg(long)]
    downloads_dir: Option<PathBuf>,

    /// Directory holding the proxy CA certificate and key
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Settings database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Backend API base URL
    #[arg(long, env = "HARVEST_BACKEND_URL", default_value = DEFAULT_BASE_URL)]
    backend_url: String,

    /// Bearer token for the backend
    #[arg(long, env = "HARVEST_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Backend request timeout in seconds
    #[arg(long, default_value_t = 30)]
    backend_timeout: u64,

    /// Start with recording enabled
    #[arg(long)]
    record: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        match &self.downloads_dir {
            Some(dir) => SessionConfig::default().with_downloads_dir(dir),
            None => SessionConfig::default(),
        }
    }

    fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.backend_url)
            .with_timeout(Duration::from_secs(self.backend_timeout))
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_host(&self.api_host)
            .with_port(self.api_port)
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "harvest", "harvest").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging with file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("harvest={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("harvest")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

/// Logs session events until the bus closes.
fn spawn_event_logger(session: &Session) {
    let mut rx = session.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::AnalyzeFailed { error })
                | Ok(SessionEvent::CreateTestFailed { error })
                | Ok(SessionEvent::ExportFailed { error })
                | Ok(SessionEvent::ImportFailed { error }) => {
                    tracing::warn!("Session error: {}", error)
                }
                Ok(event) => tracing::debug!("Session event: {}", event.kind()),
                Err(RecvError::Lagged(n)) => tracing::debug!("Event logger skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(&args);

    tracing::info!("Starting Harvest...");
    tracing::debug!("Args: {:?}", args);

    let db = match &args.db_path {
        Some(path) => Database::with_path(path),
        None => Database::new(),
    }
    .map_err(|e| anyhow::anyhow!("Database error: {}", e))?;

    let session = Arc::new(Session::with_store(args.session_config(), Arc::new(db)));
    session.set_recording(args.record);
    spawn_event_logger(&session);

    // Capture proxy
    let allocator = PortAllocator::new(args.proxy_port_start..=args.proxy_port_end);
    let listener = allocator.bind()?;
    let proxy_port = listener.local_addr()?.port();
    let mut proxy_config = ProxyConfig::new(proxy_port)?;
    if let Some(dir) = &args.ca_dir {
        proxy_config = proxy_config.with_ca_manager(CaManager::new(dir));
    }
    let proxy = ProxyServer::new(proxy_config, session.clone())?;
    tracing::info!("CA certificate: {:?}", proxy.ca_cert_path());
    let proxy = proxy.start_with_listener(listener)?;
    tracing::info!("Capture proxy listening on {}", proxy.addr());

    // Backend workflows
    let backend = HttpBackend::with_auth(
        args.backend_config(),
        Arc::new(StaticToken(args.token.clone())),
    )?;
    let orchestrator = Arc::new(Orchestrator::new(session.clone(), Arc::new(backend)));

    // Control API (runs until ctrl-c)
    let state = AppState::new(session, orchestrator, proxy_port);
    let server = Server::new(args.server_config(), state)?;
    let result = server.run_until(shutdown_signal()).await;

    proxy.stop().await;
    result?;

    tracing::info!("Harvest shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["harvest"]).unwrap();
        assert_eq!(args.proxy_port_start, 1234);
        assert_eq!(args.proxy_port_end, 1239);
        assert_eq!(args.api_port, DEFAULT_PORT);
        assert!(!args.record);

        let server = args.server_config();
        assert_eq!(server.host, DEFAULT_HOST);
    }

    #[test]
    fn downloads_dir_flows_into_session_config() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from([
            "harvest",
            "--downloads-dir",
            dir.path().to_str().unwrap(),
            "--record",
        ])
        .unwrap();

        assert_eq!(args.session_config().downloads_dir, dir.path());
        assert!(args.record);
    }
}
