//! Error types for the proxy.

use std::ops::RangeInclusive;

use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaManagerError),

    /// No listening port could be allocated.
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// CA manager error type.
#[derive(Debug, Error)]
pub enum CaManagerError {
    /// Failed to generate CA certificate.
    #[error("Failed to generate CA: {0}")]
    Generation(String),

    /// Failed to read CA certificate.
    #[error("Failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse CA certificate.
    #[error("Failed to parse CA: {0}")]
    Parse(String),

    /// Failed to write CA certificate.
    #[error("Failed to write CA: {0}")]
    Write(String),
}

/// Port allocation error.
#[derive(Debug, Error)]
pub enum PortError {
    /// Every port in the range is taken.
    #[error("no free port in {}..={}", .0.start(), .0.end())]
    Exhausted(RangeInclusive<u16>),

    /// The allocated listener was already handed out.
    #[error("port {0} is already bound")]
    AlreadyBound(u16),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
