//! Harvest Proxy - intercepting proxy for traffic capture.
//!
//! Terminates client TLS with per-host certificates signed by a local root
//! CA, forwards every request unchanged and reports each exchange to the
//! capture [`Session`](harvest_core::Session).
//!
//! ## Architecture
//!
//! ```text
//! Client → Proxy → CaptureHandler ─ recording? ─ no ──→ Upstream
//!                        │                 yes
//!                        ▼
//!                 EntryConstructor (request/response frames)
//!                        │
//!                        ▼
//!                 Session::record → store + live event
//! ```

mod ca;
mod error;
mod handler;
mod port;
mod proxy;

pub use ca::{CaManager, CaManagerError};
pub use error::{PortError, ProxyError, Result};
pub use handler::CaptureHandler;
pub use port::{PortAllocator, DEFAULT_PORT_RANGE};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
