//! Listening port selection.
//!
//! Binds the first free port of a fixed range in ascending order and hands the
//! bound listener to the proxy, so the port cannot be taken between selection
//! and use. The chosen port is cached for queries.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::ops::RangeInclusive;
use std::sync::OnceLock;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::PortError;

/// Default candidate range.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 1234..=1239;

/// Binds a non-blocking TCP listener on `addr` with `SO_REUSEADDR`.
pub(crate) fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

/// Picks the proxy port and owns its listener until handed over.
#[derive(Debug)]
pub struct PortAllocator {
    host: IpAddr,
    range: RangeInclusive<u16>,
    selected: OnceLock<u16>,
}

impl PortAllocator {
    /// Creates an allocator over `range` on localhost.
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            range,
            selected: OnceLock::new(),
        }
    }

    /// Sets the interface to bind.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Candidate range.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Returns the cached port, if one was allocated.
    pub fn selected(&self) -> Option<u16> {
        self.selected.get().copied()
    }

    /// Binds the first free port in the range and returns its listener.
    ///
    /// The listener is handed out once; a second call fails with
    /// [`PortError::AlreadyBound`]. Failure is not cached.
    pub fn bind(&self) -> Result<TcpListener, PortError> {
        if let Some(port) = self.selected() {
            return Err(PortError::AlreadyBound(port));
        }

        let (port, listener) = self
            .range
            .clone()
            .find_map(|port| self.try_bind(port).map(|listener| (port, listener)))
            .ok_or_else(|| PortError::Exhausted(self.range.clone()))?;

        if self.selected.set(port).is_err() {
            return Err(PortError::AlreadyBound(self.selected().unwrap_or(port)));
        }
        tracing::info!("Allocated proxy port {}", port);
        Ok(listener)
    }

    fn try_bind(&self, port: u16) -> Option<TcpListener> {
        match bind_listener(SocketAddr::new(self.host, port)) {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::debug!("Port {} unavailable: {}", port, e);
                None
            }
        }
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn default_range() {
        assert_eq!(PortAllocator::default().range(), 1234..=1239);
    }

    #[test]
    fn occupied_range_is_exhausted() {
        let (_held, port) = ephemeral_port();
        let allocator = PortAllocator::new(port..=port);

        let err = allocator.bind().unwrap_err();
        assert!(matches!(err, PortError::Exhausted(ref r) if *r == (port..=port)));
        assert_eq!(allocator.selected(), None);
    }

    #[test]
    fn returned_listener_holds_the_port() {
        let (held, port) = ephemeral_port();
        drop(held);
        let allocator = PortAllocator::new(port..=port);

        let listener = allocator.bind().unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
        assert_eq!(allocator.selected(), Some(port));

        // Nobody else can take it while the listener is alive.
        assert!(TcpListener::bind(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn listener_is_handed_out_once() {
        let (held, port) = ephemeral_port();
        drop(held);
        let allocator = PortAllocator::new(port..=port);

        let _listener = allocator.bind().unwrap();
        assert!(matches!(allocator.bind(), Err(PortError::AlreadyBound(p)) if p == port));
        assert_eq!(allocator.selected(), Some(port));
    }
}
