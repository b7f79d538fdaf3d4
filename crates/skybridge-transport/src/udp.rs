// ============================================
// File: crates/skybridge-transport/src/udp.rs
// ============================================
//! # UDP Transport Implementation
//!
//! ## Creation Reason
//! Provides the UDP sockets a drone session uses for its control, status
//! and video channels, wrapping Tokio's UDP socket with our `Transport`
//! trait.
//!
//! ## Main Functionality
//! - `UdpTransport`: Main UDP transport implementation
//! - Socket binding with address reuse
//! - Async send/receive operations
//! - Graceful shutdown support
//!
//! ## Design Choices
//! - Uses SO_REUSEADDR so a reclaimed status port can be rebound
//!   immediately by the next session that leases it
//! - Non-blocking operations with Tokio
//! - Atomic shutdown flag for coordinated cleanup
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless - no guaranteed delivery
//! - The shutdown flag is checked on entry to recv/send; a task blocked in
//!   a receive only notices shutdown when its own timeout fires, which is
//!   why callers use `recv_timeout`
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP transport implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{PacketSource, Transport};

// ============================================
// UdpTransport
// ============================================

/// UDP-based transport implementation.
///
/// # Features
/// - Async send/receive using Tokio
/// - Address reuse for quick rebinding of leased ports
/// - Graceful shutdown support
/// - Thread-safe (Send + Sync)
pub struct UdpTransport {
    /// Underlying UDP socket
    socket: Arc<UdpSocket>,
    /// Local address we're bound to
    local_addr: SocketAddr,
    /// Shutdown flag
    shutdown: AtomicBool,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address.
    ///
    /// # Arguments
    /// * `addr` - Address to bind to (e.g., "0.0.0.0:50400")
    ///
    /// # Errors
    /// - `InvalidAddress`: If the address string does not parse
    /// - `BindFailed` / `AddressInUse`: If binding fails
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr = addr_str.parse().map_err(|_| {
            TransportError::InvalidAddress {
                addr: addr_str.to_string(),
            }
        })?;

        Self::bind_addr(socket_addr).await
    }

    /// Creates a new UDP transport bound to the specified socket address.
    ///
    /// # Socket Options
    /// - `SO_REUSEADDR`: Enabled for quick rebinding
    /// - Non-blocking: Required for async operations
    ///
    /// # Errors
    /// Returns error if binding fails.
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        debug!("Binding UDP transport to {}", addr);

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::io("creating UDP socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::io("setting non-blocking", e))?;

        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse { addr }
            } else {
                TransportError::bind_failed(addr, e.to_string())
            }
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::io("converting to Tokio socket", e))?;

        let local_addr = tokio_socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!("UDP transport bound to {}", local_addr);

        Ok(Self {
            socket: Arc::new(tokio_socket),
            local_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Checks if the transport has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let (len, addr) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|e| TransportError::ReceiveFailed {
                reason: e.to_string(),
            })?;

        trace!("Received {} bytes from {}", len, addr);

        Ok((len, PacketSource::new(addr)))
    }

    async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: std::time::Duration,
    ) -> Result<Option<(usize, PacketSource)>> {
        match tokio::time::timeout(timeout, self.recv(buf)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => {
                // Re-check the flag so a task that slept through shutdown
                // reports the close instead of a plain timeout.
                if self.is_shutdown() {
                    Err(TransportError::ShuttingDown)
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }

        let len = self
            .socket
            .send_to(buf, dest)
            .await
            .map_err(|e| TransportError::SendFailed {
                dest: *dest,
                reason: e.to_string(),
            })?;

        trace!("Sent {} bytes to {}", len, dest);

        Ok(len)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Shutting down UDP transport on {}", self.local_addr);
        self.shutdown.store(true, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_shutdown()
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        let message = b"streamon";
        client.send(message, &server_addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, source) = server.recv(&mut buf).await.unwrap();

        assert_eq!(len, message.len());
        assert_eq!(&buf[..len], message);
        assert_eq!(source.addr, client_addr);
    }

    #[tokio::test]
    async fn test_recv_timeout_elapses() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let mut buf = [0u8; 64];
        let result = transport
            .recv_timeout(&mut buf, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_recv_timeout_delivers() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        client.send(b"ok", &server_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let received = server
            .recv_timeout(&mut buf, Duration::from_secs(1))
            .await
            .unwrap();

        let (len, _source) = received.expect("datagram should arrive");
        assert_eq!(&buf[..len], b"ok");
    }

    #[tokio::test]
    async fn test_shutdown() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        assert!(transport.is_active());

        transport.shutdown().await.unwrap();

        assert!(!transport.is_active());
        assert!(transport.is_shutdown());

        let mut buf = [0u8; 1024];
        let result = transport.recv(&mut buf).await;
        assert!(matches!(result, Err(TransportError::ShuttingDown)));

        let result = transport
            .recv_timeout(&mut buf, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(TransportError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = UdpTransport::bind("not-an-address").await;
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }
}
