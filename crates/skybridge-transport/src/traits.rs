// ============================================
// File: crates/skybridge-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the abstract datagram interface the relay's session machinery
//! is written against, enabling loopback and fake implementations in tests.
//!
//! ## Main Functionality
//! - `Transport`: UDP-like datagram transport interface
//! - `PacketSource`: Metadata about received packets
//!
//! ## Design Philosophy
//! - Traits enable mock implementations for testing
//! - Async-first design with `async_trait`
//! - Buffer management is caller's responsibility
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync for use in async contexts
//! - `recv_timeout` is what session subtasks should call: it converts an
//!   indefinite block into a bounded wait so the cooperative shutdown flag
//!   is observed within one timeout interval
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

// ============================================
// PacketSource
// ============================================

/// Metadata about the source of a received packet.
///
/// Used by the command channel to verify that an acknowledgement actually
/// came from the device it was expected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketSource {
    /// Source address (IP and port).
    pub addr: SocketAddr,
    /// When the packet was received.
    pub timestamp: Instant,
}

impl PacketSource {
    /// Creates a new `PacketSource`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timestamp: Instant::now(),
        }
    }

    /// Returns the age of this packet (time since received).
    #[must_use]
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

// ============================================
// Transport Trait
// ============================================

/// Abstract interface for datagram-based transport.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to allow sharing across
/// async tasks.
///
/// # Example
/// ```ignore
/// async fn forward(sock: &dyn Transport, dest: SocketAddr) -> Result<()> {
///     let mut buf = [0u8; 2048];
///     while let Some((len, _source)) =
///         sock.recv_timeout(&mut buf, Duration::from_millis(500)).await?
///     {
///         sock.send(&buf[..len], &dest).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receives a packet from the transport.
    ///
    /// # Arguments
    /// * `buf` - Buffer to store received data
    ///
    /// # Returns
    /// Tuple of (bytes received, packet source)
    ///
    /// # Errors
    /// Returns error if receive fails
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)>;

    /// Receives a packet, waiting at most `timeout`.
    ///
    /// # Returns
    /// `Ok(None)` if the deadline elapsed without a packet; otherwise the
    /// same tuple as [`Transport::recv`].
    ///
    /// # Errors
    /// Returns error if the underlying receive fails (including
    /// `ShuttingDown` once the socket is closed).
    async fn recv_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, PacketSource)>> {
        match tokio::time::timeout(timeout, self.recv(buf)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Sends a packet via the transport.
    ///
    /// # Arguments
    /// * `buf` - Data to send
    /// * `dest` - Destination address
    ///
    /// # Returns
    /// Number of bytes sent
    ///
    /// # Errors
    /// Returns error if send fails
    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize>;

    /// Returns the local address this transport is bound to.
    ///
    /// # Errors
    /// Returns error if address cannot be determined
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Gracefully shuts down the transport.
    ///
    /// After shutdown, all operations will return `ShuttingDown`.
    ///
    /// # Errors
    /// Returns error if shutdown fails
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` if the transport is still active.
    fn is_active(&self) -> bool;
}

// ============================================
// Tests
// ============================================
