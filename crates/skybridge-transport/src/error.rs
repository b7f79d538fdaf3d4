// ============================================
// File: crates/skybridge-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types specific to transport layer operations,
//! chiefly UDP socket I/O.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs fatal errors
//!
//! ## ⚠️ Important Note for Next Developer
//! - Network errors are often transient and retryable
//! - `ShuttingDown` is the *expected* error once a session flips inactive
//!   and closes its sockets; callers must treat it as benign during
//!   teardown, not as device misbehavior
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Send operation failed.
    #[error("Failed to send to {dest}: {reason}")]
    SendFailed {
        /// Destination address
        dest: SocketAddr,
        /// Why send failed
        reason: String,
    },

    /// Receive operation failed.
    #[error("Failed to receive: {reason}")]
    ReceiveFailed {
        /// Why receive failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    /// Invalid address string.
    #[error("Invalid address: {addr}")]
    InvalidAddress {
        /// The invalid address string
        addr: String,
    },

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    /// Socket has been shut down.
    #[error("Transport is shutting down")]
    ShuttingDown,

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    ///
    /// Transient errors may succeed if the operation is retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
            ),
            Self::SendFailed { .. } | Self::ReceiveFailed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this error means the socket was closed on purpose.
    ///
    /// Subtask loops see this when a session is torn down while they are
    /// blocked in a receive; it must be swallowed, not logged as a failure.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }

    /// Returns `true` if this is a network-related error.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. }
                | Self::SendFailed { .. }
                | Self::ReceiveFailed { .. }
                | Self::AddressInUse { .. }
        )
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::bind_failed(
            "127.0.0.1:8889".parse().unwrap(),
            "address in use",
        );
        assert!(err.to_string().contains("127.0.0.1:8889"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_error_classification() {
        let network_err = TransportError::SendFailed {
            dest: "127.0.0.1:8889".parse().unwrap(),
            reason: "timeout".into(),
        };
        assert!(network_err.is_network_error());
        assert!(network_err.is_retryable());

        let closed = TransportError::ShuttingDown;
        assert!(closed.is_closed());
        assert!(!closed.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        let transport_err: TransportError = io_err.into();
        assert!(transport_err.is_retryable());
    }
}
