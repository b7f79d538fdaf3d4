// ============================================
// File: crates/skybridge-relay/src/error.rs
// ============================================
//! # Relay Error Types
//!
//! ## Creation Reason
//! Defines the error taxonomy for the relay node. The node is designed to
//! run unattended, so classification matters more than the individual
//! variants: callers decide retry-vs-skip-vs-abort from the predicates here.
//!
//! ## Main Functionality
//! - `RelayError`: Primary error enum for relay operations
//! - Conversion from transport and I/O errors
//! - Classification helpers (`is_transient`, `is_capacity`, `is_fatal`)
//!
//! ## Error Handling Strategy
//! - Transient network failures are logged and retried, never propagated
//!   as fatal
//! - Capacity failures (port pool, name space) fail one add-attempt only
//! - Nothing in this enum is allowed to take the whole process down
//!
//! ## ⚠️ Important Note for Next Developer
//! - When adding variants, update the classification methods below;
//!   a variant that is neither transient nor capacity is treated as fatal
//!   for the *operation*, never for the process
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use skybridge_transport::TransportError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ============================================
// RelayError
// ============================================

/// Relay node error types.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Failed to read the configuration file.
    #[error("Failed to load config from {path}: {reason}")]
    ConfigLoad {
        /// Path we tried to read
        path: String,
        /// Why loading failed
        reason: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The status-port pool has no free ports left.
    #[error("Status port pool exhausted ({capacity} ports leased)")]
    PortPoolExhausted {
        /// Total pool capacity
        capacity: usize,
    },

    /// All drone names are in use.
    #[error("Drone name space exhausted ({capacity} names in use)")]
    NameSpaceExhausted {
        /// Total number of assignable names
        capacity: usize,
    },

    /// Lookup of a session that is not in the registry.
    #[error("No session for drone: {name}")]
    SessionNotFound {
        /// The name that was looked up
        name: String,
    },

    /// The backend rejected our credentials.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Calling the backend service before authenticating.
    #[error("Not authenticated with the backend")]
    NotAuthenticated,

    /// A backend HTTP call failed.
    #[error("Backend call {endpoint} failed: {reason}")]
    Backend {
        /// The endpoint path
        endpoint: String,
        /// Why the call failed
        reason: String,
    },

    /// The backend returned a body we could not interpret.
    #[error("Backend response from {endpoint} malformed: {reason}")]
    BackendResponse {
        /// The endpoint path
        endpoint: String,
        /// What was wrong with the body
        reason: String,
    },

    /// Device neighbor enumeration or probing failed.
    #[error("Discovery probe failed: {0}")]
    Probe(String),

    /// Transport layer error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `ConfigInvalid` error for a named field.
    pub fn config_invalid(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConfigInvalid(format!("{}: {}", field.into(), reason.to_string()))
    }

    /// Creates a `Backend` error.
    pub fn backend(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Backend {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `BackendResponse` error.
    pub fn backend_response(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendResponse {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient: log it and retry or
    /// continue the surrounding loop.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend { .. } | Self::BackendResponse { .. } | Self::Probe(_) => true,
            Self::Transport(e) => e.is_retryable() || e.is_closed(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this error signals resource exhaustion. The
    /// affected add-attempt fails; the fleet keeps running at reduced
    /// capacity.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::PortPoolExhausted { .. } | Self::NameSpaceExhausted { .. }
        )
    }

    /// Returns `true` if this error is fatal for its operation (not the
    /// process; no relay error aborts the process).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !self.is_capacity()
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
        let err = RelayError::PortPoolExhausted { capacity: 254 };
        assert!(err.to_string().contains("254"));

        let err = RelayError::backend("/heartbeat", "connection refused");
        assert!(err.to_string().contains("/heartbeat"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_classification() {
        assert!(RelayError::backend("/cmd_queue", "timeout").is_transient());
        assert!(RelayError::Probe("arp failed".into()).is_transient());

        let capacity = RelayError::PortPoolExhausted { capacity: 2 };
        assert!(capacity.is_capacity());
        assert!(!capacity.is_transient());
        assert!(!capacity.is_fatal());

        let auth = RelayError::AuthFailed("bad password".into());
        assert!(auth.is_fatal());
        assert!(!auth.is_transient());
    }

    #[test]
    fn test_transport_conversion() {
        let transport = TransportError::ShuttingDown;
        let relay: RelayError = transport.into();
        assert!(relay.is_transient());
    }
}
