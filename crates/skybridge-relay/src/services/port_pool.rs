// ============================================
// File: crates/skybridge-relay/src/services/port_pool.rs
// ============================================
//! # Status Port Pool Service
//!
//! ## Creation Reason
//! Each drone session needs a dedicated UDP status port pushed to the
//! device, drawn from a fixed contiguous range; the pool hands out and
//! reclaims those ports.
//!
//! ## Main Functionality
//! - `PortPool`: Status port pool management
//! - Port leasing and release
//! - Thread-safe operations
//!
//! ## Allocation Strategy
//! - Lowest-free-first for debuggability; order does not affect
//!   correctness
//! - O(n) lease, O(1) release
//!
//! ## Example
//! ```
//! use skybridge_relay::services::PortPool;
//!
//! let pool = PortPool::new(50400, 254);
//!
//! let port = pool.lease().unwrap();
//! assert_eq!(port, 50400);
//!
//! pool.release(port);
//! // port is leasable again
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Exhaustion is a hard, non-retried failure: it means the fleet-size
//!   limit was reached, not a transient condition
//! - Releasing an unleased port is a caller bug; it is logged and
//!   reported via the return value, never panicked on
//!
//! ## Last Modified
//! v0.1.0 - Initial port pool implementation

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

// ============================================
// PortPool
// ============================================

/// UDP status port pool.
///
/// # Thread Safety
/// Uses internal locking for thread-safe operations; concurrent leases
/// and releases from different sessions are race-free.
pub struct PortPool {
    /// First port in the range
    first: u16,
    /// Number of ports in the range
    count: u16,
    /// Set of leased ports
    leased: Mutex<HashSet<u16>>,
}

impl PortPool {
    /// Creates a new port pool over `[first, first + count)`.
    #[must_use]
    pub fn new(first: u16, count: u16) -> Self {
        debug!(
            "Port pool initialized: {}..{} ({} ports)",
            first,
            u32::from(first) + u32::from(count),
            count
        );

        Self {
            first,
            count,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Leases the lowest free port.
    ///
    /// # Errors
    /// Returns `PortPoolExhausted` if every port is leased.
    pub fn lease(&self) -> Result<u16> {
        let mut leased = self.leased.lock();

        for offset in 0..self.count {
            let port = self.first + offset;
            if leased.contains(&port) {
                continue;
            }

            leased.insert(port);
            debug!("Leased status port: {} ({} in use)", port, leased.len());
            return Ok(port);
        }

        warn!("Status port pool exhausted ({} ports in use)", leased.len());
        Err(RelayError::PortPoolExhausted {
            capacity: self.count as usize,
        })
    }

    /// Releases a previously leased port.
    ///
    /// # Returns
    /// `true` if the port was leased, `false` if it wasn't (caller bug).
    pub fn release(&self, port: u16) -> bool {
        let mut leased = self.leased.lock();
        let removed = leased.remove(&port);

        if removed {
            debug!("Released status port: {} ({} in use)", port, leased.len());
        } else {
            warn!("Attempted to release unleased port: {}", port);
        }

        removed
    }

    /// Checks if a port is currently leased.
    #[must_use]
    pub fn is_leased(&self, port: u16) -> bool {
        self.leased.lock().contains(&port)
    }

    /// Returns the number of leased ports.
    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.leased.lock().len()
    }

    /// Returns the total capacity of the pool.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.count as usize
    }

    /// Returns the number of free ports.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.capacity() - self.leased_count()
    }
}

impl std::fmt::Debug for PortPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortPool")
            .field("range", &format!("{}..+{}", self.first, self.count))
            .field("leased", &self.leased_count())
            .field("available", &self.available_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
