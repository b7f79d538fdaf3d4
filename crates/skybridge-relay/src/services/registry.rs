// ============================================
// File: crates/skybridge-relay/src/services/registry.rs
// ============================================
//! # Drone Session Registry
//!
//! ## Creation Reason
//! The relay node needs one place that maps drone names to live sessions,
//! assigns new names, and answers "is this device already bridged?" for
//! the discovery scanner's reconciliation.
//!
//! ## Main Functionality
//! - `DroneRegistry`: concurrent name -> session map
//! - Lowest-unused-name assignment
//! - Address lookups for reconciliation
//! - Attached-name snapshot for the heartbeat
//!
//! ## ⚠️ Important Note for Next Developer
//! - Name assignment and insertion are two steps; only the discovery
//!   scanner creates sessions, so there is no assign/insert race today.
//!   If a second creator ever appears, fold the two into one operation
//!
//! ## Last Modified
//! v0.1.0 - Initial registry implementation

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{RelayError, Result};
use crate::services::session::DroneSession;
use crate::types::{DroneName, DRONE_INDEX_MAX, DRONE_INDEX_MIN};

// ============================================
// DroneRegistry
// ============================================

/// Concurrent map of live drone sessions, keyed by name.
#[derive(Default)]
pub struct DroneRegistry {
    sessions: DashMap<DroneName, Arc<DroneSession>>,
}

impl DroneRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the lowest unused drone name.
    ///
    /// A destroyed session's name becomes assignable again, so repeated
    /// create/destroy cycles reuse low indices instead of growing.
    ///
    /// # Errors
    /// Returns `NameSpaceExhausted` if every name is in use.
    pub fn next_name(&self) -> Result<DroneName> {
        for index in DRONE_INDEX_MIN..=DRONE_INDEX_MAX {
            let name = DroneName::from_index(index)
                .map_err(|e| RelayError::ConfigInvalid(e.to_string()))?;
            if !self.sessions.contains_key(&name) {
                return Ok(name);
            }
        }

        Err(RelayError::NameSpaceExhausted {
            capacity: usize::from(DRONE_INDEX_MAX - DRONE_INDEX_MIN + 1),
        })
    }

    /// Inserts a session under its own name.
    pub fn insert(&self, session: Arc<DroneSession>) {
        self.sessions.insert(session.name(), session);
    }

    /// Removes and returns the session with the given name.
    pub fn remove(&self, name: DroneName) -> Option<Arc<DroneSession>> {
        self.sessions.remove(&name).map(|(_, session)| session)
    }

    /// Returns the session with the given name.
    pub fn get(&self, name: DroneName) -> Option<Arc<DroneSession>> {
        self.sessions.get(&name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if some session is bridging the given device.
    #[must_use]
    pub fn contains_addr(&self, device_ip: IpAddr) -> bool {
        self.sessions
            .iter()
            .any(|entry| entry.device_addr().ip() == device_ip)
    }

    /// Returns the names of all live sessions, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<DroneName> {
        let mut names: Vec<DroneName> =
            self.sessions.iter().map(|entry| *entry.key()).collect();
        names.sort_unstable();
        names
    }

    /// Returns all live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<DroneSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for DroneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DroneRegistry")
            .field("sessions", &self.names())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
