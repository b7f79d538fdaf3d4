// ============================================
// File: crates/skybridge-relay/src/lib.rs
// ============================================
//! # Skybridge Relay Node
//!
//! ## Creation Reason
//! Library crate for the relay node that bridges a local fleet of drones
//! to the coordination backend: discovery, per-drone sessions, the device
//! protocol and the backend integration.
//!
//! ## Module Organization
//! - `types`: Drone names and hardware addresses
//! - `config`: TOML configuration
//! - `error`: Error taxonomy
//! - `backend`: Typed backend HTTP client
//! - `services`: Port pool, registry, command channel, sessions, discovery
//! - `relay`: Top-level node coordinator
//!
//! ## Architecture
//! ```text
//! RelayNode
//!   ├── BackendClient (auth, heartbeat, per-drone calls)
//!   ├── PortPool (status port leases)
//!   ├── DroneRegistry (name -> session)
//!   └── DiscoveryScanner
//!         └── DroneSession (per device)
//!               ├── CommandChannel (control instructions)
//!               └── subtasks: video / status / rc / landing
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial library structure

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod error;
pub mod relay;
pub mod services;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendApi, BackendClient};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use relay::RelayNode;
pub use services::{
    CommandChannel, DeviceProbe, DiscoveryScanner, DroneRegistry, DroneSession, PortPool,
    SessionState,
};
pub use types::{DroneName, MacAddr};
