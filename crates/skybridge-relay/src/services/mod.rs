// ============================================
// File: crates/skybridge-relay/src/services/mod.rs
// ============================================
//! # Relay Services
//!
//! ## Creation Reason
//! Groups the relay node's service components: resource pools, the device
//! protocol, per-drone sessions and network discovery.
//!
//! ## Main Functionality
//! - `port_pool`: Status port leasing
//! - `registry`: Session map and name assignment
//! - `command`: Device instruction protocol
//! - `session`: Per-drone lifecycle state machine and subtasks
//! - `discovery`: Neighbor scanning and reconciliation
//!
//! ## Last Modified
//! v0.1.0 - Initial service modules

pub mod command;
pub mod discovery;
pub mod port_pool;
pub mod registry;
pub mod session;

pub use command::CommandChannel;
pub use discovery::{DeviceProbe, DiscoveryScanner, Neighbor, SystemProbe};
pub use port_pool::PortPool;
pub use registry::DroneRegistry;
pub use session::{DroneSession, SessionParams, SessionState};
