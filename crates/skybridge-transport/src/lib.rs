// ============================================
// File: crates/skybridge-transport/src/lib.rs
// ============================================
//! # Skybridge Transport - Network I/O Layer
//!
//! ## Creation Reason
//! Provides the datagram transport used between a relay node, the drones on
//! its local network, and the backend's video relay. Everything the relay
//! exchanges with a drone (commands, status, video) travels over UDP.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Transport` trait definition for abstraction
//! - [`udp`]: UDP socket implementation
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              skybridge-relay                        │
//! │   (sessions, discovery, command protocol)           │
//! │                    │                                │
//! │                    ▼                                │
//! │           skybridge-transport  ◄── You are here     │
//! │        (UDP sockets, timeouts, shutdown)            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless - no guaranteed delivery
//! - Always use traits for testability
//! - `recv_timeout` is the primary receive entry point for the relay:
//!   every subtask loop must bound its blocking receive so it can observe
//!   session shutdown within one timeout interval
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod traits;
pub mod udp;

// Re-export primary types
pub use error::{Result, TransportError};
pub use traits::{PacketSource, Transport};
pub use udp::UdpTransport;
