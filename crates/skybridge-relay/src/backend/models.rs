// ============================================
// File: crates/skybridge-relay/src/backend/models.rs
// ============================================
//! # Backend API Models
//!
//! ## Creation Reason
//! Request and response bodies for the backend's HTTP API.
//!
//! ## Main Functionality
//! - Handshake, heartbeat and per-drone report bodies
//! - `CommandTuple`: the 4-axis remote-control velocity command
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field names here are wire format; renaming a field changes the
//!   protocol with the backend
//!
//! ## Last Modified
//! v0.1.0 - Initial model definitions

use serde::{Deserialize, Serialize};

use crate::types::DroneName;

// ============================================
// Authentication
// ============================================

/// Body of the initial `/handshake` credential exchange.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest {
    /// Relay node name.
    pub name: String,
    /// Relay node password.
    pub password: String,
}

/// Response to `/handshake`.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeResponse {
    /// Bearer token, possibly prefixed with the scheme ("Bearer <token>").
    pub access_token: String,
}

impl HandshakeResponse {
    /// Returns the bare token with any "Bearer " scheme prefix stripped.
    #[must_use]
    pub fn token(&self) -> &str {
        self.access_token
            .strip_prefix("Bearer ")
            .unwrap_or(&self.access_token)
    }
}

// ============================================
// Heartbeat
// ============================================

/// Body of the periodic `/heartbeat` report.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    /// Relay node name.
    pub name: String,
    /// Names of currently attached drones.
    pub drones: Vec<DroneName>,
}

// ============================================
// Per-drone queries and reports
// ============================================

/// Identifies one drone in backend calls: its session name plus the relay
/// node it is attached to.
#[derive(Debug, Clone, Serialize)]
pub struct DroneQuery {
    /// Drone session name.
    pub name: DroneName,
    /// Owning relay node name.
    pub parent: String,
}

/// Response to `/new_drone`: the video-relay port assigned to the drone.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDroneResponse {
    /// UDP port on the backend's video relay host.
    pub video_port: u16,
}

/// One forwarded device status report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Drone session name.
    pub name: DroneName,
    /// Owning relay node name.
    pub parent: String,
    /// Raw status text as received from the device.
    pub status: String,
}

// ============================================
// Remote-control commands
// ============================================

/// One 4-axis velocity command from the backend's command queue.
///
/// Values are signed percentages in -100..=100, applied verbatim to the
/// device's remote-control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTuple {
    /// Left/right velocity.
    pub left_right: i8,
    /// Forward/back velocity.
    pub forward_back: i8,
    /// Up/down velocity.
    pub up_down: i8,
    /// Yaw velocity.
    pub yaw: i8,
}

impl CommandTuple {
    /// Renders the device's remote-control instruction for this command.
    #[must_use]
    pub fn to_instruction(&self) -> String {
        format!(
            "rc {} {} {} {}",
            self.left_right, self.forward_back, self.up_down, self.yaw
        )
    }
}

/// Response to `/cmd_queue`: the next pending command, if any.
#[derive(Debug, Clone, Deserialize)]
pub struct CmdQueueResponse {
    /// Pending command; absent when the queue is empty.
    #[serde(default)]
    pub command: Option<CommandTuple>,
}

// ============================================
// Tests
// ============================================
