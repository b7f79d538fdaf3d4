// ============================================
// File: crates/skybridge-relay/src/backend/mod.rs
// ============================================
//! # Backend Service Integration
//!
//! ## Creation Reason
//! Gives the relay node a typed surface over the coordination backend's
//! HTTP API instead of ad-hoc request construction at call sites.
//!
//! ## Main Functionality
//! - `models`: Request/response bodies for every backend endpoint
//! - `client`: `BackendApi` trait and the reqwest-based `BackendClient`
//!
//! ## Last Modified
//! v0.1.0 - Initial backend integration

pub mod client;
pub mod models;

pub use client::{BackendApi, BackendClient};
pub use models::{CommandTuple, DroneQuery, HandshakeRequest, HeartbeatRequest, StatusReport};
