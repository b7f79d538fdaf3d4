// ============================================
// File: crates/skybridge-relay/src/backend/client.rs
// ============================================
//! # Backend API Client
//!
//! ## Creation Reason
//! The relay node talks to the coordination backend over HTTP for
//! authentication, heartbeat, takeoff/land negotiation and status
//! forwarding. This module defines the typed surface for those calls.
//!
//! ## Main Functionality
//! - `BackendApi`: one method per backend endpoint, mockable in tests
//! - `BackendClient`: reqwest implementation with bearer-token handling
//!
//! ## Design Choices
//! - The bearer token lives behind an `RwLock` so a renewal can never be
//!   observed as a torn credential by in-flight requests
//! - Every method returns a classified `RelayError`; callers decide
//!   whether to retry based on `is_transient`
//!
//! ## ⚠️ Important Note for Next Developer
//! - `should_takeoff` / `should_land` interpret an HTTP success status as
//!   "yes" and a client-error status as "not yet"; only transport-level
//!   failures become errors
//!
//! ## Last Modified
//! v0.1.0 - Initial backend client implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::error::{RelayError, Result};
use crate::types::DroneName;

use super::models::{
    CmdQueueResponse, CommandTuple, DroneQuery, HandshakeRequest, HandshakeResponse,
    HeartbeatRequest, NewDroneResponse, StatusReport,
};

// ============================================
// BackendApi Trait
// ============================================

/// Typed interface over the backend's relay-facing HTTP endpoints.
///
/// Sessions and the discovery scanner are written against this trait so
/// tests can substitute a scripted fake.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Exchanges the node's credentials for a bearer token.
    async fn authenticate(&self) -> Result<()>;

    /// Reports the node name and currently attached drone names.
    async fn heartbeat(&self, drones: Vec<DroneName>) -> Result<()>;

    /// Requests the video-relay port assigned to a drone.
    async fn request_video_port(&self, drone: DroneName) -> Result<u16>;

    /// Forwards one device status report.
    async fn report_status(&self, drone: DroneName, status: String) -> Result<()>;

    /// Polls whether the operator has requested takeoff for a drone.
    async fn should_takeoff(&self, drone: DroneName) -> Result<bool>;

    /// Reports a successful takeoff.
    async fn confirm_takeoff(&self, drone: DroneName) -> Result<()>;

    /// Polls whether the operator has requested landing for a drone.
    async fn should_land(&self, drone: DroneName) -> Result<bool>;

    /// Reports a successful landing.
    async fn confirm_land(&self, drone: DroneName) -> Result<()>;

    /// Fetches the next pending remote-control command, if any.
    async fn next_command(&self, drone: DroneName) -> Result<Option<CommandTuple>>;

    /// Reports that a drone has disappeared from the node.
    async fn report_disconnected(&self, drone: DroneName) -> Result<()>;
}

// ============================================
// BackendClient
// ============================================

/// HTTP implementation of [`BackendApi`].
pub struct BackendClient {
    config: BackendConfig,
    http: Client,
    node_name: String,
    node_password: String,
    token: RwLock<Option<String>>,
}

impl BackendClient {
    /// Creates a new client for the given backend.
    ///
    /// # Errors
    /// Returns error if the underlying HTTP client cannot be constructed.
    pub fn new(
        config: BackendConfig,
        node_name: impl Into<String>,
        node_password: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RelayError::backend("<client>", e))?;

        Ok(Self {
            config,
            http,
            node_name: node_name.into(),
            node_password: node_password.into(),
            token: RwLock::new(None),
        })
    }

    /// Returns `true` once a bearer token has been obtained.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .clone()
            .ok_or(RelayError::NotAuthenticated)
    }

    fn drone_query(&self, drone: DroneName) -> DroneQuery {
        DroneQuery {
            name: drone,
            parent: self.node_name.clone(),
        }
    }

    async fn post_report(&self, path: &str, drone: DroneName) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&self.drone_query(drone))
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Err(RelayError::backend(path, response.status()));
        }
        Ok(())
    }

    async fn get_decision(&self, path: &str, drone: DroneName) -> Result<bool> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&self.drone_query(drone))
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn authenticate(&self) -> Result<()> {
        let path = "/handshake";
        let request = HandshakeRequest {
            name: self.node_name.clone(),
            password: self.node_password.clone(),
        };

        debug!("Authenticating node {} with backend", self.node_name);

        let response = self
            .http
            .post(self.url(path))
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Err(RelayError::AuthFailed(response.status().to_string()));
        }

        let body: HandshakeResponse = response
            .json()
            .await
            .map_err(|e| RelayError::backend_response(path, e))?;

        *self.token.write() = Some(body.token().to_string());
        info!("Node {} authenticated with backend", self.node_name);
        Ok(())
    }

    async fn heartbeat(&self, drones: Vec<DroneName>) -> Result<()> {
        let path = "/heartbeat";
        let request = HeartbeatRequest {
            name: self.node_name.clone(),
            drones,
        };

        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Err(RelayError::backend(path, response.status()));
        }
        Ok(())
    }

    async fn request_video_port(&self, drone: DroneName) -> Result<u16> {
        let path = "/new_drone";
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&self.drone_query(drone))
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Err(RelayError::backend(path, response.status()));
        }

        let body: NewDroneResponse = response
            .json()
            .await
            .map_err(|e| RelayError::backend_response(path, e))?;

        Ok(body.video_port)
    }

    async fn report_status(&self, drone: DroneName, status: String) -> Result<()> {
        let path = "/drone/status_information";
        let report = StatusReport {
            name: drone,
            parent: self.node_name.clone(),
            status,
        };

        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&report)
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Err(RelayError::backend(path, response.status()));
        }
        Ok(())
    }

    async fn should_takeoff(&self, drone: DroneName) -> Result<bool> {
        self.get_decision("/drone/should_takeoff", drone).await
    }

    async fn confirm_takeoff(&self, drone: DroneName) -> Result<()> {
        self.post_report("/drone/successful_takeoff", drone).await
    }

    async fn should_land(&self, drone: DroneName) -> Result<bool> {
        self.get_decision("/drone/should_land", drone).await
    }

    async fn confirm_land(&self, drone: DroneName) -> Result<()> {
        self.post_report("/drone/successful_land", drone).await
    }

    async fn next_command(&self, drone: DroneName) -> Result<Option<CommandTuple>> {
        let path = "/cmd_queue";
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.bearer()?)
            .json(&self.drone_query(drone))
            .send()
            .await
            .map_err(|e| RelayError::backend(path, e))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let body: CmdQueueResponse = response
            .json()
            .await
            .map_err(|e| RelayError::backend_response(path, e))?;

        Ok(body.command)
    }

    async fn report_disconnected(&self, drone: DroneName) -> Result<()> {
        self.post_report("/drone/disconnected", drone).await
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.config.base_url)
            .field("node_name", &self.node_name)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// ============================================
// Test Support
// ============================================

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Scripted in-memory backend for session and discovery tests.
    #[derive(Default)]
    pub struct FakeBackend {
        /// Video port returned by `request_video_port`.
        pub video_port: AtomicUsize,
        /// Whether `should_takeoff` answers yes.
        pub takeoff_requested: AtomicBool,
        /// Whether `should_land` answers yes.
        pub land_requested: AtomicBool,
        /// Scripted remote-control queue.
        pub commands: Mutex<VecDeque<CommandTuple>>,
        /// Number of upcoming `report_disconnected` calls that fail.
        pub disconnect_failures: AtomicUsize,
        /// Every call made, in order, as "<method> <drone>" strings.
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            let fake = Self::default();
            fake.video_port.store(55000, Ordering::SeqCst);
            fake
        }

        fn record(&self, method: &str, drone: DroneName) {
            self.calls.lock().push(format!("{method} {drone}"));
        }

        pub fn calls_named(&self, method: &str) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.starts_with(method))
                .count()
        }
    }

    #[async_trait]
    impl BackendApi for FakeBackend {
        async fn authenticate(&self) -> Result<()> {
            Ok(())
        }

        async fn heartbeat(&self, _drones: Vec<DroneName>) -> Result<()> {
            Ok(())
        }

        async fn request_video_port(&self, drone: DroneName) -> Result<u16> {
            self.record("request_video_port", drone);
            Ok(self.video_port.load(Ordering::SeqCst) as u16)
        }

        async fn report_status(&self, drone: DroneName, _status: String) -> Result<()> {
            self.record("report_status", drone);
            Ok(())
        }

        async fn should_takeoff(&self, drone: DroneName) -> Result<bool> {
            self.record("should_takeoff", drone);
            Ok(self.takeoff_requested.load(Ordering::SeqCst))
        }

        async fn confirm_takeoff(&self, drone: DroneName) -> Result<()> {
            self.record("confirm_takeoff", drone);
            Ok(())
        }

        async fn should_land(&self, drone: DroneName) -> Result<bool> {
            self.record("should_land", drone);
            Ok(self.land_requested.load(Ordering::SeqCst))
        }

        async fn confirm_land(&self, drone: DroneName) -> Result<()> {
            self.record("confirm_land", drone);
            Ok(())
        }

        async fn next_command(&self, drone: DroneName) -> Result<Option<CommandTuple>> {
            self.record("next_command", drone);
            Ok(self.commands.lock().pop_front())
        }

        async fn report_disconnected(&self, drone: DroneName) -> Result<()> {
            self.record("report_disconnected", drone);
            if self.disconnect_failures.load(Ordering::SeqCst) > 0 {
                self.disconnect_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(RelayError::backend("/drone/disconnected", "scripted failure"));
            }
            Ok(())
        }
    }
}

// ============================================
// Tests
// ============================================
