// ============================================
// File: crates/skybridge-relay/src/services/session.rs
// ============================================
//! # Drone Session
//!
//! ## Creation Reason
//! Owns one drone's full lifecycle on a relay node: SDK activation, port
//! negotiation, the video-relay handshake, and the four concurrent
//! subtasks that keep the bridge alive.
//!
//! ## Main Functionality
//! - `SessionState`: lifecycle state machine
//! - `DroneSession::run`: drives the machine from `Discovered` to
//!   `Active` and then runs the subtasks
//! - `DroneSession::shutdown`: cooperative teardown
//!
//! ## State Machine
//! `Discovered → SdkActivating → PortNegotiating → HandshakingVideo →
//! Active → Landing → Disconnected` (terminal). Transitions are strictly
//! sequential; no subtask starts before `Active`.
//!
//! ## Subtasks (started at `Active`)
//! - video: forward device video datagrams verbatim to the backend relay
//! - status: forward device status text, rate-limited
//! - remote-control: takeoff negotiation, then the rc command stream
//! - landing: watch for backend land requests
//!
//! ## ⚠️ Important Note for Next Developer
//! - Teardown order is load-bearing: the active flag is flipped *before*
//!   any socket is closed, and every subtask treats a closed-socket error
//!   as a normal exit signal, so closure never masquerades as device
//!   misbehavior
//! - A land command keeps the session `Active` (ready for another
//!   takeoff); only discovery absence or backend-directed teardown moves
//!   it to `Landing`/`Disconnected`
//!
//! ## Last Modified
//! v0.1.0 - Initial session implementation

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use skybridge_transport::{Transport, UdpTransport};

use crate::backend::BackendApi;
use crate::services::command::CommandChannel;
use crate::types::DroneName;

// ============================================
// Protocol Constants
// ============================================

/// Default acknowledgement timeout for control instructions.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Takeoff is slow; it gets a longer single-attempt window.
const TAKEOFF_ACK_TIMEOUT: Duration = Duration::from_secs(7);

/// Device needs a settle pause after "command" and "port" instructions.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Delay between failed video-port requests to the backend.
const VIDEO_PORT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Delay between failed activation attempts.
const ACTIVATION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Per-attempt wait for a video-relay handshake acknowledgement.
const RTS_TIMEOUT: Duration = Duration::from_secs(2);

/// Ready-to-stream beacon payload.
const RTS_BEACON: &[u8] = b"RTS";

/// Minimum spacing between forwarded status reports.
const STATUS_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Pause between backend polls (rc queue, landing watch).
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receive timeout for subtask loops; bounds shutdown latency.
const SUBTASK_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Backoff bounds for the takeoff poll on backend transport failure.
const TAKEOFF_POLL_BACKOFF_MIN: Duration = Duration::from_secs(1);
const TAKEOFF_POLL_BACKOFF_MAX: Duration = Duration::from_secs(8);

// ============================================
// SessionState
// ============================================

/// Lifecycle states of a drone session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device found by discovery; nothing negotiated yet.
    Discovered,
    /// Entering the device's SDK command mode.
    SdkActivating,
    /// Pushing the negotiated status/video ports to the device.
    PortNegotiating,
    /// Performing the ready-to-stream handshake with the video relay.
    HandshakingVideo,
    /// Bridge established; subtasks running.
    Active,
    /// Teardown begun.
    Landing,
    /// Terminal state; resources released.
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::SdkActivating => "sdk_activating",
            Self::PortNegotiating => "port_negotiating",
            Self::HandshakingVideo => "handshaking_video",
            Self::Active => "active",
            Self::Landing => "landing",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

// ============================================
// SessionParams
// ============================================

/// Construction parameters for a drone session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Session name, unique within the node.
    pub name: DroneName,
    /// Owning relay node name.
    pub parent: String,
    /// Device control address (device IP, command port).
    pub device_addr: SocketAddr,
    /// Leased status port.
    pub status_port: u16,
    /// Host of the backend's video relay.
    pub video_relay_host: IpAddr,
    /// Datagram buffer size for the status and video sockets.
    pub buffer_size: usize,
}

// ============================================
// DroneSession
// ============================================

/// One drone's bridge to the backend.
///
/// Created by the discovery scanner once a device passes authorization
/// and liveness checks; destroyed when the device disappears or the
/// backend directs a disconnect.
pub struct DroneSession {
    name: DroneName,
    parent: String,
    device_addr: SocketAddr,
    status_port: u16,
    buffer_size: usize,
    video_relay_host: IpAddr,

    /// Video-relay port, assigned by the backend during activation.
    video_port: RwLock<Option<u16>>,

    state: RwLock<SessionState>,
    /// Every state entered, in order. Used for diagnostics.
    history: Mutex<Vec<SessionState>>,

    /// Cooperative cancellation signal; flipped exactly once, before any
    /// socket is closed.
    active: AtomicBool,
    has_taken_off: AtomicBool,
    /// Guards single teardown (and thus single port release by the owner).
    released: AtomicBool,

    backend: Arc<dyn BackendApi>,
    command: CommandChannel,
    control_socket: Arc<dyn Transport>,
    status_socket: Arc<dyn Transport>,
    video_socket: RwLock<Option<Arc<dyn Transport>>>,
}

impl DroneSession {
    /// Creates a new session in the `Discovered` state.
    ///
    /// The control and status sockets are bound by the caller (the
    /// discovery scanner); the video socket is bound during activation
    /// once the backend assigns a port.
    pub fn new(
        params: SessionParams,
        control_socket: Arc<dyn Transport>,
        status_socket: Arc<dyn Transport>,
        backend: Arc<dyn BackendApi>,
    ) -> Arc<Self> {
        let command = CommandChannel::new(
            Arc::clone(&control_socket),
            params.device_addr,
            params.buffer_size,
        );

        info!(
            "Session {} created for device {} (status port {})",
            params.name, params.device_addr, params.status_port
        );

        Arc::new(Self {
            name: params.name,
            parent: params.parent,
            device_addr: params.device_addr,
            status_port: params.status_port,
            buffer_size: params.buffer_size,
            video_relay_host: params.video_relay_host,
            video_port: RwLock::new(None),
            state: RwLock::new(SessionState::Discovered),
            history: Mutex::new(vec![SessionState::Discovered]),
            active: AtomicBool::new(true),
            has_taken_off: AtomicBool::new(false),
            released: AtomicBool::new(false),
            backend,
            command,
            control_socket,
            status_socket,
            video_socket: RwLock::new(None),
        })
    }

    // ========================================
    // Accessors
    // ========================================

    /// Returns the session name.
    #[must_use]
    pub const fn name(&self) -> DroneName {
        self.name
    }

    /// Returns the device's control address.
    #[must_use]
    pub const fn device_addr(&self) -> SocketAddr {
        self.device_addr
    }

    /// Returns the leased status port.
    #[must_use]
    pub const fn status_port(&self) -> u16 {
        self.status_port
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Returns every state entered so far, in order.
    #[must_use]
    pub fn state_history(&self) -> Vec<SessionState> {
        self.history.lock().clone()
    }

    /// Returns `true` while the session has not begun teardown.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` once a takeoff has been acknowledged and no landing
    /// has happened since.
    #[must_use]
    pub fn has_taken_off(&self) -> bool {
        self.has_taken_off.load(Ordering::Acquire)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        debug!("Session {}: {} -> {}", self.name, *state, next);
        *state = next;
        drop(state);
        self.history.lock().push(next);
    }

    fn video_relay_addr(&self) -> Option<SocketAddr> {
        self.video_port
            .read()
            .map(|port| SocketAddr::new(self.video_relay_host, port))
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Drives the session from `Discovered` to `Active`, then runs the
    /// four subtasks until the session is torn down.
    ///
    /// Every failure on the way up is retried while the session stays
    /// active; the only way out of this function is teardown. Each new
    /// attempt re-requests a video port from the backend, so a port that
    /// turned out to be unusable locally is not assigned forever.
    pub async fn run(self: Arc<Self>) {
        loop {
            if !self.is_active() {
                return;
            }
            if self.activate().await {
                break;
            }
            if !self.is_active() {
                return;
            }
            warn!(
                "Session {}: activation failed, retrying in {:?}",
                self.name, ACTIVATION_RETRY_DELAY
            );
            self.reset_video_socket().await;
            tokio::time::sleep(ACTIVATION_RETRY_DELAY).await;
        }

        self.set_state(SessionState::Active);
        info!("Session {} active", self.name);

        let video = tokio::spawn(Arc::clone(&self).video_task());
        let status = tokio::spawn(Arc::clone(&self).status_task());
        let rc = tokio::spawn(Arc::clone(&self).remote_control_task());
        let landing = tokio::spawn(Arc::clone(&self).landing_task());

        let _ = tokio::join!(video, status, rc, landing);
        debug!("Session {}: all subtasks finished", self.name);
    }

    /// One pass through the activation ladder.
    async fn activate(&self) -> bool {
        self.activate_sdk().await
            && self.negotiate_ports().await
            && self.handshake_video().await
            && self.start_streaming().await
    }

    /// Closes and forgets a partially established video socket so the
    /// next activation attempt starts clean.
    async fn reset_video_socket(&self) {
        let stale = self.video_socket.write().take();
        if let Some(socket) = stale {
            let _ = socket.shutdown().await;
        }
    }

    /// `Discovered -> SdkActivating`: obtain the video-relay port from the
    /// backend and put the device into SDK command mode.
    async fn activate_sdk(&self) -> bool {
        self.set_state(SessionState::SdkActivating);

        let video_port = loop {
            if !self.is_active() {
                return false;
            }
            match self.backend.request_video_port(self.name).await {
                Ok(port) => break port,
                Err(e) => {
                    warn!(
                        "Session {}: video port request failed ({}), retrying",
                        self.name, e
                    );
                    tokio::time::sleep(VIDEO_PORT_RETRY_DELAY).await;
                }
            }
        };

        *self.video_port.write() = Some(video_port);
        debug!("Session {}: assigned video port {}", self.name, video_port);

        match self.command.send_ack("command", ACK_TIMEOUT, &self.active).await {
            Ok(true) => {
                tokio::time::sleep(SETTLE_DELAY).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("Session {}: SDK activation failed: {}", self.name, e);
                false
            }
        }
    }

    /// `SdkActivating -> PortNegotiating`: bind the local video socket and
    /// push the status/video port pair to the device.
    async fn negotiate_ports(&self) -> bool {
        self.set_state(SessionState::PortNegotiating);

        let Some(video_port) = *self.video_port.read() else {
            return false;
        };

        let video_socket = match UdpTransport::bind(format!("0.0.0.0:{video_port}")).await {
            Ok(socket) => Arc::new(socket) as Arc<dyn Transport>,
            Err(e) => {
                error!(
                    "Session {}: cannot bind video port {}: {}",
                    self.name, video_port, e
                );
                return false;
            }
        };
        *self.video_socket.write() = Some(video_socket);

        let instruction = format!("port {} {}", self.status_port, video_port);
        match self
            .command
            .send_ack(&instruction, ACK_TIMEOUT, &self.active)
            .await
        {
            Ok(true) => {
                tokio::time::sleep(SETTLE_DELAY).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("Session {}: port negotiation failed: {}", self.name, e);
                false
            }
        }
    }

    /// `PortNegotiating -> HandshakingVideo`: beacon the video relay until
    /// it answers. Any non-empty datagram acknowledges.
    async fn handshake_video(&self) -> bool {
        self.set_state(SessionState::HandshakingVideo);

        let Some(relay_addr) = self.video_relay_addr() else {
            return false;
        };
        let Some(socket) = self.video_socket.read().clone() else {
            return false;
        };

        let mut buf = vec![0u8; self.buffer_size];
        while self.is_active() {
            match socket.send(RTS_BEACON, &relay_addr).await {
                Ok(_) => {}
                Err(e) if e.is_closed() => return false,
                Err(e) => {
                    warn!("Session {}: RTS send failed: {}", self.name, e);
                    tokio::time::sleep(RTS_TIMEOUT).await;
                    continue;
                }
            }

            match socket.recv_timeout(&mut buf, RTS_TIMEOUT).await {
                Ok(Some((len, _))) if len > 0 => {
                    debug!("Session {}: video relay acknowledged", self.name);
                    return true;
                }
                Ok(_) => {}
                Err(e) if e.is_closed() => return false,
                Err(e) => warn!("Session {}: RTS receive failed: {}", self.name, e),
            }
        }

        false
    }

    /// `HandshakingVideo -> Active` prerequisites: start the video stream
    /// and pin the device speed.
    async fn start_streaming(&self) -> bool {
        for instruction in ["streamon", "speed 60"] {
            match self
                .command
                .send_ack(instruction, ACK_TIMEOUT, &self.active)
                .await
            {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    error!(
                        "Session {}: '{}' failed: {}",
                        self.name, instruction, e
                    );
                    return false;
                }
            }
        }
        true
    }

    // ========================================
    // Subtasks
    // ========================================

    /// Forwards device video datagrams verbatim to the backend relay.
    async fn video_task(self: Arc<Self>) {
        let Some(socket) = self.video_socket.read().clone() else {
            return;
        };
        let Some(relay_addr) = self.video_relay_addr() else {
            return;
        };

        let mut buf = vec![0u8; self.buffer_size];
        while self.is_active() {
            match socket.recv_timeout(&mut buf, SUBTASK_RECV_TIMEOUT).await {
                Ok(Some((len, _))) => {
                    if let Err(e) = socket.send(&buf[..len], &relay_addr).await {
                        if e.is_closed() {
                            break;
                        }
                        warn!("Session {}: video forward failed: {}", self.name, e);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_closed() => break,
                Err(e) => warn!("Session {}: video receive failed: {}", self.name, e),
            }
        }
        debug!("Session {}: video subtask exiting", self.name);
    }

    /// Forwards device status text to the backend, rate-limited.
    async fn status_task(self: Arc<Self>) {
        let mut buf = vec![0u8; self.buffer_size];
        let mut last_report: Option<Instant> = None;

        while self.is_active() {
            match self
                .status_socket
                .recv_timeout(&mut buf, SUBTASK_RECV_TIMEOUT)
                .await
            {
                Ok(Some((len, _))) => {
                    let due = last_report
                        .map_or(true, |at| at.elapsed() >= STATUS_RATE_LIMIT);
                    if !due {
                        continue;
                    }

                    let status = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                    match self.backend.report_status(self.name, status).await {
                        Ok(()) => last_report = Some(Instant::now()),
                        Err(e) => {
                            warn!("Session {}: status report failed: {}", self.name, e);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_closed() => break,
                Err(e) => warn!("Session {}: status receive failed: {}", self.name, e),
            }
        }
        debug!("Session {}: status subtask exiting", self.name);
    }

    /// Negotiates takeoff, then applies the backend's rc command stream.
    ///
    /// A device that never acknowledges takeoff leaves this task polling;
    /// no success is ever reported for an unacknowledged takeoff.
    async fn remote_control_task(self: Arc<Self>) {
        let mut backoff = TAKEOFF_POLL_BACKOFF_MIN;

        while self.is_active() {
            if !self.has_taken_off() {
                match self.backend.should_takeoff(self.name).await {
                    Ok(true) => {
                        backoff = TAKEOFF_POLL_BACKOFF_MIN;
                        match self.command.send_once("takeoff", TAKEOFF_ACK_TIMEOUT).await {
                            Ok(true) => {
                                self.has_taken_off.store(true, Ordering::Release);
                                info!("Session {}: takeoff acknowledged", self.name);
                                if let Err(e) = self.backend.confirm_takeoff(self.name).await {
                                    warn!(
                                        "Session {}: takeoff confirmation failed: {}",
                                        self.name, e
                                    );
                                }
                            }
                            Ok(false) => {
                                warn!(
                                    "Session {}: takeoff not acknowledged, will repoll",
                                    self.name
                                );
                            }
                            Err(e) => {
                                warn!("Session {}: takeoff send failed: {}", self.name, e);
                            }
                        }
                    }
                    Ok(false) => {
                        backoff = TAKEOFF_POLL_BACKOFF_MIN;
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                    Err(e) => {
                        warn!(
                            "Session {}: takeoff poll failed ({}), backing off {:?}",
                            self.name, e, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(TAKEOFF_POLL_BACKOFF_MAX);
                    }
                }
                continue;
            }

            match self.backend.next_command(self.name).await {
                Ok(Some(cmd)) => {
                    if let Err(e) = self.command.send_nowait(&cmd.to_instruction()).await {
                        warn!("Session {}: rc send failed: {}", self.name, e);
                    }
                }
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    warn!("Session {}: command poll failed: {}", self.name, e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        debug!("Session {}: remote-control subtask exiting", self.name);
    }

    /// Watches for backend land requests.
    ///
    /// The poll is not gated on the takeoff flag: if a takeoff
    /// acknowledgement was lost on the device link, the drone is airborne
    /// while the flag is false, and a land request must still go through.
    /// A land keeps the session `Active` with the takeoff flag cleared,
    /// ready for a future takeoff.
    async fn landing_task(self: Arc<Self>) {
        while self.is_active() {
            match self.backend.should_land(self.name).await {
                Ok(true) => {
                    match self.command.send_ack("land", ACK_TIMEOUT, &self.active).await {
                        Ok(true) => {
                            self.has_taken_off.store(false, Ordering::Release);
                            info!("Session {}: landed", self.name);
                            if let Err(e) = self.backend.confirm_land(self.name).await {
                                warn!(
                                    "Session {}: land confirmation failed: {}",
                                    self.name, e
                                );
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!("Session {}: land send failed: {}", self.name, e),
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Ok(false) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    warn!("Session {}: land poll failed: {}", self.name, e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        debug!("Session {}: landing subtask exiting", self.name);
    }

    // ========================================
    // Teardown
    // ========================================

    /// Tears the session down: flips the active flag, then closes every
    /// socket. Subtasks observe one of the two within their receive
    /// timeout and exit.
    ///
    /// # Returns
    /// `true` if this call performed the teardown, `false` if a previous
    /// call already did. The owner releases the status port and notifies
    /// the backend only on `true`, keeping both single-shot.
    pub async fn shutdown(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        info!("Session {}: shutting down", self.name);
        self.set_state(SessionState::Landing);

        // Flag first; sockets after. Subtasks treat the resulting
        // closed-socket errors as a normal exit.
        self.active.store(false, Ordering::Release);

        if let Err(e) = self.control_socket.shutdown().await {
            warn!("Session {}: control socket close failed: {}", self.name, e);
        }
        if let Err(e) = self.status_socket.shutdown().await {
            warn!("Session {}: status socket close failed: {}", self.name, e);
        }
        let video = self.video_socket.read().clone();
        if let Some(socket) = video {
            if let Err(e) = socket.shutdown().await {
                warn!("Session {}: video socket close failed: {}", self.name, e);
            }
        }

        self.set_state(SessionState::Disconnected);
        true
    }
}

impl std::fmt::Debug for DroneSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DroneSession")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("device", &self.device_addr)
            .field("status_port", &self.status_port)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client::testing::FakeBackend;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicUsize;

    async fn bind_loopback() -> Arc<dyn Transport> {
        Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap())
    }

    async fn make_session(
        name: &str,
        device_addr: SocketAddr,
        status_port: u16,
        backend: Arc<FakeBackend>,
    ) -> Arc<DroneSession> {
        let control = bind_loopback().await;
        let status = bind_loopback().await;

        DroneSession::new(
            SessionParams {
                name: name.parse().unwrap(),
                parent: "relay_box_1".into(),
                device_addr,
                status_port,
                video_relay_host: IpAddr::from([127, 0, 0, 2]),
                buffer_size: 2048,
            },
            control,
            status,
            backend,
        )
    }

    /// A scripted device: acks every instruction except those listed,
    /// and records what it was told.
    fn spawn_fake_device(
        socket: UdpTransport,
        ignore: &'static [&'static str],
        received: Arc<PlMutex<Vec<String>>>,
    ) {
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, source)) = socket.recv(&mut buf).await else {
                    return;
                };
                let instruction = String::from_utf8_lossy(&buf[..len]).to_string();
                received.lock().push(instruction.clone());

                let word = instruction.split_whitespace().next().unwrap_or("");
                if !ignore.contains(&word) {
                    let _ = socket.send(b"ok", &source.addr).await;
                }
            }
        });
    }

    /// A scripted video relay: acks RTS beacons and records every other
    /// datagram it receives.
    fn spawn_fake_video_relay(
        socket: UdpTransport,
        forwarded: Arc<PlMutex<Vec<Vec<u8>>>>,
        acks: Arc<AtomicUsize>,
    ) {
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, source)) = socket.recv(&mut buf).await else {
                    return;
                };
                if &buf[..len] == b"RTS" {
                    acks.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.send(b"ack", &source.addr).await;
                } else {
                    forwarded.lock().push(buf[..len].to_vec());
                }
            }
        });
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_full_activation_sequence() {
        let device_socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device_socket.local_addr().unwrap();
        let device_log = Arc::new(PlMutex::new(Vec::new()));
        spawn_fake_device(device_socket, &[], Arc::clone(&device_log));

        let relay_socket = UdpTransport::bind("127.0.0.2:0").await.unwrap();
        let video_port = relay_socket.local_addr().unwrap().port();
        let forwarded = Arc::new(PlMutex::new(Vec::new()));
        let rts_acks = Arc::new(AtomicUsize::new(0));
        spawn_fake_video_relay(relay_socket, Arc::clone(&forwarded), Arc::clone(&rts_acks));

        let backend = Arc::new(FakeBackend::new());
        backend
            .video_port
            .store(usize::from(video_port), Ordering::SeqCst);

        let session = make_session("drone_001", device_addr, 50400, Arc::clone(&backend)).await;

        let runner = tokio::spawn(Arc::clone(&session).run());

        let session_ref = Arc::clone(&session);
        let became_active = wait_for(
            move || session_ref.state() == SessionState::Active,
            Duration::from_secs(10),
        )
        .await;
        assert!(became_active, "session never reached Active");

        // Activation passed through every intermediate state in order
        assert_eq!(
            session.state_history(),
            vec![
                SessionState::Discovered,
                SessionState::SdkActivating,
                SessionState::PortNegotiating,
                SessionState::HandshakingVideo,
                SessionState::Active,
            ]
        );
        assert!(rts_acks.load(Ordering::SeqCst) >= 1);

        // The device was walked through the protocol in order
        {
            let log = device_log.lock();
            let port_instruction = format!("port 50400 {video_port}");
            assert_eq!(log[0], "command");
            assert!(log.contains(&port_instruction));
            assert!(log.contains(&"streamon".to_string()));
            assert!(log.contains(&"speed 60".to_string()));
        }

        // Teardown: first call wins, second is a no-op
        assert!(session.shutdown().await);
        assert!(!session.shutdown().await);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_active());

        // All four subtasks observe the flag and run() returns
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("subtasks did not exit after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unacknowledged_takeoff_never_reports_success() {
        let device_socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device_socket.local_addr().unwrap();
        let device_log = Arc::new(PlMutex::new(Vec::new()));
        // Device acks everything except takeoff
        spawn_fake_device(device_socket, &["takeoff"], Arc::clone(&device_log));

        let relay_socket = UdpTransport::bind("127.0.0.2:0").await.unwrap();
        let video_port = relay_socket.local_addr().unwrap().port();
        spawn_fake_video_relay(
            relay_socket,
            Arc::new(PlMutex::new(Vec::new())),
            Arc::new(AtomicUsize::new(0)),
        );

        let backend = Arc::new(FakeBackend::new());
        backend
            .video_port
            .store(usize::from(video_port), Ordering::SeqCst);
        backend.takeoff_requested.store(true, Ordering::SeqCst);

        let session = make_session("drone_002", device_addr, 50401, Arc::clone(&backend)).await;
        let runner = tokio::spawn(Arc::clone(&session).run());

        let session_ref = Arc::clone(&session);
        assert!(
            wait_for(
                move || session_ref.state() == SessionState::Active,
                Duration::from_secs(10),
            )
            .await
        );

        // Give the rc subtask one full takeoff attempt window
        let backend_ref = Arc::clone(&backend);
        wait_for(
            move || backend_ref.calls_named("should_takeoff") >= 1,
            Duration::from_secs(5),
        )
        .await;
        tokio::time::sleep(TAKEOFF_ACK_TIMEOUT + Duration::from_millis(500)).await;

        assert!(!session.has_taken_off());
        assert_eq!(backend.calls_named("confirm_takeoff"), 0);

        session.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), runner).await;
    }

    #[tokio::test]
    async fn test_activation_retries_after_video_bind_failure() {
        let device_socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device_socket.local_addr().unwrap();
        let device_log = Arc::new(PlMutex::new(Vec::new()));
        spawn_fake_device(device_socket, &[], Arc::clone(&device_log));

        let relay_socket = UdpTransport::bind("127.0.0.2:0").await.unwrap();
        let relay_port = relay_socket.local_addr().unwrap().port();
        spawn_fake_video_relay(
            relay_socket,
            Arc::new(PlMutex::new(Vec::new())),
            Arc::new(AtomicUsize::new(0)),
        );

        // Occupy a port without address reuse so the session's wildcard
        // bind keeps failing while the backend assigns it
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let blocked_port = blocker.local_addr().unwrap().port();

        let backend = Arc::new(FakeBackend::new());
        backend
            .video_port
            .store(usize::from(blocked_port), Ordering::SeqCst);

        let session = make_session("drone_004", device_addr, 50403, Arc::clone(&backend)).await;
        let runner = tokio::spawn(Arc::clone(&session).run());

        // The session keeps re-requesting a port instead of giving up
        let backend_ref = Arc::clone(&backend);
        assert!(
            wait_for(
                move || backend_ref.calls_named("request_video_port") >= 2,
                Duration::from_secs(15),
            )
            .await,
            "activation did not retry after the bind failure"
        );
        assert!(session.is_active());
        assert_ne!(session.state(), SessionState::Active);

        // Backend reassigns a usable port; the next attempt completes
        backend
            .video_port
            .store(usize::from(relay_port), Ordering::SeqCst);

        let session_ref = Arc::clone(&session);
        assert!(
            wait_for(
                move || session_ref.state() == SessionState::Active,
                Duration::from_secs(15),
            )
            .await,
            "session never recovered after the port reassignment"
        );

        session.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), runner).await;
    }

    #[tokio::test]
    async fn test_land_request_honored_when_takeoff_flag_clear() {
        let device_socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device_socket.local_addr().unwrap();
        let device_log = Arc::new(PlMutex::new(Vec::new()));
        spawn_fake_device(device_socket, &[], Arc::clone(&device_log));

        let relay_socket = UdpTransport::bind("127.0.0.2:0").await.unwrap();
        let video_port = relay_socket.local_addr().unwrap().port();
        spawn_fake_video_relay(
            relay_socket,
            Arc::new(PlMutex::new(Vec::new())),
            Arc::new(AtomicUsize::new(0)),
        );

        let backend = Arc::new(FakeBackend::new());
        backend
            .video_port
            .store(usize::from(video_port), Ordering::SeqCst);
        // Backend wants the drone down even though no takeoff was ever
        // acknowledged (e.g. the takeoff ack was lost on the air link)
        backend.land_requested.store(true, Ordering::SeqCst);

        let session = make_session("drone_005", device_addr, 50404, Arc::clone(&backend)).await;
        let runner = tokio::spawn(Arc::clone(&session).run());

        let session_ref = Arc::clone(&session);
        assert!(
            wait_for(
                move || session_ref.state() == SessionState::Active,
                Duration::from_secs(10),
            )
            .await
        );
        assert!(!session.has_taken_off());

        let backend_ref = Arc::clone(&backend);
        assert!(
            wait_for(
                move || backend_ref.calls_named("confirm_land") >= 1,
                Duration::from_secs(5),
            )
            .await,
            "land request was never forwarded"
        );
        assert!(device_log.lock().contains(&"land".to_string()));
        assert!(!session.has_taken_off());

        session.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), runner).await;
    }

    #[tokio::test]
    async fn test_shutdown_without_run() {
        let device_addr: SocketAddr = "127.0.0.1:8889".parse().unwrap();
        let backend = Arc::new(FakeBackend::new());
        let session = make_session("drone_003", device_addr, 50402, backend).await;

        assert!(session.is_active());
        assert_eq!(session.state(), SessionState::Discovered);

        assert!(session.shutdown().await);
        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Disconnected);

        // Idempotent
        assert!(!session.shutdown().await);
    }
}
