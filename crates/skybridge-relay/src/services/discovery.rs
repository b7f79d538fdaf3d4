// ============================================
// File: crates/skybridge-relay/src/services/discovery.rs
// ============================================
//! # Device Discovery and Reconciliation
//!
//! ## Creation Reason
//! The relay node must find drones on its local wireless network and keep
//! the active-session set in sync with what is physically reachable.
//!
//! ## Main Functionality
//! - `DeviceProbe`: capability trait for neighbor enumeration + liveness
//! - `SystemProbe`: production implementation over the OS neighbor table
//!   and ping
//! - `DiscoveryScanner`: allow-list filter, liveness check, and
//!   reconciliation against the session registry
//!
//! ## Reconciliation Rules
//! - A surviving candidate without a session triggers add: assign a name,
//!   lease a status port, bind sockets, spawn the session
//! - A session whose device is gone triggers remove: cooperative
//!   teardown, single port release, backend disconnect notification
//! - Enumeration and probe failures are transient; the loop continues
//!
//! ## ⚠️ Important Note for Next Developer
//! - Name and port exhaustion fail only that add-attempt; the scanner
//!   keeps running at reduced capacity
//! - The disconnect notification retries in its own task so a slow
//!   backend cannot stall the scan loop
//!
//! ## Last Modified
//! v0.1.0 - Initial discovery implementation

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use skybridge_transport::{Transport, UdpTransport};

use crate::backend::BackendApi;
use crate::config::DiscoveryConfig;
use crate::error::{RelayError, Result};
use crate::services::port_pool::PortPool;
use crate::services::registry::DroneRegistry;
use crate::services::session::{DroneSession, SessionParams};
use crate::types::MacAddr;

/// Delay between failed disconnect notifications.
const DISCONNECT_NOTIFY_RETRY: Duration = Duration::from_secs(2);

// ============================================
// Neighbor
// ============================================

/// One entry from the local network's neighbor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    /// Device network address.
    pub addr: IpAddr,
    /// Device hardware identifier.
    pub hw: MacAddr,
}

// ============================================
// DeviceProbe Trait
// ============================================

/// Capability to enumerate nearby devices and verify their liveness.
///
/// Abstracted so the reconciliation algorithm is portable and testable
/// with a scripted implementation.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// Enumerates devices currently visible to the network stack.
    ///
    /// # Errors
    /// Returns error if the neighbor table cannot be read; the scanner
    /// treats this as transient.
    async fn neighbors(&self) -> Result<Vec<Neighbor>>;

    /// Verifies a candidate answers a bounded reachability probe.
    async fn is_alive(&self, addr: IpAddr) -> bool;
}

// ============================================
// SystemProbe
// ============================================

/// Production probe over the OS neighbor table (`ip neigh`, falling back
/// to `arp -a`) and ICMP echo via the system `ping`.
pub struct SystemProbe {
    subnet_prefix: String,
    probe_count: u32,
    probe_timeout: Duration,
}

impl SystemProbe {
    /// Creates a probe tuned from the discovery configuration.
    #[must_use]
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            subnet_prefix: config.subnet_prefix.clone(),
            probe_count: config.probe_count,
            probe_timeout: config.probe_timeout(),
        }
    }

    async fn run_listing(program: &str, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RelayError::Probe(format!("{program} failed to start: {e}")))?;

        if !output.status.success() {
            return Err(RelayError::Probe(format!(
                "{program} exited with {}",
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parses `ip neigh` output: `<ip> dev <if> lladdr <mac> <state>`.
    fn parse_ip_neigh(&self, listing: &str) -> Vec<Neighbor> {
        let mut found = Vec::new();
        for line in listing.lines() {
            let mut tokens = line.split_whitespace();
            let Some(ip_token) = tokens.next() else {
                continue;
            };
            if !ip_token.starts_with(&self.subnet_prefix) {
                continue;
            }
            let Ok(addr) = ip_token.parse::<IpAddr>() else {
                continue;
            };

            let mut rest = tokens;
            while let Some(token) = rest.next() {
                if token == "lladdr" {
                    if let Some(hw) = rest.next().and_then(|t| t.parse::<MacAddr>().ok()) {
                        found.push(Neighbor { addr, hw });
                    }
                    break;
                }
            }
        }
        found
    }

    /// Parses `arp -a` output: `? (<ip>) at <mac> ...`.
    fn parse_arp(&self, listing: &str) -> Vec<Neighbor> {
        let mut found = Vec::new();
        for line in listing.lines() {
            let Some(open) = line.find('(') else { continue };
            let Some(close) = line[open..].find(')') else {
                continue;
            };
            let ip_token = &line[open + 1..open + close];
            if !ip_token.starts_with(&self.subnet_prefix) {
                continue;
            }
            let Ok(addr) = ip_token.parse::<IpAddr>() else {
                continue;
            };

            let hw = line[open + close..]
                .split_whitespace()
                .find_map(|token| token.parse::<MacAddr>().ok());
            if let Some(hw) = hw {
                found.push(Neighbor { addr, hw });
            }
        }
        found
    }
}

#[async_trait]
impl DeviceProbe for SystemProbe {
    async fn neighbors(&self) -> Result<Vec<Neighbor>> {
        match Self::run_listing("ip", &["-4", "neigh", "show"]).await {
            Ok(listing) => Ok(self.parse_ip_neigh(&listing)),
            Err(e) => {
                debug!("ip neigh unavailable ({}), trying arp", e);
                let listing = Self::run_listing("arp", &["-a"]).await?;
                Ok(self.parse_arp(&listing))
            }
        }
    }

    async fn is_alive(&self, addr: IpAddr) -> bool {
        let timeout_secs = self.probe_timeout.as_secs().max(1).to_string();
        for _ in 0..self.probe_count {
            let result = tokio::process::Command::new("ping")
                .args(["-c", "1", "-W", &timeout_secs, &addr.to_string()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;

            if matches!(result, Ok(status) if status.success()) {
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("subnet_prefix", &self.subnet_prefix)
            .field("probe_count", &self.probe_count)
            .finish()
    }
}

// ============================================
// DiscoveryScanner
// ============================================

/// Construction parameters for the discovery scanner.
pub struct ScannerParams {
    /// Discovery configuration (allow-list, intervals).
    pub discovery: DiscoveryConfig,
    /// Owning relay node name.
    pub node_name: String,
    /// Device control port.
    pub command_port: u16,
    /// Datagram buffer size handed to sessions.
    pub buffer_size: usize,
    /// Backend video relay host handed to sessions.
    pub video_relay_host: IpAddr,
}

/// Keeps the session registry in sync with the reachable fleet.
pub struct DiscoveryScanner {
    params: ScannerParams,
    allow_list: HashSet<MacAddr>,
    pool: Arc<PortPool>,
    registry: Arc<DroneRegistry>,
    backend: Arc<dyn BackendApi>,
    probe: Arc<dyn DeviceProbe>,
    /// Node shutdown signal; the scan loop and the spawned disconnect
    /// notifiers each subscribe from it.
    shutdown: broadcast::Sender<()>,
}

impl DiscoveryScanner {
    /// Creates a scanner over the given registry and pool.
    #[must_use]
    pub fn new(
        params: ScannerParams,
        pool: Arc<PortPool>,
        registry: Arc<DroneRegistry>,
        backend: Arc<dyn BackendApi>,
        probe: Arc<dyn DeviceProbe>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let allow_list = params.discovery.authorized_devices.iter().copied().collect();
        Self {
            params,
            allow_list,
            pool,
            registry,
            backend,
            probe,
            shutdown,
        }
    }

    /// Runs the scan loop until the shutdown signal arrives.
    ///
    /// Scan failures are transient: logged, never fatal to the loop.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        info!(
            "Discovery scanner started ({} authorized devices)",
            self.allow_list.len()
        );

        let mut ticker = tokio::time::interval(self.params.discovery.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!("Discovery scan failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Discovery scanner stopping");
                    break;
                }
            }
        }
    }

    /// One scan cycle: enumerate, filter, verify, reconcile.
    ///
    /// # Errors
    /// Returns error only when neighbor enumeration itself fails.
    pub async fn scan_once(&self) -> Result<()> {
        let neighbors = self.probe.neighbors().await?;

        let mut live: HashSet<IpAddr> = HashSet::new();
        for neighbor in neighbors {
            if !self.allow_list.contains(&neighbor.hw) {
                debug!(
                    "Ignoring unauthorized device {} ({})",
                    neighbor.addr, neighbor.hw
                );
                continue;
            }
            if self.probe.is_alive(neighbor.addr).await {
                live.insert(neighbor.addr);
            } else {
                debug!("Authorized device {} failed liveness probes", neighbor.addr);
            }
        }

        self.reconcile(&live).await;
        Ok(())
    }

    /// Brings the session set in line with the live candidate set.
    async fn reconcile(&self, live: &HashSet<IpAddr>) {
        // Adds
        for addr in live {
            if !self.registry.contains_addr(*addr) {
                if let Err(e) = self.adopt(*addr).await {
                    if e.is_capacity() {
                        error!("Cannot adopt device {}: {}", addr, e);
                    } else {
                        warn!("Adopting device {} failed: {}", addr, e);
                    }
                }
            }
        }

        // Removes
        for session in self.registry.sessions() {
            if !live.contains(&session.device_addr().ip()) {
                self.retire(session).await;
            }
        }
    }

    /// Creates and starts a session for a newly discovered device.
    async fn adopt(&self, addr: IpAddr) -> Result<()> {
        let name = self.registry.next_name()?;
        let status_port = self.pool.lease()?;

        let control_socket = match UdpTransport::bind("0.0.0.0:0").await {
            Ok(socket) => Arc::new(socket) as Arc<dyn Transport>,
            Err(e) => {
                self.pool.release(status_port);
                return Err(e.into());
            }
        };

        let status_socket = match UdpTransport::bind(format!("0.0.0.0:{status_port}")).await {
            Ok(socket) => Arc::new(socket) as Arc<dyn Transport>,
            Err(e) => {
                self.pool.release(status_port);
                return Err(e.into());
            }
        };

        let session = DroneSession::new(
            SessionParams {
                name,
                parent: self.params.node_name.clone(),
                device_addr: SocketAddr::new(addr, self.params.command_port),
                status_port,
                video_relay_host: self.params.video_relay_host,
                buffer_size: self.params.buffer_size,
            },
            control_socket,
            status_socket,
            Arc::clone(&self.backend),
        );

        self.registry.insert(Arc::clone(&session));
        tokio::spawn(session.run());

        info!("Adopted device {} as {}", addr, name);
        Ok(())
    }

    /// Tears down a session whose device disappeared.
    async fn retire(&self, session: Arc<DroneSession>) {
        let name = session.name();
        let addr = session.device_addr();
        info!("Device {} gone, retiring {}", addr, name);

        self.registry.remove(name);

        if session.shutdown().await {
            self.pool.release(session.status_port());

            // Notify from a separate task so a slow backend cannot
            // stall the scan loop. Retried until acknowledged or the
            // node shuts down.
            let backend = Arc::clone(&self.backend);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    match backend.report_disconnected(name).await {
                        Ok(()) => return,
                        Err(e) => warn!(
                            "Disconnect report for {} failed (attempt {}): {}",
                            name, attempt, e
                        ),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(DISCONNECT_NOTIFY_RETRY) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            });
        }
    }
}

impl std::fmt::Debug for DiscoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryScanner")
            .field("allow_list", &self.allow_list.len())
            .field("sessions", &self.registry.len())
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
    use parking_lot::Mutex;

    /// Scripted probe: neighbors and liveness are set by the test.
    #[derive(Default)]
    struct FakeProbe {
        neighbors: Mutex<Vec<Neighbor>>,
        dead: Mutex<HashSet<IpAddr>>,
    }

    impl FakeProbe {
        fn set_neighbors(&self, entries: &[(&str, &str)]) {
            *self.neighbors.lock() = entries
                .iter()
                .map(|(ip, mac)| Neighbor {
                    addr: ip.parse().unwrap(),
                    hw: mac.parse().unwrap(),
                })
                .collect();
        }

        fn mark_dead(&self, ip: &str) {
            self.dead.lock().insert(ip.parse().unwrap());
        }
    }

    #[async_trait]
    impl DeviceProbe for FakeProbe {
        async fn neighbors(&self) -> Result<Vec<Neighbor>> {
            Ok(self.neighbors.lock().clone())
        }

        async fn is_alive(&self, addr: IpAddr) -> bool {
            !self.dead.lock().contains(&addr)
        }
    }

    fn test_scanner(
        allow: &[&str],
        pool_capacity: u16,
        probe: Arc<FakeProbe>,
        backend: Arc<FakeBackend>,
    ) -> (DiscoveryScanner, Arc<DroneRegistry>, Arc<PortPool>) {
        let mut discovery = DiscoveryConfig::default();
        discovery.authorized_devices = allow.iter().map(|m| m.parse().unwrap()).collect();
        discovery.subnet_prefix = "127.0.0.".into();

        let pool = Arc::new(PortPool::new(50400, pool_capacity));
        let registry = Arc::new(DroneRegistry::new());

        let (shutdown_tx, _) = broadcast::channel(1);
        let scanner = DiscoveryScanner::new(
            ScannerParams {
                discovery,
                node_name: "relay_box_1".into(),
                command_port: 8889,
                buffer_size: 2048,
                video_relay_host: IpAddr::from([127, 0, 0, 1]),
            },
            Arc::clone(&pool),
            Arc::clone(&registry),
            backend,
            probe,
            shutdown_tx,
        );

        (scanner, registry, pool)
    }

    #[tokio::test]
    async fn test_allow_list_filters_adoption() {
        let probe = Arc::new(FakeProbe::default());
        probe.set_neighbors(&[
            ("127.0.0.5", "aa:aa:aa:aa:aa:aa"),
            ("127.0.0.9", "bb:bb:bb:bb:bb:bb"),
        ]);

        let backend = Arc::new(FakeBackend::new());
        let (scanner, registry, _pool) =
            test_scanner(&["AA:AA:AA:AA:AA:AA"], 254, probe, backend);

        scanner.scan_once().await.unwrap();

        assert_eq!(registry.len(), 1);
        let names: Vec<String> = registry.names().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["drone_001"]);
        assert!(registry.contains_addr("127.0.0.5".parse().unwrap()));
        assert!(!registry.contains_addr("127.0.0.9".parse().unwrap()));

        for session in registry.sessions() {
            session.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_dead_candidate_not_adopted() {
        let probe = Arc::new(FakeProbe::default());
        probe.set_neighbors(&[("127.0.0.5", "aa:aa:aa:aa:aa:aa")]);
        probe.mark_dead("127.0.0.5");

        let backend = Arc::new(FakeBackend::new());
        let (scanner, registry, _pool) =
            test_scanner(&["aa:aa:aa:aa:aa:aa"], 254, probe, backend);

        scanner.scan_once().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_absent_device_retired_with_single_release() {
        let probe = Arc::new(FakeProbe::default());
        probe.set_neighbors(&[("127.0.0.5", "aa:aa:aa:aa:aa:aa")]);

        let backend = Arc::new(FakeBackend::new());
        let (scanner, registry, pool) = test_scanner(
            &["aa:aa:aa:aa:aa:aa"],
            254,
            Arc::clone(&probe),
            Arc::clone(&backend),
        );

        scanner.scan_once().await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(pool.leased_count(), 1);

        // Device disappears
        probe.set_neighbors(&[]);
        scanner.scan_once().await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(pool.leased_count(), 0);

        // Rescanning the empty world releases nothing twice
        scanner.scan_once().await.unwrap();
        assert_eq!(pool.leased_count(), 0);

        // Disconnect notification fires once
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while backend.calls_named("report_disconnected") == 0
            && std::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backend.calls_named("report_disconnected"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_notification_retries_until_acknowledged() {
        use std::sync::atomic::Ordering;

        let probe = Arc::new(FakeProbe::default());
        probe.set_neighbors(&[("127.0.0.5", "aa:aa:aa:aa:aa:aa")]);

        let backend = Arc::new(FakeBackend::new());
        // First two notifications fail; the third succeeds
        backend.disconnect_failures.store(2, Ordering::SeqCst);

        let (scanner, registry, _pool) = test_scanner(
            &["aa:aa:aa:aa:aa:aa"],
            254,
            Arc::clone(&probe),
            Arc::clone(&backend),
        );

        scanner.scan_once().await.unwrap();
        probe.set_neighbors(&[]);
        scanner.scan_once().await.unwrap();
        assert!(registry.is_empty());

        // The notifier keeps going past the failures until acknowledged
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while backend.calls_named("report_disconnected") < 3
            && std::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(backend.calls_named("report_disconnected"), 3);
    }

    #[tokio::test]
    async fn test_session_set_tracks_candidate_set() {
        let probe = Arc::new(FakeProbe::default());
        let backend = Arc::new(FakeBackend::new());
        let (scanner, registry, _pool) = test_scanner(
            &["aa:aa:aa:aa:aa:aa", "cc:cc:cc:cc:cc:cc"],
            254,
            Arc::clone(&probe),
            backend,
        );

        probe.set_neighbors(&[
            ("127.0.0.5", "aa:aa:aa:aa:aa:aa"),
            ("127.0.0.6", "cc:cc:cc:cc:cc:cc"),
        ]);
        scanner.scan_once().await.unwrap();
        assert_eq!(registry.len(), 2);

        // One leaves, one stays
        probe.set_neighbors(&[("127.0.0.6", "cc:cc:cc:cc:cc:cc")]);
        scanner.scan_once().await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains_addr("127.0.0.6".parse().unwrap()));

        // It comes back and is re-adopted under the lowest free name
        probe.set_neighbors(&[
            ("127.0.0.5", "aa:aa:aa:aa:aa:aa"),
            ("127.0.0.6", "cc:cc:cc:cc:cc:cc"),
        ]);
        scanner.scan_once().await.unwrap();
        assert_eq!(registry.len(), 2);

        for session in registry.sessions() {
            session.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_pool_exhaustion_caps_fleet() {
        let probe = Arc::new(FakeProbe::default());
        probe.set_neighbors(&[
            ("127.0.0.5", "aa:aa:aa:aa:aa:aa"),
            ("127.0.0.6", "bb:bb:bb:bb:bb:bb"),
            ("127.0.0.7", "cc:cc:cc:cc:cc:cc"),
        ]);

        let backend = Arc::new(FakeBackend::new());
        let (scanner, registry, pool) = test_scanner(
            &[
                "aa:aa:aa:aa:aa:aa",
                "bb:bb:bb:bb:bb:bb",
                "cc:cc:cc:cc:cc:cc",
            ],
            2,
            probe,
            backend,
        );

        scanner.scan_once().await.unwrap();

        // Capacity 2: exactly two adopted, the third attempt failed
        assert_eq!(registry.len(), 2);
        assert_eq!(pool.leased_count(), 2);

        for session in registry.sessions() {
            session.shutdown().await;
        }
    }

    #[test]
    fn test_parse_ip_neigh_listing() {
        let probe = SystemProbe::new(&DiscoveryConfig {
            subnet_prefix: "192.168.137.".into(),
            ..DiscoveryConfig::default()
        });

        let listing = "\
192.168.137.45 dev wlan0 lladdr 60:60:1f:5b:4b:ea REACHABLE
192.168.137.78 dev wlan0 lladdr aa:bb:cc:dd:ee:ff STALE
10.0.0.1 dev eth0 lladdr 11:22:33:44:55:66 REACHABLE
192.168.137.2 dev wlan0  FAILED
";

        let neighbors = probe.parse_ip_neigh(listing);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].addr, "192.168.137.45".parse::<IpAddr>().unwrap());
        assert_eq!(neighbors[0].hw.to_string(), "60:60:1f:5b:4b:ea");
    }

    #[test]
    fn test_parse_arp_listing() {
        let probe = SystemProbe::new(&DiscoveryConfig {
            subnet_prefix: "192.168.137.".into(),
            ..DiscoveryConfig::default()
        });

        let listing = "\
? (192.168.137.45) at 60-60-1f-5b-4b-ea [ether] on wlan0
? (10.0.0.1) at 11:22:33:44:55:66 [ether] on eth0
? (192.168.137.90) at <incomplete> on wlan0
";

        let neighbors = probe.parse_arp(listing);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].hw.to_string(), "60:60:1f:5b:4b:ea");
    }
}
