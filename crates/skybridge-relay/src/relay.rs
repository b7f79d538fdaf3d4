// ============================================
// File: crates/skybridge-relay/src/relay.rs
// ============================================
//! # Relay Node Coordinator
//!
//! ## Creation Reason
//! Top-level owner of one relay node: its identity, the discovery
//! scanner, the status port pool, the session registry and the backend
//! heartbeat.
//!
//! ## Main Functionality
//! - Startup authentication (retried forever; the node is useless
//!   unauthenticated)
//! - Concurrent discovery scanner + heartbeat loop
//! - Graceful shutdown on Ctrl+C with session teardown
//!
//! ## Main Logical Flow
//! 1. Authenticate with the backend (fixed-delay retry loop)
//! 2. Spawn the discovery scanner and the heartbeat loop
//! 3. Wait for the shutdown signal
//! 4. Broadcast shutdown, tear down every session, join the tasks
//!
//! ## ⚠️ Important Note for Next Developer
//! - The heartbeat never gives up: a failed report is logged and the
//!   next tick tries again with no backoff escalation
//! - Teardown releases each session's port only when that session's
//!   `shutdown` reports it performed the teardown, keeping releases
//!   single-shot even if the scanner races us
//!
//! ## Last Modified
//! v0.1.0 - Initial coordinator implementation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::backend::{BackendApi, BackendClient};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::services::discovery::{DeviceProbe, DiscoveryScanner, ScannerParams, SystemProbe};
use crate::services::port_pool::PortPool;
use crate::services::registry::DroneRegistry;

/// How long to wait for background tasks to finish during shutdown.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// RelayNode
// ============================================

/// One relay node process: bridges the local fleet to the backend.
pub struct RelayNode {
    config: RelayConfig,
    backend: Arc<dyn BackendApi>,
    probe: Arc<dyn DeviceProbe>,
    pool: Arc<PortPool>,
    registry: Arc<DroneRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayNode {
    /// Creates a node with the production backend client and system probe.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let backend = Arc::new(BackendClient::new(
            config.backend.clone(),
            &config.node.name,
            &config.node.password,
        )?);
        let probe = Arc::new(SystemProbe::new(&config.discovery));
        Ok(Self::with_components(config, backend, probe))
    }

    /// Creates a node with injected backend and probe implementations.
    #[must_use]
    pub fn with_components(
        config: RelayConfig,
        backend: Arc<dyn BackendApi>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        let pool = Arc::new(PortPool::new(
            config.network.status_port_first,
            config.network.status_port_count,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            backend,
            probe,
            pool,
            registry: Arc::new(DroneRegistry::new()),
            shutdown_tx,
        }
    }

    /// Returns the session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<DroneRegistry> {
        &self.registry
    }

    /// Returns the status port pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    /// Runs the node until an external shutdown signal arrives.
    ///
    /// # Errors
    /// Returns error only if the signal handler cannot be installed;
    /// everything else is retried or logged.
    pub async fn run(&self) -> Result<()> {
        info!("Relay node {} starting", self.config.node.name);

        self.authenticate().await;
        let tasks = self.spawn_tasks();

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        self.shutdown().await;
        Self::join_tasks(tasks).await;

        info!("Relay node {} stopped", self.config.node.name);
        Ok(())
    }

    /// Authenticates with the backend, retrying forever on failure.
    pub async fn authenticate(&self) {
        let delay = self.config.backend.auth_retry_delay();
        loop {
            match self.backend.authenticate().await {
                Ok(()) => return,
                Err(e) => {
                    warn!("Authentication failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Spawns the discovery scanner and the heartbeat loop.
    pub fn spawn_tasks(&self) -> Vec<JoinHandle<()>> {
        let scanner = Arc::new(DiscoveryScanner::new(
            ScannerParams {
                discovery: self.config.discovery.clone(),
                node_name: self.config.node.name.clone(),
                command_port: self.config.network.command_port,
                buffer_size: self.config.network.buffer_size,
                video_relay_host: self.config.backend.video_relay_host.into(),
            },
            Arc::clone(&self.pool),
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            Arc::clone(&self.probe),
            self.shutdown_tx.clone(),
        ));
        let scanner_handle = tokio::spawn(scanner.run());

        let heartbeat_handle = tokio::spawn(Self::heartbeat_loop(
            Arc::clone(&self.backend),
            Arc::clone(&self.registry),
            self.config.backend.heartbeat_interval(),
            self.shutdown_tx.subscribe(),
        ));

        vec![scanner_handle, heartbeat_handle]
    }

    /// Reports the node's attached drones until shutdown.
    ///
    /// A failed report is logged; the next tick retries with no backoff
    /// escalation.
    async fn heartbeat_loop(
        backend: Arc<dyn BackendApi>,
        registry: Arc<DroneRegistry>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = backend.heartbeat(registry.names()).await {
                        warn!("Heartbeat failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Heartbeat loop stopping");
                    break;
                }
            }
        }
    }

    /// Broadcasts shutdown and tears down every live session.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        for session in self.registry.sessions() {
            let name = session.name();
            self.registry.remove(name);
            if session.shutdown().await {
                self.pool.release(session.status_port());
                if let Err(e) = self.backend.report_disconnected(name).await {
                    warn!("Disconnect report for {} failed: {}", name, e);
                }
            }
        }
    }

    async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
        for task in tasks {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                error!("Background task did not stop within {:?}", TASK_JOIN_TIMEOUT);
            }
        }
    }
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("name", &self.config.node.name)
            .field("sessions", &self.registry.len())
            .field("ports_leased", &self.pool.leased_count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
