// ============================================
// File: crates/skybridge-relay/src/main.rs
// ============================================
//! # Skybridge Relay Entry Point
//!
//! ## Creation Reason
//! Main entry point for the relay node binary. Handles CLI parsing,
//! logging setup, configuration loading and node startup.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Relay node execution
//!
//! ## Usage
//! ```bash
//! # Start the relay node
//! skybridge-relay start --config /etc/skybridge/relay.toml
//!
//! # Validate a configuration file
//! skybridge-relay validate --config /etc/skybridge/relay.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Discovery shells out to `ip neigh` / `arp` and `ping`; the node
//!   needs those tools on PATH
//! - The node runs until terminated (Ctrl+C triggers session teardown)
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skybridge_relay::{RelayConfig, RelayNode};

// ============================================
// CLI Definition
// ============================================

/// Skybridge drone-fleet relay node
#[derive(Parser, Debug)]
#[command(name = "skybridge-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay node
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/skybridge/relay.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/skybridge/relay.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the relay node.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    info!("Starting skybridge relay node...");

    let config = if config_path.exists() {
        RelayConfig::load(&config_path).await?
    } else {
        info!("Config file not found, using defaults");
        RelayConfig::default()
    };

    // Re-initialize logging with the configured level
    init_logging(&config.logging.level);

    if config.discovery.authorized_devices.is_empty() {
        info!("Allow-list is empty; no devices will be adopted");
    }

    let node = RelayNode::new(config)?;
    node.run().await?;

    Ok(())
}

/// Validates a configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("Config file not found: {}", config_path.display());
        println!("The node would use default values.");
        return Ok(());
    }

    let config = RelayConfig::load(&config_path).await?;

    println!("Configuration is valid");
    println!();
    println!("Node:");
    println!("   Name:            {}", config.node.name);
    println!();
    println!("Network:");
    println!("   Command port:    {}", config.network.command_port);
    println!(
        "   Status ports:    {}..+{}",
        config.network.status_port_first, config.network.status_port_count
    );
    println!();
    println!("Backend:");
    println!("   Base URL:        {}", config.backend.base_url);
    println!("   Video relay:     {}", config.backend.video_relay_host);
    println!(
        "   Heartbeat:       every {}s",
        config.backend.heartbeat_interval_secs
    );
    println!();
    println!("Discovery:");
    println!("   Subnet:          {}*", config.discovery.subnet_prefix);
    println!(
        "   Authorized:      {} device(s)",
        config.discovery.authorized_devices.len()
    );

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
