//! wgdriver - WireGuard Network Driver for Docker
//!
//! Runs the remote network driver plugin and offers a few admin commands
//! over its configuration and state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wgdriver::api::HttpServer;
use wgdriver::config::DriverConfig;
use wgdriver::driver::Driver;
use wgdriver::error::Result;
use wgdriver::interface::{Interfaces, IpLinkControl};
use wgdriver::state::NetworkStore;

/// wgdriver - WireGuard Network Driver for Docker
#[derive(Parser)]
#[command(name = "wgdriver")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wgdriver/wgdriver.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the plugin
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wgdriver.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// List stored networks and endpoints
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            run_start(config).await
        }
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(&cli.config),
        Commands::List => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            run_list(config).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> Result<DriverConfig> {
    if !path.exists() {
        eprintln!("Config file {} not found, using defaults", path.display());
        return Ok(DriverConfig::default());
    }
    DriverConfig::from_file(path).map_err(|e| {
        eprintln!("Failed to load configuration from {}: {}", path.display(), e);
        e
    })
}

/// Start the plugin
async fn run_start(config: DriverConfig) -> Result<()> {
    tracing::info!("Starting wgdriver...");

    if !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("Not running as root; creating tunnel interfaces will likely fail");
    }

    let store = match NetworkStore::open(&config.state.path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to open network state {:?}: {}", config.state.path, e);
            return Err(e);
        }
    };

    let link = Arc::new(IpLinkControl::new(&config.interfaces));
    let interfaces = Interfaces::new(link, &config.interfaces);
    let driver = Arc::new(Driver::new(
        store,
        interfaces,
        config.interfaces.dst_prefix.clone(),
    ));

    if config.driver.reconcile_on_start {
        match driver.reconcile().await {
            Ok(0) => tracing::info!("All interface bindings are consistent"),
            Ok(n) => tracing::warn!("Cleared {} stale interface binding(s)", n),
            Err(e) => tracing::error!("Reconcile failed: {}", e),
        }
    }

    if let Some(spec) = &config.server.spec_file {
        if let Some(parent) = spec.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(spec, config.plugin_spec())?;
        tracing::info!("Wrote plugin spec {:?}", spec);
    }

    let server = HttpServer::new(config.server.clone(), driver);
    let result = server.start(shutdown_signal()).await;

    if let Some(spec) = &config.server.spec_file {
        if let Err(e) = std::fs::remove_file(spec) {
            tracing::warn!("Failed to remove plugin spec {:?}: {}", spec, e);
        }
    }

    tracing::info!("wgdriver shutdown complete");
    result
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Received shutdown signal");
}

/// Write a commented default configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# wgdriver Configuration
# Generated configuration file

[server]
bind_address = "127.0.0.1:9753"
# Docker discovers TCP plugins through a spec file
# spec_file = "/etc/docker/plugins/wg.spec"

[state]
path = "/var/lib/wgdriver/networks.db"

[interfaces]
name_prefix = "bst"
dst_prefix = "wg"
keepalive_secs = 25
ip_command = "ip"
wg_command = "wg"
command_timeout_secs = 30

[driver]
reconcile_on_start = true

[logging]
level = "info"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then start with: wgdriver --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match DriverConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Bind Address: {}", config.server.bind_address);
            println!("  State: {}", config.state.path.display());
            println!("  Interface Prefix: {}", config.interfaces.name_prefix);
            println!("  Keepalive: {}s", config.interfaces.keepalive_secs);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Print stored networks and endpoints
async fn run_list(config: DriverConfig) -> Result<()> {
    let store = NetworkStore::open(&config.state.path)?;
    let networks = store.snapshot().await;

    if networks.is_empty() {
        println!("No networks");
        return Ok(());
    }

    for network in networks.values() {
        println!("Network {}", network.id);
        println!("  Peer:    {} ({})", network.peer_endpoint, network.peer_public_key);
        println!("  Created: {}", network.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        for endpoint in network.endpoints.values() {
            println!(
                "  - {} {} {}",
                endpoint.id,
                endpoint.address,
                endpoint.joined_interface.as_deref().unwrap_or("(not joined)")
            );
        }
    }

    Ok(())
}
