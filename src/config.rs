//! wgdriver Configuration
//!
//! TOML configuration for the plugin daemon. Every section is optional;
//! an empty file yields a working local setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main wgdriver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Plugin HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Network state storage configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Tunnel interface configuration
    #[serde(default)]
    pub interfaces: InterfaceConfig,

    /// Driver behaviour
    #[serde(default)]
    pub driver: DriverOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plugin HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the plugin API binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Docker plugin spec file to write on start (e.g. /etc/docker/plugins/wg.spec)
    #[serde(default)]
    pub spec_file: Option<PathBuf>,
}

/// Network state storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path of the network database
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

/// Tunnel interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Prefix for created interface names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Prefix the host uses when renaming the interface inside the container
    #[serde(default = "default_dst_prefix")]
    pub dst_prefix: String,

    /// PersistentKeepalive pushed to every tunnel, in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u16,

    /// Path or name of the `ip` binary
    #[serde(default = "default_ip_command")]
    pub ip_command: String,

    /// Path or name of the `wg` binary
    #[serde(default = "default_wg_command")]
    pub wg_command: String,

    /// Timeout for each external command in seconds (0 = wait forever)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Driver behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverOptions {
    /// Clear stale interface bindings on start
    #[serde(default = "default_true")]
    pub reconcile_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1:9753".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/wgdriver/networks.db")
}

// Same names as earlier releases of the plugin, so hosts upgrading in place keep them
fn default_name_prefix() -> String {
    "bst".to_string()
}

fn default_dst_prefix() -> String {
    "wg".to_string()
}

fn default_keepalive_secs() -> u16 {
    25
}

fn default_ip_command() -> String {
    "ip".to_string()
}

fn default_wg_command() -> String {
    "wg".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            spec_file: None,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            dst_prefix: default_dst_prefix(),
            keepalive_secs: default_keepalive_secs(),
            ip_command: default_ip_command(),
            wg_command: default_wg_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            reconcile_on_start: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl InterfaceConfig {
    /// Per-command timeout, `None` when disabled
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(crate::Error::Config(format!(
                "server.bind_address is not a socket address: {}",
                self.server.bind_address
            )));
        }

        // Leave room for at least one character of the endpoint ID
        if self.interfaces.name_prefix.is_empty()
            || self.interfaces.name_prefix.len() > crate::interface::IFNAME_MAX - 2
        {
            return Err(crate::Error::Config(format!(
                "interfaces.name_prefix must be 1-{} bytes",
                crate::interface::IFNAME_MAX - 2
            )));
        }

        if self.interfaces.dst_prefix.is_empty() {
            return Err(crate::Error::Config("interfaces.dst_prefix cannot be empty".into()));
        }

        if self.state.path.as_os_str().is_empty() {
            return Err(crate::Error::Config("state.path cannot be empty".into()));
        }

        Ok(())
    }

    /// Contents of the Docker plugin spec file
    pub fn plugin_spec(&self) -> String {
        format!("tcp://{}\n", self.server.bind_address)
    }
}
