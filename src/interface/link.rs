//! Privileged link operations
//!
//! [`LinkControl`] is the narrow capability the driver needs from the host
//! networking stack. [`IpLinkControl`] implements it with the `ip` and `wg`
//! tools, judging success purely by exit status.

use std::io::Write;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::InterfaceConfig;
use crate::error::{Error, Result};
use crate::interface::TunnelConfig;

/// Create, configure and delete tunnel interfaces
#[async_trait::async_trait]
pub trait LinkControl: Send + Sync {
    /// Create a WireGuard interface called `name`
    async fn create_interface(&self, name: &str) -> Result<()>;

    /// Push key and peer configuration into an existing interface
    async fn configure_interface(&self, name: &str, config: &TunnelConfig) -> Result<()>;

    /// Delete the interface called `name`
    async fn delete_interface(&self, name: &str) -> Result<()>;

    /// Whether an interface called `name` currently exists
    async fn interface_exists(&self, name: &str) -> Result<bool>;
}

/// [`LinkControl`] backed by `ip link` and `wg setconf`
pub struct IpLinkControl {
    ip_command: String,
    wg_command: String,
    timeout: Option<Duration>,
}

impl IpLinkControl {
    pub fn new(config: &InterfaceConfig) -> Self {
        Self {
            ip_command: config.ip_command.clone(),
            wg_command: config.wg_command.clone(),
            timeout: config.command_timeout(),
        }
    }

    /// Run a command to completion, honouring the configured timeout
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        debug!("Running {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        let output = command.output();

        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| {
                Error::Command(format!("{} {} timed out after {:?}", program, args.join(" "), limit))
            })?,
            None => output.await,
        };

        result.map_err(|e| Error::Command(format!("failed to execute {}: {}", program, e)))
    }

    /// Run a command and require a zero exit status
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = self.run(program, args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        );
        Err(Error::Command(format!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            output.status
        )))
    }
}

#[async_trait::async_trait]
impl LinkControl for IpLinkControl {
    async fn create_interface(&self, name: &str) -> Result<()> {
        self.run_checked(&self.ip_command, &["link", "add", "name", name, "type", "wireguard"])
            .await
    }

    async fn configure_interface(&self, name: &str, config: &TunnelConfig) -> Result<()> {
        // Created with owner-only permissions and removed on drop
        let mut file = tempfile::Builder::new().prefix("wgdriver-").suffix(".conf").tempfile()?;
        file.write_all(config.render().as_bytes())?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        self.run_checked(&self.wg_command, &["setconf", name, &path]).await
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.run_checked(&self.ip_command, &["link", "del", name]).await
    }

    async fn interface_exists(&self, name: &str) -> Result<bool> {
        let output = self.run(&self.ip_command, &["link", "show", "dev", name]).await?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control(ip: &str, wg: &str) -> IpLinkControl {
        IpLinkControl::new(&InterfaceConfig {
            ip_command: ip.to_string(),
            wg_command: wg.to_string(),
            command_timeout_secs: 5,
            ..InterfaceConfig::default()
        })
    }

    #[tokio::test]
    async fn test_exit_status_decides_success() {
        assert!(control("true", "true").create_interface("bsttest").await.is_ok());
        assert!(matches!(
            control("false", "true").create_interface("bsttest").await,
            Err(Error::Command(_))
        ));
        assert!(!control("false", "true").interface_exists("bsttest").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_command_error() {
        let result = control("/nonexistent/ip", "wg").delete_interface("bsttest").await;
        assert!(matches!(result, Err(Error::Command(_))));
    }

    #[tokio::test]
    async fn test_configure_passes_rendered_file() {
        let config = TunnelConfig {
            private_key: "cHJpdmF0ZQ==".to_string(),
            peer_public_key: "cGVlcg==".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            peer_endpoint: "203.0.113.1:51820".to_string(),
            keepalive_secs: 25,
        };
        // `true` ignores its arguments; only the temp file handling is exercised
        assert!(control("true", "true").configure_interface("bsttest", &config).await.is_ok());
        assert!(control("true", "false").configure_interface("bsttest", &config).await.is_err());
    }
}
