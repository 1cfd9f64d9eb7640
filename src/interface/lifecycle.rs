//! Interface Lifecycle Manager
//!
//! Turns a network/endpoint pair into a configured tunnel interface and
//! tears it down again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::InterfaceConfig;
use crate::error::Error;
use crate::interface::{LinkControl, IFNAME_MAX};
use crate::keys;
use crate::state::{Endpoint, Network};

/// Route pushed into every tunnel
pub const CATCH_ALL_ROUTE: &str = "0.0.0.0/0";

/// Tunnel configuration for one interface
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub private_key: String,
    pub peer_public_key: String,
    pub allowed_ips: String,
    pub peer_endpoint: String,
    pub keepalive_secs: u16,
}

impl TunnelConfig {
    /// Render in the format understood by `wg setconf`
    pub fn render(&self) -> String {
        format!(
            "[Interface]\nPrivateKey = {}\n\n[Peer]\nPublicKey = {}\nAllowedIPs = {}\nEndpoint = {}\nPersistentKeepalive = {}\n",
            self.private_key,
            self.peer_public_key,
            self.allowed_ips,
            self.peer_endpoint,
            self.keepalive_secs
        )
    }
}

// Keep the private key out of logs
impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("private_key", &"<redacted>")
            .field("peer_public_key", &self.peer_public_key)
            .field("allowed_ips", &self.allowed_ips)
            .field("peer_endpoint", &self.peer_endpoint)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish()
    }
}

/// Why an interface could not be installed
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Key material could not be derived; nothing was created
    #[error("key derivation failed: {0}")]
    Key(Error),

    /// The interface could not be created; nothing was created
    #[error("interface creation failed: {0}")]
    Create(Error),

    /// The interface exists but could not be configured
    #[error("configuring {interface} failed: {source}")]
    Configure { interface: String, source: Error },
}

impl InstallError {
    /// Interface left behind by a failed install, if any
    pub fn leftover(&self) -> Option<&str> {
        match self {
            InstallError::Configure { interface, .. } => Some(interface),
            _ => None,
        }
    }
}

/// Creates, configures and removes tunnel interfaces
pub struct Interfaces {
    link: Arc<dyn LinkControl>,
    name_prefix: String,
    keepalive_secs: u16,
}

impl Interfaces {
    pub fn new(link: Arc<dyn LinkControl>, config: &InterfaceConfig) -> Self {
        Self {
            link,
            name_prefix: config.name_prefix.clone(),
            keepalive_secs: config.keepalive_secs,
        }
    }

    /// Interface name for an endpoint: prefix + endpoint ID, cut to the kernel limit
    pub fn interface_name(&self, endpoint_id: &str) -> String {
        let mut name = self.name_prefix.clone();
        for ch in endpoint_id.chars() {
            if name.len() + ch.len_utf8() > IFNAME_MAX - 1 {
                break;
            }
            name.push(ch);
        }
        name
    }

    /// Tunnel configuration for an endpoint of `network`
    pub fn tunnel_config(&self, network: &Network, endpoint: &Endpoint) -> crate::Result<TunnelConfig> {
        let private_key =
            keys::derive_private_key(&network.seed, &endpoint.address, &network.additional_salt)?;
        Ok(TunnelConfig {
            private_key,
            peer_public_key: network.peer_public_key.clone(),
            allowed_ips: CATCH_ALL_ROUTE.to_string(),
            peer_endpoint: network.peer_endpoint.clone(),
            keepalive_secs: self.keepalive_secs,
        })
    }

    /// Create and configure the tunnel interface for `endpoint`
    ///
    /// A configuration failure leaves the created interface in place;
    /// [`InstallError::leftover`] names it so the caller can remove it.
    pub async fn install(
        &self,
        network: &Network,
        endpoint: &Endpoint,
    ) -> Result<String, InstallError> {
        let name = self.interface_name(&endpoint.id);
        let config = self.tunnel_config(network, endpoint).map_err(InstallError::Key)?;

        self.link.create_interface(&name).await.map_err(InstallError::Create)?;
        debug!("Created interface {}", name);

        if let Err(source) = self.link.configure_interface(&name, &config).await {
            return Err(InstallError::Configure {
                interface: name,
                source,
            });
        }

        if let Ok(public) = keys::public_key(&config.private_key) {
            info!(
                "Interface {} up for endpoint {} ({}), public key {}",
                name, endpoint.id, endpoint.address, public
            );
        }
        Ok(name)
    }

    /// Delete an interface; failures are logged only
    pub async fn uninstall(&self, name: &str) {
        match self.link.delete_interface(name).await {
            Ok(()) => debug!("Deleted interface {}", name),
            Err(e) => warn!("Failed to delete interface {}: {}", name, e),
        }
    }

    /// Whether the interface exists on the host
    pub async fn exists(&self, name: &str) -> crate::Result<bool> {
        self.link.interface_exists(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::{FakeLink, LinkCall};

    const SEED: &str = "c2VjcmV0IHNlZWQgZm9yIHRlc3Rpbmc=";

    fn network() -> Network {
        Network::new(
            "net-1".to_string(),
            "203.0.113.1:51820".to_string(),
            "cGVlcg==".to_string(),
            SEED.to_string(),
            keys::DEFAULT_ADDITIONAL.to_string(),
        )
    }

    fn endpoint(id: &str) -> Endpoint {
        Endpoint::new(id.to_string(), "10.0.0.2/24".to_string())
    }

    fn interfaces(link: &Arc<FakeLink>) -> Interfaces {
        Interfaces::new(link.clone(), &InterfaceConfig::default())
    }

    #[test]
    fn test_interface_name_truncated() {
        let link = Arc::new(FakeLink::default());
        let ifaces = interfaces(&link);
        assert_eq!(ifaces.interface_name("abc"), "bstabc");
        let long = ifaces.interface_name("0123456789abcdef0123456789");
        assert_eq!(long, "bst0123456789ab");
        assert_eq!(long.len(), IFNAME_MAX - 1);
    }

    #[test]
    fn test_render() {
        let config = TunnelConfig {
            private_key: "cHJpdg==".to_string(),
            peer_public_key: "cGVlcg==".to_string(),
            allowed_ips: CATCH_ALL_ROUTE.to_string(),
            peer_endpoint: "203.0.113.1:51820".to_string(),
            keepalive_secs: 25,
        };
        let text = config.render();
        assert!(text.starts_with("[Interface]\nPrivateKey = cHJpdg==\n"));
        assert!(text.contains("AllowedIPs = 0.0.0.0/0\n"));
        assert!(text.contains("PersistentKeepalive = 25\n"));
        assert!(!format!("{:?}", config).contains("cHJpdg=="));
    }

    #[tokio::test]
    async fn test_install_pushes_derived_key() {
        let link = Arc::new(FakeLink::default());
        let name = interfaces(&link).install(&network(), &endpoint("ep1")).await.unwrap();
        assert_eq!(name, "bstep1");

        let expected = keys::derive_private_key(SEED, "10.0.0.2", keys::DEFAULT_ADDITIONAL).unwrap();
        let configured = link.configured("bstep1").unwrap();
        assert_eq!(configured.private_key, expected);
        assert_eq!(configured.peer_endpoint, "203.0.113.1:51820");
        assert_eq!(configured.keepalive_secs, 25);
        assert_eq!(
            link.calls(),
            vec![LinkCall::Create("bstep1".into()), LinkCall::Configure("bstep1".into())]
        );
    }

    #[tokio::test]
    async fn test_create_failure_has_no_side_effects() {
        let link = Arc::new(FakeLink::default());
        link.fail_create(true);
        let err = interfaces(&link).install(&network(), &endpoint("ep1")).await.unwrap_err();
        assert!(matches!(err, InstallError::Create(_)));
        assert!(err.leftover().is_none());
        assert_eq!(link.calls(), vec![LinkCall::Create("bstep1".into())]);
    }

    #[tokio::test]
    async fn test_configure_failure_reports_leftover() {
        let link = Arc::new(FakeLink::default());
        link.fail_configure(true);
        let err = interfaces(&link).install(&network(), &endpoint("ep1")).await.unwrap_err();
        assert_eq!(err.leftover(), Some("bstep1"));
        assert!(link.exists_now("bstep1"));
    }

    #[tokio::test]
    async fn test_bad_address_creates_nothing() {
        let link = Arc::new(FakeLink::default());
        let mut ep = endpoint("ep1");
        ep.address = "not-an-ip".to_string();
        let err = interfaces(&link).install(&network(), &ep).await.unwrap_err();
        assert!(matches!(err, InstallError::Key(_)));
        assert!(link.calls().is_empty());
    }
}
