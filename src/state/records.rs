//! Network and endpoint records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// All networks keyed by network ID
pub type Networks = BTreeMap<String, Network>;

/// A driver-managed network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network ID assigned by the host
    pub id: String,
    /// Remote tunnel endpoint (host:port)
    pub peer_endpoint: String,
    /// Remote peer public key (base64)
    pub peer_public_key: String,
    /// Network secret (base64), never changes after creation
    pub seed: String,
    /// Extra derivation salt (base64), never changes after creation
    pub additional_salt: String,
    /// Endpoints keyed by endpoint ID
    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,
    /// When the network was created
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A container attachment point within a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint ID assigned by the host
    pub id: String,
    /// The endpoint's own IPv4 address, possibly with a prefix length
    pub address: String,
    /// Name of the active tunnel interface while joined
    #[serde(default)]
    pub joined_interface: Option<String>,
    /// When the endpoint was created
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Network {
    /// Create a network with no endpoints
    pub fn new(
        id: String,
        peer_endpoint: String,
        peer_public_key: String,
        seed: String,
        additional_salt: String,
    ) -> Self {
        Self {
            id,
            peer_endpoint,
            peer_public_key,
            seed,
            additional_salt,
            endpoints: BTreeMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Endpoints currently bound to an interface
    pub fn joined_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values().filter(|e| e.is_joined())
    }
}

impl Endpoint {
    /// Create an unjoined endpoint
    pub fn new(id: String, address: String) -> Self {
        Self {
            id,
            address,
            joined_interface: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Whether a tunnel interface is bound to this endpoint
    pub fn is_joined(&self) -> bool {
        self.joined_interface.as_deref().is_some_and(|name| !name.is_empty())
    }
}
