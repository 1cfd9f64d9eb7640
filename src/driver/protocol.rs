//! Remote network driver protocol messages
//!
//! Field names follow the host's JSON conventions (PascalCase, `NetworkID`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interface::CATCH_ALL_ROUTE;
use crate::keys;

/// Option map key carrying user supplied `-o key=value` pairs
pub const GENERIC_OPTIONS: &str = "com.docker.network.generic";
/// Remote peer address (host:port)
pub const OPT_PEER: &str = "io.bestov.wg.peer";
/// Remote peer public key (base64)
pub const OPT_PEER_KEY: &str = "io.bestov.wg.peerkey";
/// Network secret seed (base64)
pub const OPT_SEED: &str = "io.bestov.wg.seed";
/// Optional extra derivation salt (base64)
pub const OPT_ADDITIONAL: &str = "io.bestov.wg.additional";

/// Route type for a directly connected destination
pub const ROUTE_CONNECTED: u8 = 1;

// ============ Requests ============

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterface {
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "AddressIPv6")]
    pub address_ipv6: String,
    #[serde(default)]
    pub mac_address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub interface: Option<EndpointInterface>,
}

/// Request naming one endpoint (DeleteEndpoint, EndpointOperInfo, Leave)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(default)]
    pub sandbox_key: String,
}

// ============ Responses ============

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmptyResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub scope: String,
    pub connectivity_scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    pub interface: EmptyResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInfoResponse {
    pub value: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    pub src_name: String,
    pub dst_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct StaticRoute {
    pub destination: String,
    pub route_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    pub interface_name: InterfaceName,
    pub static_routes: Vec<StaticRoute>,
    pub disable_gateway_service: bool,
}

impl JoinResponse {
    /// Bind `interface` into the container with a catch-all route through it
    pub fn new(interface: String, dst_prefix: &str) -> Self {
        Self {
            interface_name: InterfaceName {
                src_name: interface,
                dst_prefix: dst_prefix.to_string(),
            },
            static_routes: vec![StaticRoute {
                destination: CATCH_ALL_ROUTE.to_string(),
                route_type: ROUTE_CONNECTED,
            }],
            disable_gateway_service: true,
        }
    }
}

/// Error body: a single message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

// ============ Network options ============

/// Validated per-network tunnel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    pub peer: String,
    pub peer_key: String,
    pub seed: String,
    pub additional: String,
}

impl NetworkOptions {
    /// Extract and validate the generic options of a CreateNetwork request
    pub fn from_options(options: &HashMap<String, serde_json::Value>) -> Result<Self> {
        let generic = options
            .get(GENERIC_OPTIONS)
            .and_then(|v| v.as_object())
            .ok_or_else(|| Error::InvalidOption(format!("missing {}", GENERIC_OPTIONS)))?;

        let get = |key: &str| -> Option<String> {
            generic
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| Error::InvalidOption(format!("missing {}", key)));

        let peer = require(OPT_PEER)?;
        validate_peer(&peer)?;

        let peer_key = require(OPT_PEER_KEY)?;
        keys::decode_key(&peer_key, OPT_PEER_KEY).map_err(|e| Error::InvalidOption(e.to_string()))?;

        let seed = require(OPT_SEED)?;
        let additional = get(OPT_ADDITIONAL).unwrap_or_else(|| keys::DEFAULT_ADDITIONAL.to_string());

        // Both feed the key derivation; prove they decode before storing them
        keys::derive_private_key(&seed, "0.0.0.0", &additional)
            .map_err(|e| Error::InvalidOption(e.to_string()))?;

        Ok(Self {
            peer,
            peer_key,
            seed,
            additional,
        })
    }
}

/// `host:port` with a numeric port; IPv6 hosts must be bracketed
fn validate_peer(peer: &str) -> Result<()> {
    let invalid = || Error::InvalidOption(format!("{} must be host:port, got {}", OPT_PEER, peer));
    let (host, port) = peer.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(invalid());
    }
    Ok(())
}
