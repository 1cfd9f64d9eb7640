//! Driver Protocol Handlers
//!
//! One method per host operation. Handlers read a snapshot from the store,
//! drive the interface manager and write the result back, undoing the
//! interface when Join cannot record it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::driver::locks::EndpointLocks;
use crate::driver::protocol::*;
use crate::error::{Error, Result};
use crate::interface::Interfaces;
use crate::keys;
use crate::state::{Endpoint, Network, NetworkStore};

/// The network driver
pub struct Driver {
    store: Arc<NetworkStore>,
    interfaces: Interfaces,
    locks: EndpointLocks,
    dst_prefix: String,
}

impl Driver {
    pub fn new(store: Arc<NetworkStore>, interfaces: Interfaces, dst_prefix: String) -> Self {
        Self {
            store,
            interfaces,
            locks: EndpointLocks::new(),
            dst_prefix,
        }
    }

    /// The underlying state store
    pub fn store(&self) -> &Arc<NetworkStore> {
        &self.store
    }

    pub fn activate(&self) -> ActivateResponse {
        ActivateResponse {
            implements: vec!["NetworkDriver".to_string()],
        }
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: "local".to_string(),
            connectivity_scope: "local".to_string(),
        }
    }

    pub async fn create_network(&self, req: CreateNetworkRequest) -> Result<EmptyResponse> {
        let opts = NetworkOptions::from_options(&req.options)?;
        let network = Network::new(
            req.network_id.clone(),
            opts.peer,
            opts.peer_key,
            opts.seed,
            opts.additional,
        );
        self.store.create_network(network).await?;
        info!("Created network {}", req.network_id);
        Ok(EmptyResponse::default())
    }

    pub async fn delete_network(&self, req: DeleteNetworkRequest) -> Result<EmptyResponse> {
        let network = self.store.delete_network(&req.network_id).await?;
        info!(
            "Deleted network {} ({} endpoint(s) removed)",
            req.network_id,
            network.endpoints.len()
        );
        Ok(EmptyResponse::default())
    }

    pub async fn create_endpoint(&self, req: CreateEndpointRequest) -> Result<CreateEndpointResponse> {
        let address = req
            .interface
            .as_ref()
            .map(|iface| iface.address.trim().to_string())
            .unwrap_or_default();
        keys::parse_ipv4(&address)?;

        let endpoint = Endpoint::new(req.endpoint_id.clone(), address);
        self.store.create_endpoint(&req.network_id, endpoint).await?;
        info!("Created endpoint {} in network {}", req.endpoint_id, req.network_id);
        Ok(CreateEndpointResponse::default())
    }

    pub fn endpoint_info(&self, _req: EndpointRequest) -> EndpointInfoResponse {
        EndpointInfoResponse::default()
    }

    pub async fn delete_endpoint(&self, req: EndpointRequest) -> Result<EmptyResponse> {
        let _section = self.locks.acquire(&req.network_id, &req.endpoint_id).await;
        self.store.delete_endpoint(&req.network_id, &req.endpoint_id).await?;
        info!("Deleted endpoint {} from network {}", req.endpoint_id, req.network_id);
        Ok(EmptyResponse::default())
    }

    /// Attach an endpoint to a freshly created tunnel interface
    pub async fn join(&self, req: JoinRequest) -> Result<JoinResponse> {
        let _section = self.locks.acquire(&req.network_id, &req.endpoint_id).await;

        let (network, endpoint) = self
            .store
            .lookup(&req.network_id, &req.endpoint_id)
            .await
            .ok_or_else(|| Error::EndpointLookup {
                network_id: req.network_id.clone(),
                endpoint_id: req.endpoint_id.clone(),
            })?;

        if endpoint.is_joined() {
            return Err(Error::AlreadyJoined(req.endpoint_id));
        }

        let interface = match self.interfaces.install(&network, &endpoint).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Join of endpoint {} failed: {}", req.endpoint_id, e);
                if let Some(leftover) = e.leftover() {
                    self.interfaces.uninstall(leftover).await;
                }
                return Err(Error::InterfaceCreate(e.to_string()));
            }
        };

        if let Err(e) = self
            .store
            .bind_interface(&req.network_id, &req.endpoint_id, &interface)
            .await
        {
            warn!(
                "Could not record {} for endpoint {}, removing it: {}",
                interface, req.endpoint_id, e
            );
            self.interfaces.uninstall(&interface).await;
            return Err(e);
        }

        info!("Endpoint {} joined via {}", req.endpoint_id, interface);
        Ok(JoinResponse::new(interface, &self.dst_prefix))
    }

    /// Detach an endpoint
    ///
    /// The interface itself is left alone: the host moves it back out of the
    /// container only after this call returns.
    pub async fn leave(&self, req: EndpointRequest) -> Result<EmptyResponse> {
        let _section = self.locks.acquire(&req.network_id, &req.endpoint_id).await;

        let (_, endpoint) = self
            .store
            .lookup(&req.network_id, &req.endpoint_id)
            .await
            .ok_or_else(|| Error::EndpointLookup {
                network_id: req.network_id.clone(),
                endpoint_id: req.endpoint_id.clone(),
            })?;

        if !endpoint.is_joined() {
            return Err(Error::NotJoined(req.endpoint_id));
        }

        let interface = self
            .store
            .release_interface(&req.network_id, &req.endpoint_id)
            .await?;
        info!("Endpoint {} left {}", req.endpoint_id, interface);
        Ok(EmptyResponse::default())
    }

    pub fn discover(&self) -> EmptyResponse {
        EmptyResponse::default()
    }

    /// Clear bindings whose interface no longer exists on the host
    pub async fn reconcile(&self) -> Result<usize> {
        let mut repaired = 0;

        for joined in self.store.joined_endpoints().await {
            let _section = self.locks.acquire(&joined.network_id, &joined.endpoint_id).await;

            match self.interfaces.exists(&joined.interface).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("Cannot check interface {}: {}", joined.interface, e);
                    continue;
                }
            }

            let cleared = self
                .store
                .write(|networks| {
                    let endpoint = networks
                        .get_mut(&joined.network_id)
                        .and_then(|n| n.endpoints.get_mut(&joined.endpoint_id));
                    match endpoint {
                        Some(ep) if ep.joined_interface.as_deref() == Some(joined.interface.as_str()) => {
                            ep.joined_interface = None;
                            Ok(true)
                        }
                        _ => Ok(false),
                    }
                })
                .await?;

            if cleared {
                warn!(
                    "Interface {} of endpoint {} is gone, marked endpoint unjoined",
                    joined.interface, joined.endpoint_id
                );
                repaired += 1;
            }
        }

        debug!("Reconcile repaired {} endpoint(s)", repaired);
        Ok(repaired)
    }
}
