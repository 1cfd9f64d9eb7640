//! Network State Store
//!
//! Owns every network and endpoint record. Reads run concurrently under a
//! shared lock; writes take the lock exclusively, flush the changed
//! records to the backend and only then publish them in memory. The lock
//! is tokio's fair RwLock: waiters queue in FIFO order, so a stream of
//! readers cannot starve a writer.

use std::path::Path;
use std::sync::Mutex;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::state::backend::{RecordBackend, SqliteBackend};
use crate::state::records::{Endpoint, Network, Networks};

/// Endpoint currently bound to an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedEndpoint {
    pub network_id: String,
    pub endpoint_id: String,
    pub interface: String,
}

/// Durable, concurrently accessible network records
pub struct NetworkStore {
    networks: RwLock<Networks>,
    /// Only touched while `networks` is held for writing
    backend: Mutex<Box<dyn RecordBackend>>,
}

impl NetworkStore {
    /// Open the SQLite-backed store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let store = Self::with_backend(Box::new(SqliteBackend::open(path)?))?;
        tracing::info!("Network state opened at {:?}", path);
        Ok(store)
    }

    /// Build a store over any backend, loading its current records
    pub fn with_backend(mut backend: Box<dyn RecordBackend>) -> Result<Self> {
        let networks = backend.load()?;
        tracing::debug!("Loaded {} network(s)", networks.len());
        Ok(Self {
            networks: RwLock::new(networks),
            backend: Mutex::new(backend),
        })
    }

    /// Run a read-only lookup under shared access
    pub async fn read<R>(&self, f: impl FnOnce(&Networks) -> R) -> R {
        let networks = self.networks.read().await;
        f(&networks)
    }

    /// Run a mutation under exclusive access and flush it before returning
    ///
    /// The closure works on a copy. If it fails, or the flush fails, the
    /// stored and in-memory records are left exactly as they were.
    pub async fn write<R>(&self, f: impl FnOnce(&mut Networks) -> Result<R>) -> Result<R> {
        let mut networks = self.networks.write().await;
        let mut working = networks.clone();
        let value = f(&mut working)?;

        {
            let upserts: Vec<&Network> = working
                .iter()
                .filter(|(id, network)| networks.get(*id) != Some(*network))
                .map(|(_, network)| network)
                .collect();
            let removals: Vec<&str> = networks
                .keys()
                .filter(|id| !working.contains_key(*id))
                .map(String::as_str)
                .collect();

            if !upserts.is_empty() || !removals.is_empty() {
                self.flush_blocking(&upserts, &removals)?;
            }
        }

        *networks = working;
        Ok(value)
    }

    /// Flush off the async worker when the runtime allows it
    ///
    /// A durable commit waits on fsync; on the multi-threaded runtime the
    /// worker hands its other tasks away for the duration.
    fn flush_blocking(&self, upserts: &[&Network], removals: &[&str]) -> Result<()> {
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => {
                tokio::task::block_in_place(|| self.flush(upserts, removals))
            }
            _ => self.flush(upserts, removals),
        }
    }

    fn flush(&self, upserts: &[&Network], removals: &[&str]) -> Result<()> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| Error::Persistence("state backend lock poisoned".into()))?;

        backend.persist(upserts, removals).map_err(|e| {
            tracing::error!("Failed to persist network state: {}", e);
            match e {
                Error::Persistence(_) => e,
                other => Error::Persistence(other.to_string()),
            }
        })
    }

    // ============ Record operations ============

    /// Insert a new network; existing IDs are rejected
    pub async fn create_network(&self, network: Network) -> Result<()> {
        self.write(|networks| {
            if networks.contains_key(&network.id) {
                return Err(Error::NetworkExists(network.id.clone()));
            }
            networks.insert(network.id.clone(), network);
            Ok(())
        })
        .await
    }

    /// Remove a network together with its (unjoined) endpoints
    pub async fn delete_network(&self, network_id: &str) -> Result<Network> {
        self.write(|networks| {
            let network = networks
                .get(network_id)
                .ok_or_else(|| Error::UnknownNetwork(network_id.to_string()))?;
            if network.joined_endpoints().next().is_some() {
                return Err(Error::NetworkInUse(network_id.to_string()));
            }
            networks
                .remove(network_id)
                .ok_or_else(|| Error::UnknownNetwork(network_id.to_string()))
        })
        .await
    }

    /// Insert an unjoined endpoint under an existing network
    pub async fn create_endpoint(&self, network_id: &str, endpoint: Endpoint) -> Result<()> {
        self.write(|networks| {
            let network = networks
                .get_mut(network_id)
                .ok_or_else(|| Error::UnknownNetwork(network_id.to_string()))?;
            if network.endpoints.contains_key(&endpoint.id) {
                return Err(Error::EndpointExists(endpoint.id.clone()));
            }
            network.endpoints.insert(endpoint.id.clone(), endpoint);
            Ok(())
        })
        .await
    }

    /// Remove an endpoint that is not joined
    pub async fn delete_endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<Endpoint> {
        self.write(|networks| {
            let network = networks
                .get_mut(network_id)
                .ok_or_else(|| Error::UnknownNetwork(network_id.to_string()))?;
            let endpoint = network
                .endpoints
                .get(endpoint_id)
                .ok_or_else(|| Error::UnknownEndpoint(endpoint_id.to_string()))?;
            if endpoint.is_joined() {
                return Err(Error::EndpointInUse(endpoint_id.to_string()));
            }
            network
                .endpoints
                .remove(endpoint_id)
                .ok_or_else(|| Error::UnknownEndpoint(endpoint_id.to_string()))
        })
        .await
    }

    /// Record that `interface` now serves an unjoined endpoint
    pub async fn bind_interface(
        &self,
        network_id: &str,
        endpoint_id: &str,
        interface: &str,
    ) -> Result<()> {
        self.write(|networks| {
            let endpoint = endpoint_mut(networks, network_id, endpoint_id)?;
            if endpoint.is_joined() {
                return Err(Error::AlreadyJoined(endpoint_id.to_string()));
            }
            endpoint.joined_interface = Some(interface.to_string());
            Ok(())
        })
        .await
    }

    /// Clear the interface binding of a joined endpoint, returning the old name
    pub async fn release_interface(&self, network_id: &str, endpoint_id: &str) -> Result<String> {
        self.write(|networks| {
            let endpoint = endpoint_mut(networks, network_id, endpoint_id)?;
            match endpoint.joined_interface.take() {
                Some(name) if !name.is_empty() => Ok(name),
                _ => Err(Error::NotJoined(endpoint_id.to_string())),
            }
        })
        .await
    }

    /// Copy of a network and one of its endpoints
    pub async fn lookup(&self, network_id: &str, endpoint_id: &str) -> Option<(Network, Endpoint)> {
        self.read(|networks| {
            let network = networks.get(network_id)?;
            let endpoint = network.endpoints.get(endpoint_id)?;
            Some((network.clone(), endpoint.clone()))
        })
        .await
    }

    /// Copy of one network
    pub async fn network(&self, network_id: &str) -> Option<Network> {
        self.read(|networks| networks.get(network_id).cloned()).await
    }

    /// Copy of every network
    pub async fn snapshot(&self) -> Networks {
        self.read(|networks| networks.clone()).await
    }

    /// Every endpoint currently bound to an interface
    pub async fn joined_endpoints(&self) -> Vec<JoinedEndpoint> {
        self.read(|networks| {
            networks
                .values()
                .flat_map(|network| {
                    network.joined_endpoints().map(move |endpoint| JoinedEndpoint {
                        network_id: network.id.clone(),
                        endpoint_id: endpoint.id.clone(),
                        interface: endpoint.joined_interface.clone().unwrap_or_default(),
                    })
                })
                .collect()
        })
        .await
    }
}

fn endpoint_mut<'a>(
    networks: &'a mut Networks,
    network_id: &str,
    endpoint_id: &str,
) -> Result<&'a mut Endpoint> {
    networks
        .get_mut(network_id)
        .ok_or_else(|| Error::UnknownNetwork(network_id.to_string()))?
        .endpoints
        .get_mut(endpoint_id)
        .ok_or_else(|| Error::UnknownEndpoint(endpoint_id.to_string()))
}
