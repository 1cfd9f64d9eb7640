//! Per-endpoint exclusive sections
//!
//! Join, Leave and DeleteEndpoint for the same endpoint run one at a time,
//! so the "not joined yet" check and the write that records the new
//! interface cannot interleave with another call on that endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lazily created async mutexes keyed by network and endpoint ID
#[derive(Default)]
pub struct EndpointLocks {
    sections: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

impl EndpointLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one endpoint
    pub async fn acquire(&self, network_id: &str, endpoint_id: &str) -> OwnedMutexGuard<()> {
        let section = {
            let mut sections = self.sections.lock().unwrap_or_else(|e| e.into_inner());
            // Drop sections nobody holds or waits on
            sections.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(
                sections
                    .entry((network_id.to_string(), endpoint_id.to_string()))
                    .or_default(),
            )
        };
        section.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sections.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
