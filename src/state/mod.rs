//! State Management Module
//!
//! Durable records of networks and their endpoints.

mod backend;
mod records;
mod store;

pub use backend::{RecordBackend, SqliteBackend};
pub use records::{Endpoint, Network, Networks};
pub use store::{JoinedEndpoint, NetworkStore};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Network, Networks, RecordBackend};
    use crate::error::{Error, Result};

    /// In-memory backend whose flushes can be made to fail
    #[derive(Clone, Default)]
    pub struct MemoryBackend {
        records: Arc<Mutex<Networks>>,
        failing: Arc<AtomicBool>,
        persist_delay: Arc<Mutex<Duration>>,
    }

    impl MemoryBackend {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Block every flush for `delay`, like a slow fsync
        pub fn slow_persist(&self, delay: Duration) {
            *self.persist_delay.lock().unwrap() = delay;
        }

        pub fn persisted(&self) -> Networks {
            self.records.lock().unwrap().clone()
        }
    }

    impl RecordBackend for MemoryBackend {
        fn load(&mut self) -> Result<Networks> {
            Ok(self.persisted())
        }

        fn persist(&mut self, upserts: &[&Network], removals: &[&str]) -> Result<()> {
            let delay = *self.persist_delay.lock().unwrap();
            std::thread::sleep(delay);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Persistence("simulated flush failure".into()));
            }
            let mut records = self.records.lock().unwrap();
            for network in upserts {
                records.insert(network.id.clone(), (*network).clone());
            }
            for id in removals {
                records.remove(*id);
            }
            Ok(())
        }
    }
}
