//! Tunnel Interface Module
//!
//! Creates WireGuard interfaces for joined endpoints and pushes their
//! derived key material into the kernel.

mod lifecycle;
mod link;

pub use lifecycle::{InstallError, Interfaces, TunnelConfig, CATCH_ALL_ROUTE};
pub use link::{IpLinkControl, LinkControl};

/// Kernel interface name buffer size, including the trailing NUL
pub const IFNAME_MAX: usize = 16;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{LinkControl, TunnelConfig};
    use crate::error::{Error, Result};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum LinkCall {
        Create(String),
        Configure(String),
        Delete(String),
    }

    /// Records link operations instead of touching the host
    #[derive(Default)]
    pub struct FakeLink {
        calls: Mutex<Vec<LinkCall>>,
        present: Mutex<HashSet<String>>,
        configs: Mutex<HashMap<String, TunnelConfig>>,
        fail_create: AtomicBool,
        fail_configure: AtomicBool,
        configure_delay: Mutex<Duration>,
    }

    impl FakeLink {
        pub fn fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        pub fn fail_configure(&self, fail: bool) {
            self.fail_configure.store(fail, Ordering::SeqCst);
        }

        /// Make every configure step take `delay`
        pub fn slow_configure(&self, delay: Duration) {
            *self.configure_delay.lock().unwrap() = delay;
        }

        pub fn calls(&self) -> Vec<LinkCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn configured(&self, name: &str) -> Option<TunnelConfig> {
            self.configs.lock().unwrap().get(name).cloned()
        }

        pub fn exists_now(&self, name: &str) -> bool {
            self.present.lock().unwrap().contains(name)
        }

        /// Simulate an interface vanishing behind the driver's back
        pub fn remove_externally(&self, name: &str) {
            self.present.lock().unwrap().remove(name);
        }

        pub fn count(&self, call: &LinkCall) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
        }
    }

    #[async_trait::async_trait]
    impl LinkControl for FakeLink {
        async fn create_interface(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(LinkCall::Create(name.to_string()));
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(Error::Command("ip link add: operation not permitted".into()));
            }
            if !self.present.lock().unwrap().insert(name.to_string()) {
                return Err(Error::Command(format!("{} already exists", name)));
            }
            Ok(())
        }

        async fn configure_interface(&self, name: &str, config: &TunnelConfig) -> Result<()> {
            self.calls.lock().unwrap().push(LinkCall::Configure(name.to_string()));
            let delay = *self.configure_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_configure.load(Ordering::SeqCst) {
                return Err(Error::Command("wg setconf failed".into()));
            }
            self.configs.lock().unwrap().insert(name.to_string(), config.clone());
            Ok(())
        }

        async fn delete_interface(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(LinkCall::Delete(name.to_string()));
            self.configs.lock().unwrap().remove(name);
            if !self.present.lock().unwrap().remove(name) {
                return Err(Error::Command(format!("{} does not exist", name)));
            }
            Ok(())
        }

        async fn interface_exists(&self, name: &str) -> Result<bool> {
            Ok(self.exists_now(name))
        }
    }
}
