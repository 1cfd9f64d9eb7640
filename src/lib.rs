//! wgdriver - WireGuard Network Driver for Docker
//!
//! A remote network driver plugin that attaches each container endpoint to
//! its own WireGuard tunnel towards a fixed remote peer.
//!
//! # Architecture
//!
//! The host calls the plugin over a JSON protocol. Each call reads the
//! durable network state, drives the `ip`/`wg` tools to create or configure
//! a tunnel interface, and writes the outcome back before responding.
//!
//! # Features
//!
//! - Per-endpoint private keys derived from a network seed and the
//!   endpoint's address, so no key material is stored per endpoint
//! - SQLite-backed network state, flushed on every change
//! - Fair reader/writer locking with per-endpoint exclusive sections
//! - Join rollback when the new binding cannot be recorded
//! - Startup reconciliation of stale interface bindings

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod interface;
pub mod keys;
pub mod state;

pub use config::DriverConfig;
pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DriverConfig;
    pub use crate::driver::Driver;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::interface::{Interfaces, IpLinkControl, LinkControl};
    pub use crate::state::{Endpoint, Network, NetworkStore};
}
