//! Network Driver Module
//!
//! Implements the host's remote network driver operations on top of the
//! state store and the interface manager.

mod handlers;
mod locks;
pub mod protocol;

pub use handlers::Driver;
pub use locks::EndpointLocks;
