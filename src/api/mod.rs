//! HTTP API Module
//!
//! Exposes the driver over the host's plugin protocol.

mod http;

pub use http::{HttpServer, PluginJson, PLUGIN_CONTENT_TYPE};
