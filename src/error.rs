//! wgdriver Error Types
//!
//! Every error is rendered as a single message string at the plugin
//! boundary. [`Error::kind`] keeps the categories apart for callers that
//! need more than string matching.

use thiserror::Error;

/// Result type alias for wgdriver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced network or endpoint does not exist
    NotFound,
    /// Operation is invalid for the current lifecycle state
    Conflict,
    /// An external interface command failed
    ExternalTool,
    /// The durable write itself failed
    Persistence,
    /// The request carried bad or missing values
    InvalidRequest,
    /// Anything else
    Internal,
}

/// wgdriver error types
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("unknown network")]
    UnknownNetwork(String),

    #[error("unknown endpoint")]
    UnknownEndpoint(String),

    #[error("failed to get endpoint")]
    EndpointLookup { network_id: String, endpoint_id: String },

    // Lifecycle conflicts
    #[error("network already exists")]
    NetworkExists(String),

    #[error("network has joined endpoints")]
    NetworkInUse(String),

    #[error("endpoint already exists")]
    EndpointExists(String),

    #[error("endpoint already joined")]
    AlreadyJoined(String),

    #[error("endpoint not joined")]
    NotJoined(String),

    #[error("endpoint still joined")]
    EndpointInUse(String),

    // Interface errors
    #[error("failed to create interface")]
    InterfaceCreate(String),

    #[error("Command failed: {0}")]
    Command(String),

    // Persistence errors
    #[error("failed to serialize")]
    Persistence(String),

    // Request errors
    #[error("invalid network option: {0}")]
    InvalidOption(String),

    #[error("invalid endpoint address")]
    InvalidAddress(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownNetwork(_) | Error::UnknownEndpoint(_) | Error::EndpointLookup { .. } => {
                ErrorKind::NotFound
            }
            Error::NetworkExists(_)
            | Error::NetworkInUse(_)
            | Error::EndpointExists(_)
            | Error::AlreadyJoined(_)
            | Error::NotJoined(_)
            | Error::EndpointInUse(_) => ErrorKind::Conflict,
            Error::InterfaceCreate(_) | Error::Command(_) => ErrorKind::ExternalTool,
            Error::Persistence(_) => ErrorKind::Persistence,
            Error::InvalidOption(_)
            | Error::InvalidAddress(_)
            | Error::InvalidKey(_)
            | Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Config(_) | Error::ConfigParse(_) | Error::Io(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the host may reasonably retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ExternalTool | ErrorKind::Persistence)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Persistence(format!("SQLite error: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(format!("record encoding error: {}", e))
    }
}
