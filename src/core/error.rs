//! Error types for the orchestrator runtime.
//!
//! Only registry/bus misuse, overload and setup failures live here.
//! Plugin-local failures are data ([`crate::bus::DispatchResult`]), not errors.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations.
#[derive(Error, Debug)]
pub enum Error {
    // Plugin contract errors
    #[error("Invalid plugin '{name}': {reason}")]
    InvalidPlugin { name: String, reason: String },

    #[error("No factory registered for plugin kind '{0}'")]
    UnknownPluginKind(String),

    // Registry errors
    #[error("Plugin '{0}' is already registered")]
    DuplicateName(String),

    #[error("Plugin '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },

    #[error("Plugin '{0}' is in the error state; it can only be unloaded")]
    PluginInError(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin initialization failed for '{name}': {reason}")]
    InitFailed { name: String, reason: String },

    // Bus errors
    #[error("Plugin '{0}' is not active")]
    NotActive(String),

    #[error("Plugin '{plugin}' is already subscribed to '{topic}'")]
    AlreadySubscribed { topic: String, plugin: String },

    #[error("Event bus saturated ({capacity} events in flight)")]
    BusSaturated { capacity: usize },

    #[error("Event bus has been shut down")]
    BusClosed,

    #[error("Request cancelled")]
    Cancelled,

    // Setup errors
    #[error("Malformed manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a contract violation on a named plugin.
    pub fn invalid_plugin(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPlugin {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
