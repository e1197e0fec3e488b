//! Plugin interface definition.
//!
//! Defines the contract every plugin implements: `initialize`, `handle`,
//! `shutdown`. Plugins are shared across concurrent invocations, so every
//! method takes `&self`; keep mutable state behind interior mutability.

use crate::bus::{BusHandle, DispatchValue, Event};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Failure raised by `Plugin::initialize`.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct InitError {
    /// Error message
    pub message: String,
}

impl InitError {
    /// Create a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised by `Plugin::handle`.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct HandleError {
    /// Error message
    pub message: String,
    /// Whether retrying the same event may succeed
    pub retryable: bool,
}

impl HandleError {
    /// Create a retryable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Context passed to `Plugin::initialize`.
#[derive(Clone, Debug)]
pub struct PluginContext {
    /// Name the plugin is registered under
    pub plugin: String,
    /// Configuration
    pub config: HashMap<String, serde_json::Value>,
    /// Handle for publishing follow-up events
    pub bus: BusHandle,
}

impl PluginContext {
    /// Create a new context.
    pub fn new(plugin: &str, bus: BusHandle) -> Self {
        Self {
            plugin: plugin.to_string(),
            config: HashMap::new(),
            bus,
        }
    }

    /// Use the fields of a JSON object as configuration.
    ///
    /// Non-object values are ignored.
    pub fn with_config_value(mut self, value: &serde_json::Value) -> Self {
        if let Some(map) = value.as_object() {
            for (key, value) in map {
                self.config.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Get config value.
    pub fn get_config<T: for<'de> serde::Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.config.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set config value.
    pub fn set_config(&mut self, key: &str, value: serde_json::Value) {
        self.config.insert(key.to_string(), value);
    }
}

/// Plugin trait that all plugins must implement.
///
/// A plugin may call out to slow or unreliable services inside `handle`;
/// the bus bounds every invocation by the event deadline and contains
/// errors and panics as `DispatchResult`s.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Semantic version.
    fn version(&self) -> &str;

    /// Human readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Topics this plugin can handle.
    fn capabilities(&self) -> Vec<String>;

    /// Initialize the plugin.
    async fn initialize(&self, ctx: PluginContext) -> Result<(), InitError>;

    /// Handle one event.
    async fn handle(&self, event: &Event) -> Result<DispatchValue, HandleError>;

    /// Release resources. Called once before the plugin is unloaded.
    async fn shutdown(&self);
}
