//! Built-in plugins.

use crate::bus::{DispatchValue, Event};
use crate::core::{now, Timestamp};
use crate::plugin::interface::{HandleError, InitError, Plugin, PluginContext};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

/// Echo plugin for verifying the plugin wiring end to end.
///
/// Topics: `echo` returns the payload, `ping` returns a pong, `info`
/// returns the plugin's own metadata.
pub struct EchoPlugin {
    initialized_at: Mutex<Option<Timestamp>>,
}

impl EchoPlugin {
    /// Create a new echo plugin.
    pub fn new() -> Self {
        Self {
            initialized_at: Mutex::new(None),
        }
    }

    fn initialized_at(&self) -> Option<Timestamp> {
        *self.initialized_at.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "Returns its input unchanged"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string(), "ping".to_string(), "info".to_string()]
    }

    async fn initialize(&self, _ctx: PluginContext) -> Result<(), InitError> {
        *self.initialized_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(now());
        Ok(())
    }

    async fn handle(&self, event: &Event) -> Result<DispatchValue, HandleError> {
        match event.topic.as_str() {
            "echo" => Ok(json!({ "echo": event.payload })),
            "ping" => Ok(json!({ "pong": true, "timestamp": now() })),
            "info" => Ok(json!({
                "name": self.name(),
                "version": self.version(),
                "initialized_at": self.initialized_at(),
                "capabilities": self.capabilities(),
            })),
            other => Err(HandleError::permanent(format!("unknown topic: {}", other))),
        }
    }

    async fn shutdown(&self) {
        *self.initialized_at.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}
