//! Plugin Module
//!
//! Provides the plugin side of the runtime:
//! - Plugin contract and descriptor state machine
//! - Plugin registry
//! - Manifest discovery and the factory registry
//! - Lifecycle management

pub mod builtin;
pub mod descriptor;
pub mod factory;
pub mod interface;
pub mod lifecycle;
pub mod manifest;
pub mod registry;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use builtin::EchoPlugin;
pub use descriptor::{PluginDescriptor, PluginState};
pub use factory::PluginFactory;
pub use interface::{HandleError, InitError, Plugin, PluginContext};
pub use lifecycle::{DiscoveryReport, LifecycleManager};
pub use manifest::{PluginManifest, MANIFEST_FILE};
pub use registry::PluginRegistry;
