//! Plugin factory registry.
//!
//! Maps a manifest `kind` to a constructor, so discovery never loads code
//! dynamically: every plugin the process can run is compiled in.

use crate::core::{Error, Result};
use crate::plugin::builtin::EchoPlugin;
use crate::plugin::interface::Plugin;
use crate::plugin::manifest::PluginManifest;
use std::collections::HashMap;
use std::sync::Arc;

type Constructor = Arc<dyn Fn(&PluginManifest) -> Result<Arc<dyn Plugin>> + Send + Sync>;

/// Plugin constructors keyed by kind.
#[derive(Clone, Default)]
pub struct PluginFactory {
    constructors: HashMap<String, Constructor>,
}

impl PluginFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the built-in plugins.
    pub fn with_builtins() -> Self {
        Self::new().with("echo", |_| Ok(Arc::new(EchoPlugin::new()) as Arc<dyn Plugin>))
    }

    /// Register a constructor for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.to_string(), Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, kind: &str, constructor: F) -> Self
    where
        F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Construct the plugin a manifest describes.
    pub fn create(&self, manifest: &PluginManifest) -> Result<Arc<dyn Plugin>> {
        let constructor = self
            .constructors
            .get(manifest.kind())
            .ok_or_else(|| Error::UnknownPluginKind(manifest.kind().to_string()))?;
        constructor(manifest)
    }

    /// Whether a constructor exists for `kind`.
    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_echo() {
        let factory = PluginFactory::with_builtins();
        assert!(factory.supports("echo"));

        let manifest = PluginManifest::new("echo", "0.1.0", &["echo"]);
        let plugin = factory.create(&manifest).unwrap();
        assert_eq!(plugin.name(), "echo");
    }

    #[test]
    fn test_kind_overrides_name() {
        let factory = PluginFactory::new().with("echo", |_| Ok(Arc::new(EchoPlugin::new()) as Arc<dyn Plugin>));
        let manifest = PluginManifest::new("greeter", "0.1.0", &["echo"]).with_kind("echo");
        assert!(factory.create(&manifest).is_ok());
    }

    #[test]
    fn test_unknown_kind() {
        let factory = PluginFactory::new();
        let manifest = PluginManifest::new("crm", "0.1.0", &["crm"]);
        let result = factory.create(&manifest);
        assert!(matches!(result, Err(Error::UnknownPluginKind(kind)) if kind == "crm"));
        assert!(factory.kinds().is_empty());
    }
}
