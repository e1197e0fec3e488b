//! Plugin manifests and directory discovery.
//!
//! Each plugin lives in its own directory holding a `plugin.json`:
//!
//! ```json
//! { "name": "crm", "version": "0.3.1", "capabilities": ["inbound_message"] }
//! ```

use crate::core::{Error, Result};
use crate::plugin::descriptor::PluginDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name looked up in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// One plugin's manifest record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name
    pub name: String,
    /// Semantic version
    pub version: String,
    /// Topics the plugin handles
    pub capabilities: Vec<String>,
    /// Factory key; defaults to `name`
    #[serde(default)]
    pub kind: Option<String>,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Configuration passed to `initialize`
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginManifest {
    /// Create a manifest.
    pub fn new(name: &str, version: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            kind: None,
            description: String::new(),
            config: serde_json::Value::Null,
        }
    }

    /// Set the factory kind.
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Factory key.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }

    /// Descriptor in the `Discovered` state.
    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(&self.name, &self.version)
            .with_capabilities(self.capabilities.iter().cloned())
    }

    /// Parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Manifests found under a plugin directory.
#[derive(Debug, Default)]
pub struct ManifestScan {
    /// Parsed manifests with the file they came from
    pub manifests: Vec<(PathBuf, PluginManifest)>,
    /// Malformed manifests
    pub failures: Vec<(PathBuf, Error)>,
}

/// Scan `dir/<plugin>/plugin.json` in sorted directory order.
///
/// Malformed manifests are reported and skipped. A missing directory yields
/// an empty scan.
pub fn scan_dir(dir: &Path) -> Result<ManifestScan> {
    let mut scan = ManifestScan::default();
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "plugin directory not found");
        return Ok(scan);
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    children.sort();

    for child in children {
        let path = child.join(MANIFEST_FILE);
        if !path.is_file() {
            continue;
        }
        match PluginManifest::load(&path) {
            Ok(manifest) => scan.manifests.push((path, manifest)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping malformed manifest");
                scan.failures.push((path, err));
            }
        }
    }

    Ok(scan)
}
