//! Structural validation of plugins before registration.

use crate::core::{Error, Result};
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::interface::Plugin;
use crate::plugin::manifest::PluginManifest;
use std::collections::HashSet;

/// Topic namespace reserved for runtime notices.
pub const RESERVED_TOPIC_PREFIX: &str = "plugin.";

/// Check a manifest record before anything is constructed from it.
pub fn validate_manifest(manifest: &PluginManifest) -> Result<()> {
    let mut seen = HashSet::new();
    for topic in &manifest.capabilities {
        if !seen.insert(topic.as_str()) {
            return Err(Error::invalid_plugin(
                &manifest.name,
                format!("capability '{}' declared twice", topic),
            ));
        }
    }
    validate_descriptor(&manifest.descriptor())
}

/// Check name, version and capability topics.
pub fn validate_descriptor(descriptor: &PluginDescriptor) -> Result<()> {
    let name = &descriptor.name;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(Error::invalid_plugin(
            name,
            "name must be non-empty and use only [a-z0-9_-]",
        ));
    }

    if !is_semver(&descriptor.version) {
        return Err(Error::invalid_plugin(
            name,
            format!("version '{}' is not MAJOR.MINOR.PATCH", descriptor.version),
        ));
    }

    if descriptor.capabilities.is_empty() {
        return Err(Error::invalid_plugin(name, "no capabilities declared"));
    }

    for topic in &descriptor.capabilities {
        if topic.is_empty() || topic.chars().any(char::is_whitespace) {
            return Err(Error::invalid_plugin(
                name,
                format!("invalid capability topic {:?}", topic),
            ));
        }
        if topic.starts_with(RESERVED_TOPIC_PREFIX) {
            return Err(Error::invalid_plugin(
                name,
                format!("capability '{}' is in the reserved namespace", topic),
            ));
        }
    }

    Ok(())
}

/// Check that a constructed plugin honours its descriptor.
pub fn validate_plugin(descriptor: &PluginDescriptor, plugin: &dyn Plugin) -> Result<()> {
    validate_descriptor(descriptor)?;

    if plugin.name() != descriptor.name {
        return Err(Error::invalid_plugin(
            &descriptor.name,
            format!("plugin reports name '{}'", plugin.name()),
        ));
    }

    let offered: HashSet<String> = plugin.capabilities().into_iter().collect();
    if let Some(missing) = descriptor.capabilities.iter().find(|t| !offered.contains(*t)) {
        return Err(Error::invalid_plugin(
            &descriptor.name,
            format!("plugin does not handle declared capability '{}'", missing),
        ));
    }

    Ok(())
}

fn is_semver(version: &str) -> bool {
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
