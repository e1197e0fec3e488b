//! Plugin descriptor and lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Plugin lifecycle state.
///
/// ```text
/// Discovered -> Validated -> Registered -> Active <-> Disabled -> Unloaded
///      \             \            \          \
///       +-------------+------------+----------+--> Error -> Unloaded
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Manifest found, not yet checked
    Discovered,
    /// Passed structural validation
    Validated,
    /// Accepted into the registry, no subscriptions
    Registered,
    /// Subscribed to every capability topic
    Active,
    /// Subscriptions removed, may be re-activated
    Disabled,
    /// Removed permanently
    Unloaded,
    /// Unrecoverable fault; can only be unloaded
    Error,
}

impl PluginState {
    /// Whether `self -> next` is allowed.
    ///
    /// Leaving `Error` for anything but `Unloaded` is rejected separately
    /// by the registry with `PluginInError`.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Discovered, Validated)
                | (Discovered, Error)
                | (Validated, Registered)
                | (Validated, Error)
                | (Registered, Active)
                | (Registered, Unloaded)
                | (Registered, Error)
                | (Active, Disabled)
                | (Active, Error)
                | (Disabled, Active)
                | (Disabled, Unloaded)
                | (Error, Unloaded)
        )
    }

    /// Terminal states do not block re-registration under the same name.
    pub fn is_terminal(self) -> bool {
        self == PluginState::Unloaded
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginState::Discovered => "Discovered",
            PluginState::Validated => "Validated",
            PluginState::Registered => "Registered",
            PluginState::Active => "Active",
            PluginState::Disabled => "Disabled",
            PluginState::Unloaded => "Unloaded",
            PluginState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Metadata about one installed plugin.
///
/// Immutable once registered, except for `state`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    /// Semantic version
    pub version: String,
    /// Topics the plugin can handle
    pub capabilities: BTreeSet<String>,
    /// Current lifecycle state
    pub state: PluginState,
}

impl PluginDescriptor {
    /// Create a freshly discovered descriptor.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            capabilities: BTreeSet::new(),
            state: PluginState::Discovered,
        }
    }

    /// Add a capability topic.
    pub fn with_capability(mut self, topic: &str) -> Self {
        self.capabilities.insert(topic.to_string());
        self
    }

    /// Add several capability topics.
    pub fn with_capabilities<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Whether the plugin declares `topic`.
    pub fn handles(&self, topic: &str) -> bool {
        self.capabilities.contains(topic)
    }
}
