//! Plugin registry.
//!
//! The authoritative table of loaded plugins and the single source of truth
//! for "may this plugin receive events right now". All access goes through
//! one `RwLock`; no guard is ever returned to callers, so it cannot be held
//! across a handler invocation.

use crate::core::{now, Error, Result, Timestamp};
use crate::plugin::descriptor::{PluginDescriptor, PluginState};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Registered plugin entry.
#[derive(Clone, Debug)]
struct RegistryEntry {
    /// Descriptor (only `state` changes after registration)
    descriptor: PluginDescriptor,
    /// Registration order
    seq: u64,
    /// Registration time
    registered_at: Timestamp,
    /// Reason for the last move to `Error`
    fault: Option<String>,
}

#[derive(Default)]
struct RegistryTable {
    entries: HashMap<String, RegistryEntry>,
    next_seq: u64,
}

/// Plugin registry.
#[derive(Default)]
pub struct PluginRegistry {
    table: RwLock<RegistryTable>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryTable> {
        self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a newly found plugin; it enters the `Discovered` state.
    ///
    /// An `Unloaded` entry with the same name is replaced.
    pub fn admit(&self, descriptor: PluginDescriptor) -> Result<()> {
        self.insert(descriptor, PluginState::Discovered)
    }

    /// Register a validated descriptor; it enters the `Registered` state.
    ///
    /// An `Unloaded` entry with the same name is replaced.
    pub fn register(&self, descriptor: PluginDescriptor) -> Result<()> {
        if !descriptor.state.can_transition_to(PluginState::Registered) {
            return Err(Error::InvalidTransition {
                name: descriptor.name.clone(),
                from: descriptor.state.to_string(),
                to: PluginState::Registered.to_string(),
            });
        }
        self.insert(descriptor, PluginState::Registered)
    }

    fn insert(&self, mut descriptor: PluginDescriptor, state: PluginState) -> Result<()> {
        let mut table = self.write();
        if let Some(existing) = table.entries.get(&descriptor.name) {
            if !existing.descriptor.state.is_terminal() {
                return Err(Error::DuplicateName(descriptor.name));
            }
        }

        let seq = table.next_seq;
        table.next_seq += 1;

        descriptor.state = state;
        debug!(plugin = %descriptor.name, version = %descriptor.version, state = %state, "plugin entered registry");

        table.entries.insert(
            descriptor.name.clone(),
            RegistryEntry {
                descriptor,
                seq,
                registered_at: now(),
                fault: None,
            },
        );
        Ok(())
    }

    /// Look up a plugin by name.
    pub fn lookup(&self, name: &str) -> Option<PluginDescriptor> {
        self.read().entries.get(name).map(|e| e.descriptor.clone())
    }

    /// List plugins in registration order, optionally filtered by state.
    pub fn list(&self, state_filter: Option<PluginState>) -> Vec<PluginDescriptor> {
        let table = self.read();
        let mut entries: Vec<&RegistryEntry> = table
            .entries
            .values()
            .filter(|e| state_filter.map_or(true, |s| e.descriptor.state == s))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Move a plugin to `next`, returning its previous state.
    pub fn transition(&self, name: &str, next: PluginState) -> Result<PluginState> {
        let mut table = self.write();
        let entry = table
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;

        let current = entry.descriptor.state;
        if current == PluginState::Error && next != PluginState::Unloaded {
            return Err(Error::PluginInError(name.to_string()));
        }
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                name: name.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        entry.descriptor.state = next;
        debug!(plugin = %name, from = %current, to = %next, "plugin state changed");
        Ok(current)
    }

    /// Move a plugin to `Error`, recording why.
    pub fn fail(&self, name: &str, reason: &str) -> Result<PluginState> {
        let previous = self.transition(name, PluginState::Error)?;
        if let Some(entry) = self.write().entries.get_mut(name) {
            entry.fault = Some(reason.to_string());
        }
        warn!(plugin = %name, reason = %reason, "plugin moved to error state");
        Ok(previous)
    }

    /// Reason recorded by the last `fail`.
    pub fn fault(&self, name: &str) -> Option<String> {
        self.read().entries.get(name).and_then(|e| e.fault.clone())
    }

    /// Registration time.
    pub fn registered_at(&self, name: &str) -> Option<Timestamp> {
        self.read().entries.get(name).map(|e| e.registered_at)
    }

    /// Current state.
    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.read().entries.get(name).map(|e| e.descriptor.state)
    }

    /// Whether the plugin may receive events right now.
    pub fn is_active(&self, name: &str) -> bool {
        self.state(name) == Some(PluginState::Active)
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
