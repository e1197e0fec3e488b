//! Plugin lifecycle manager.
//!
//! Drives plugins through the registry's state machine and keeps the bus
//! subscription table in step with it: a plugin holds subscriptions only
//! while it is `Active`.
//!
//! Every operation runs its registry and subscription changes under one
//! async lock, so two operations on the same plugin never interleave.
//! Plugin code (`initialize`, `shutdown`) and lifecycle notices run after
//! the lock is released.

use crate::bus::{Event, EventBus};
use crate::core::{Error, Result};
use crate::plugin::descriptor::{PluginDescriptor, PluginState};
use crate::plugin::factory::PluginFactory;
use crate::plugin::interface::{Plugin, PluginContext};
use crate::plugin::manifest::{scan_dir, PluginManifest};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::validation::{validate_manifest, validate_plugin};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Outcome of scanning a plugin directory.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Plugins that reached `Active`, in discovery order
    pub activated: Vec<String>,
    /// Manifests or plugins that were skipped, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Lifecycle notice queued while the operation lock is held.
struct Notice {
    topic: &'static str,
    name: String,
    version: String,
}

/// Lifecycle manager.
pub struct LifecycleManager {
    registry: Arc<PluginRegistry>,
    bus: EventBus,
    factory: PluginFactory,
    settings: HashMap<String, serde_json::Value>,
    instances: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    ops: tokio::sync::Mutex<()>,
}

impl LifecycleManager {
    /// Create a manager working against the bus's registry.
    pub fn new(bus: EventBus, factory: PluginFactory) -> Self {
        Self {
            registry: bus.registry().clone(),
            bus,
            factory,
            settings: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// Per-plugin configuration merged over manifest config at `initialize`.
    pub fn with_settings(mut self, settings: HashMap<String, serde_json::Value>) -> Self {
        self.settings = settings;
        self
    }

    /// The registry this manager drives.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Plugin>>> {
        self.instances.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn instance(&self, name: &str) -> Result<Arc<dyn Plugin>> {
        self.instances()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    /// Load every manifest under `dir` and activate what passes validation.
    ///
    /// Each plugin is handled independently; one failure never stops the
    /// rest of the scan.
    pub async fn discover(&self, dir: &Path) -> Result<DiscoveryReport> {
        let scan = scan_dir(dir)?;
        let mut report = DiscoveryReport::default();

        for (path, err) in scan.failures {
            report.failed.push((path, err.to_string()));
        }

        for (path, manifest) in scan.manifests {
            match self.load(&manifest).await {
                Ok(()) => report.activated.push(manifest.name.clone()),
                Err(err) => {
                    warn!(path = %path.display(), plugin = %manifest.name, error = %err, "plugin not loaded");
                    report.failed.push((path, err.to_string()));
                }
            }
        }

        info!(
            dir = %dir.display(),
            activated = report.activated.len(),
            failed = report.failed.len(),
            "plugin discovery complete"
        );
        Ok(report)
    }

    /// Construct, validate, register, initialize and activate one plugin.
    ///
    /// A plugin that fails validation stays in the registry in `Error`,
    /// with the reason available from [`PluginRegistry::fault`].
    pub async fn load(&self, manifest: &PluginManifest) -> Result<()> {
        let built = validate_manifest(manifest).and_then(|()| {
            self.factory.create(manifest).map_err(|err| match err {
                Error::UnknownPluginKind(kind) => Error::invalid_plugin(
                    &manifest.name,
                    format!("no factory registered for kind '{}'", kind),
                ),
                other => other,
            })
        });
        self.install_with(manifest.descriptor(), built, &manifest.config)
            .await
    }

    /// Install an already constructed plugin, described by itself.
    pub async fn install(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let descriptor = PluginDescriptor::new(plugin.name(), plugin.version())
            .with_capabilities(plugin.capabilities());
        self.install_with(descriptor, Ok(plugin), &serde_json::Value::Null)
            .await
    }

    async fn install_with(
        &self,
        descriptor: PluginDescriptor,
        built: Result<Arc<dyn Plugin>>,
        config: &serde_json::Value,
    ) -> Result<()> {
        let name = descriptor.name.clone();

        let mut notices = Vec::new();
        let admitted = {
            let _ops = self.ops.lock().await;
            self.admit_locked(descriptor, built, &mut notices)
        };
        self.announce(notices).await;
        let plugin = admitted?;

        let mut ctx = PluginContext::new(&name, self.bus.handle()).with_config_value(config);
        if let Some(settings) = self.settings.get(&name) {
            ctx = ctx.with_config_value(settings);
        }
        let initialized = plugin.initialize(ctx).await;

        let mut notices = Vec::new();
        let result = {
            let _ops = self.ops.lock().await;
            match initialized {
                Ok(()) => {
                    self.instances().insert(name.clone(), plugin);
                    self.activate_locked(&name, &mut notices)
                }
                Err(err) => {
                    error!(plugin = %name, error = %err, "plugin initialization failed");
                    self.fail_locked(&name, &err.message, &mut notices)
                        .and(Err(Error::InitFailed {
                            name: name.clone(),
                            reason: err.message,
                        }))
                }
            }
        };
        self.announce(notices).await;
        result
    }

    /// Enter the registry as `Discovered`, then `Registered` if `built`
    /// passes validation or `Error` if it does not.
    fn admit_locked(
        &self,
        descriptor: PluginDescriptor,
        built: Result<Arc<dyn Plugin>>,
        notices: &mut Vec<Notice>,
    ) -> Result<Arc<dyn Plugin>> {
        let name = descriptor.name.clone();
        self.registry.admit(descriptor.clone())?;

        let checked = built.and_then(|plugin| {
            validate_plugin(&descriptor, plugin.as_ref())?;
            Ok(plugin)
        });
        match checked {
            Ok(plugin) => {
                self.registry.transition(&name, PluginState::Validated)?;
                self.registry.transition(&name, PluginState::Registered)?;
                Ok(plugin)
            }
            Err(err) => {
                warn!(plugin = %name, error = %err, "plugin rejected");
                self.fail_locked(&name, &err.to_string(), notices)?;
                Err(err)
            }
        }
    }

    /// Subscribe a `Registered` or `Disabled` plugin to every capability.
    pub async fn activate(&self, name: &str) -> Result<()> {
        let mut notices = Vec::new();
        let result = {
            let _ops = self.ops.lock().await;
            self.activate_locked(name, &mut notices)
        };
        self.announce(notices).await;
        result
    }

    fn activate_locked(&self, name: &str, notices: &mut Vec<Notice>) -> Result<()> {
        let descriptor = self
            .registry
            .lookup(name)
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))?;
        if descriptor.state == PluginState::Error {
            return Err(Error::PluginInError(name.to_string()));
        }
        let plugin = self.instance(name)?;

        self.registry.transition(name, PluginState::Active)?;
        for topic in &descriptor.capabilities {
            if let Err(err) = self.bus.subscribe(topic, name, plugin.clone()) {
                self.fail_locked(name, &err.to_string(), notices)?;
                return Err(err);
            }
        }

        info!(plugin = %name, topics = descriptor.capabilities.len(), "plugin activated");
        notices.push(self.notice("plugin.activated", name));
        Ok(())
    }

    /// Remove an active plugin's subscriptions, keeping it registered.
    pub async fn disable(&self, name: &str) -> Result<()> {
        let mut notices = Vec::new();
        let result = {
            let _ops = self.ops.lock().await;
            self.disable_locked(name, &mut notices)
        };
        self.announce(notices).await;
        result
    }

    fn disable_locked(&self, name: &str, notices: &mut Vec<Notice>) -> Result<()> {
        // Leave Active first so dispatchers refuse queued deliveries.
        self.registry.transition(name, PluginState::Disabled)?;
        self.bus.unsubscribe_all(name);

        info!(plugin = %name, "plugin disabled");
        notices.push(self.notice("plugin.disabled", name));
        Ok(())
    }

    /// Remove a plugin permanently and call its `shutdown`.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let mut notices = Vec::new();
        let result = {
            let _ops = self.ops.lock().await;
            self.unload_locked(name, &mut notices)
        };
        if let Ok(Some(plugin)) = &result {
            plugin.shutdown().await;
        }
        self.announce(notices).await;
        result.map(|_| ())
    }

    fn unload_locked(
        &self,
        name: &str,
        notices: &mut Vec<Notice>,
    ) -> Result<Option<Arc<dyn Plugin>>> {
        if self.registry.state(name) == Some(PluginState::Active) {
            self.disable_locked(name, notices)?;
        }

        self.registry.transition(name, PluginState::Unloaded)?;
        self.bus.unsubscribe_all(name);

        info!(plugin = %name, "plugin unloaded");
        notices.push(self.notice("plugin.unloaded", name));
        Ok(self.instances().remove(name))
    }

    /// Move a plugin to `Error` after an unrecoverable fault.
    pub async fn fail(&self, name: &str, reason: &str) -> Result<()> {
        let mut notices = Vec::new();
        let result = {
            let _ops = self.ops.lock().await;
            self.fail_locked(name, reason, &mut notices)
        };
        self.announce(notices).await;
        result
    }

    fn fail_locked(&self, name: &str, reason: &str, notices: &mut Vec<Notice>) -> Result<()> {
        self.registry.fail(name, reason)?;
        self.bus.unsubscribe_all(name);
        notices.push(self.notice("plugin.failed", name));
        Ok(())
    }

    /// Unload every plugin still loaded, in registration order.
    pub async fn shutdown_all(&self) {
        for descriptor in self.registry.list(None) {
            if descriptor.state.is_terminal() {
                continue;
            }
            if let Err(err) = self.unload(&descriptor.name).await {
                warn!(plugin = %descriptor.name, error = %err, "unload during shutdown failed");
            }
        }
    }

    /// Names of plugins with a live instance, in registration order.
    pub fn loaded(&self) -> Vec<String> {
        let descriptors = self.registry.list(None);
        let instances = self.instances();
        descriptors
            .into_iter()
            .filter(|d| instances.contains_key(&d.name))
            .map(|d| d.name)
            .collect()
    }

    fn notice(&self, topic: &'static str, name: &str) -> Notice {
        Notice {
            topic,
            name: name.to_string(),
            version: self
                .registry
                .lookup(name)
                .map(|d| d.version)
                .unwrap_or_default(),
        }
    }

    async fn announce(&self, notices: Vec<Notice>) {
        for notice in notices {
            let event = Event::new(
                notice.topic,
                json!({ "name": notice.name, "version": notice.version }),
            );
            if let Err(err) = self.bus.publish(event).await {
                debug!(topic = %notice.topic, plugin = %notice.name, error = %err, "lifecycle notice not published");
            }
        }
    }
}
