//! Runtime bootstrap.
//!
//! Wires configuration into the registry, bus, lifecycle manager and
//! orchestrator, and runs plugin discovery at start.

use crate::bus::EventBus;
use crate::config::RuntimeConfig;
use crate::core::Result;
use crate::monitoring::{MetricsSnapshot, RuntimeMetrics};
use crate::orchestrator::Orchestrator;
use crate::plugin::{DiscoveryReport, LifecycleManager, PluginFactory, PluginRegistry};
use std::sync::Arc;
use tracing::info;

/// A running orchestrator runtime.
pub struct Runtime {
    config: RuntimeConfig,
    metrics: Arc<RuntimeMetrics>,
    bus: EventBus,
    lifecycle: Arc<LifecycleManager>,
    orchestrator: Arc<Orchestrator>,
    discovery: DiscoveryReport,
}

impl Runtime {
    /// Build every component and, if enabled, discover plugins.
    ///
    /// Logging is not initialised here; call
    /// [`init_logging`](crate::monitoring::init_logging) first if wanted.
    pub async fn start(config: RuntimeConfig, factory: PluginFactory) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(RuntimeMetrics::new());
        let registry = Arc::new(PluginRegistry::new());
        let bus = EventBus::new(config.bus.clone(), registry, metrics.clone());
        let lifecycle = Arc::new(
            LifecycleManager::new(bus.clone(), factory)
                .with_settings(config.plugins.settings.clone()),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            bus.clone(),
            config.orchestrator.clone(),
            metrics.clone(),
        ));

        let discovery = if config.plugins.auto_discover {
            lifecycle.discover(&config.plugins.dir).await?
        } else {
            DiscoveryReport::default()
        };

        info!(
            plugins = discovery.activated.len(),
            skipped = discovery.failed.len(),
            capacity = config.bus.capacity,
            "runtime started"
        );

        Ok(Self {
            config,
            metrics,
            bus,
            lifecycle,
            orchestrator,
            discovery,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.lifecycle.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Report of the discovery run at start.
    pub fn discovery(&self) -> &DiscoveryReport {
        &self.discovery
    }

    /// Unload every plugin, calling `shutdown` on each.
    pub async fn shutdown(&self) {
        self.lifecycle.shutdown_all().await;
        info!("runtime stopped");
    }
}
