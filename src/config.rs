//! Runtime configuration.
//!
//! Loaded from a JSON file, then adjusted by `CORTEX_*` environment overrides.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Event bus settings
    pub bus: BusConfig,
    /// Orchestrator policy
    pub orchestrator: OrchestratorConfig,
    /// Plugin discovery and per-plugin settings
    pub plugins: PluginsConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `CORTEX_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CORTEX_PLUGIN_DIR") {
            self.plugins.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("CORTEX_AUTO_DISCOVER") {
            self.plugins.auto_discover = parse_override("CORTEX_AUTO_DISCOVER", &raw)?;
        }
        if let Some(raw) = lookup("CORTEX_BUS_CAPACITY") {
            self.bus.capacity = parse_override("CORTEX_BUS_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("CORTEX_DEADLINE_MS") {
            let ms: u64 = parse_override("CORTEX_DEADLINE_MS", &raw)?;
            self.bus.default_deadline_ms = ms;
            self.orchestrator.default_deadline_ms = ms;
        }
        if let Some(level) = lookup("CORTEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(Error::Config("bus.capacity must be greater than zero".into()));
        }
        if self.bus.subscriber_queue == 0 {
            return Err(Error::Config(
                "bus.subscriber_queue must be greater than zero".into(),
            ));
        }
        if self.bus.default_deadline_ms == 0 || self.orchestrator.default_deadline_ms == 0 {
            return Err(Error::Config("deadlines must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, raw)))
}

/// What `publish` does when the in-flight limit is reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Fail immediately with `BusSaturated`.
    Reject,
    /// Block up to `wait_ms`, then fail with `BusSaturated`.
    Wait { wait_ms: u64 },
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        SaturationPolicy::Wait { wait_ms: 1_000 }
    }
}

/// Event bus configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum number of published events in flight at once
    pub capacity: usize,
    /// Queue depth of each subscriber's dispatcher
    pub subscriber_queue: usize,
    /// Handler deadline used when an event carries none
    pub default_deadline_ms: u64,
    /// Number of recent events retained for inspection
    pub history_size: usize,
    /// Behaviour once `capacity` is reached
    pub saturation: SaturationPolicy,
}

impl BusConfig {
    /// Default per-handler deadline.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            subscriber_queue: 64,
            default_deadline_ms: 5_000,
            history_size: 100,
            saturation: SaturationPolicy::default(),
        }
    }
}

/// Orchestrator policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deadline stamped on events the orchestrator publishes
    pub default_deadline_ms: u64,
    /// Plugins whose failure fails the whole request
    pub required_plugins: HashSet<String>,
    /// Intent action -> topics
    pub routes: HashMap<String, Vec<String>>,
    /// Fall back to keyword matching against active capabilities
    pub keyword_fallback: bool,
}

impl OrchestratorConfig {
    /// Default deadline for published events.
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Add a route.
    pub fn with_route(mut self, action: &str, topics: &[&str]) -> Self {
        self.routes.insert(
            action.to_string(),
            topics.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    /// Mark a plugin as required.
    pub fn with_required(mut self, plugin: &str) -> Self {
        self.required_plugins.insert(plugin.to_string());
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: 5_000,
            required_plugins: HashSet::new(),
            routes: HashMap::new(),
            keyword_fallback: true,
        }
    }
}

/// Plugin discovery configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for `<plugin>/plugin.json` manifests
    pub dir: PathBuf,
    /// Run discovery at startup
    pub auto_discover: bool,
    /// Per-plugin configuration passed to `initialize`
    pub settings: HashMap<String, serde_json::Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("plugins"),
            auto_discover: true,
            settings: HashMap::new(),
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Plain text
    Text,
    /// JSON
    Json,
}

/// Logger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `cortex=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
