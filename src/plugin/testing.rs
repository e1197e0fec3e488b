//! Test plugins and helpers shared by unit tests across the crate.

use crate::bus::{DispatchValue, Event, EventBus};
use crate::plugin::descriptor::{PluginDescriptor, PluginState};
use crate::plugin::interface::{HandleError, InitError, Plugin, PluginContext};
use crate::plugin::registry::PluginRegistry;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn topics(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

/// Register `plugin` in `registry` and mark it active.
pub fn activate_in(registry: &PluginRegistry, plugin: &dyn Plugin) {
    let mut descriptor = PluginDescriptor::new(plugin.name(), plugin.version())
        .with_capabilities(plugin.capabilities());
    descriptor.state = PluginState::Validated;

    registry.register(descriptor).unwrap();
    registry.transition(plugin.name(), PluginState::Active).unwrap();
}

/// Register `plugin`, mark it active and subscribe it to every capability.
pub fn activate(bus: &EventBus, plugin: Arc<dyn Plugin>) {
    activate_in(bus.registry(), plugin.as_ref());
    for topic in plugin.capabilities() {
        bus.subscribe(&topic, plugin.name(), plugin.clone()).unwrap();
    }
}

/// Sleeps for a fixed delay, then returns `{"slept_ms": ..}`.
pub struct SlowPlugin {
    name: String,
    topics: Vec<String>,
    delay: Duration,
    only_flagged: bool,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowPlugin {
    pub fn new(name: &str, topic_list: &[&str], delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            topics: topics(topic_list),
            delay,
            only_flagged: false,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Sleeps only for events whose payload carries `"slow": true`.
    pub fn when_flagged(name: &str, topic_list: &[&str], delay: Duration) -> Self {
        Self {
            only_flagged: true,
            ..Self::new(name, topic_list, delay)
        }
    }

    /// Handler invocations started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Handler invocations that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for SlowPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn initialize(&self, _ctx: PluginContext) -> Result<(), InitError> {
        Ok(())
    }

    async fn handle(&self, event: &Event) -> Result<DispatchValue, HandleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = if self.only_flagged && event.payload["slow"] != json!(true) {
            Duration::ZERO
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "slept_ms": delay.as_millis() as u64 }))
    }

    async fn shutdown(&self) {}
}

/// Fails every event; optionally fails `initialize` too.
pub struct FailingPlugin {
    name: String,
    topics: Vec<String>,
    fail_init: bool,
}

impl FailingPlugin {
    pub fn new(name: &str, topic_list: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            topics: topics(topic_list),
            fail_init: false,
        }
    }

    pub fn failing_init(name: &str, topic_list: &[&str]) -> Self {
        Self {
            fail_init: true,
            ..Self::new(name, topic_list)
        }
    }
}

#[async_trait]
impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn initialize(&self, _ctx: PluginContext) -> Result<(), InitError> {
        if self.fail_init {
            return Err(InitError::new("backend unreachable"));
        }
        Ok(())
    }

    async fn handle(&self, _event: &Event) -> Result<DispatchValue, HandleError> {
        Err(HandleError::new("upstream returned 503"))
    }

    async fn shutdown(&self) {}
}

/// Panics inside `handle`.
pub struct PanickingPlugin {
    name: String,
    topics: Vec<String>,
}

impl PanickingPlugin {
    pub fn new(name: &str, topic_list: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            topics: topics(topic_list),
        }
    }
}

#[async_trait]
impl Plugin for PanickingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn initialize(&self, _ctx: PluginContext) -> Result<(), InitError> {
        Ok(())
    }

    async fn handle(&self, _event: &Event) -> Result<DispatchValue, HandleError> {
        panic!("plugin bug");
    }

    async fn shutdown(&self) {}
}

/// Records every event it sees and echoes back its own name.
pub struct RecordingPlugin {
    name: String,
    topics: Vec<String>,
    seen: Mutex<Vec<Event>>,
    context: Mutex<Option<PluginContext>>,
    shut_down: AtomicBool,
}

impl RecordingPlugin {
    pub fn new(name: &str, topic_list: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            topics: topics(topic_list),
            seen: Mutex::new(Vec::new()),
            context: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Events handled so far, in handling order.
    pub fn seen(&self) -> Vec<Event> {
        self.seen.lock().unwrap().clone()
    }

    /// Context received by `initialize`.
    pub fn context(&self) -> Option<PluginContext> {
        self.context.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn initialize(&self, ctx: PluginContext) -> Result<(), InitError> {
        *self.context.lock().unwrap() = Some(ctx);
        Ok(())
    }

    async fn handle(&self, event: &Event) -> Result<DispatchValue, HandleError> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(json!({ "handled_by": self.name }))
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
