//! Subscriptions and their dispatchers.
//!
//! Every subscription owns one dispatcher task fed by a bounded queue.
//! The dispatcher starts handlers strictly in arrival order but never waits
//! for one to finish: each delivery gets its own supervisor task that
//! enforces the event's deadline, cancellation and fault containment.
//! A blocked handler therefore delays neither later events on the same
//! subscription nor any other subscription.

use crate::bus::event::{DispatchResult, Event};
use crate::core::{now, Error, Result, Timestamp};
use crate::monitoring::RuntimeMetrics;
use crate::plugin::{Plugin, PluginRegistry};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEACTIVATED: &str = "plugin deactivated before delivery";

/// One event handed to one subscriber.
pub(crate) struct Delivery {
    pub event: Arc<Event>,
    pub deadline: Duration,
    pub dispatched_at: Instant,
    pub cancel: CancellationToken,
    pub reply: oneshot::Sender<DispatchResult>,
}

/// Public view of a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Topic
    pub topic: String,
    /// Subscribed plugin
    pub plugin: String,
    /// Subscription time
    pub subscribed_at: Timestamp,
}

/// Binding of a topic to a plugin's handler.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub topic: String,
    pub plugin: String,
    pub subscribed_at: Timestamp,
    sender: mpsc::Sender<Delivery>,
    open: Arc<AtomicBool>,
}

impl Subscription {
    /// Create the subscription and start its dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        topic: &str,
        plugin: &str,
        handler: Arc<dyn Plugin>,
        registry: Arc<PluginRegistry>,
        metrics: Arc<RuntimeMetrics>,
        queue: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue.max(1));
        let open = Arc::new(AtomicBool::new(true));

        let dispatcher = Arc::new(Dispatcher {
            topic: topic.to_string(),
            plugin: plugin.to_string(),
            handler,
            registry,
            metrics,
            open: open.clone(),
        });
        tokio::spawn(dispatcher.run(receiver));

        Self {
            topic: topic.to_string(),
            plugin: plugin.to_string(),
            subscribed_at: now(),
            sender,
            open,
        }
    }

    /// Stop invoking the handler. Queued deliveries are answered with an error.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Queue a delivery, waiting while the queue is full.
    pub async fn deliver(&self, delivery: Delivery) -> Result<()> {
        self.sender
            .send(delivery)
            .await
            .map_err(|_| Error::BusClosed)
    }

    /// Public view.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            topic: self.topic.clone(),
            plugin: self.plugin.clone(),
            subscribed_at: self.subscribed_at,
        }
    }
}

struct Dispatcher {
    topic: String,
    plugin: String,
    handler: Arc<dyn Plugin>,
    registry: Arc<PluginRegistry>,
    metrics: Arc<RuntimeMetrics>,
    open: Arc<AtomicBool>,
}

impl Dispatcher {
    async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = receiver.recv().await {
            // Publisher already gave up (cancelled or timed out).
            if delivery.reply.is_closed() || delivery.cancel.is_cancelled() {
                continue;
            }
            let (on_start, handler_started) = oneshot::channel();
            tokio::spawn(self.clone().supervise(delivery, on_start));
            // The next handler starts only after this one has, or after
            // this delivery was settled without invoking it.
            let _ = handler_started.await;
        }
        debug!(topic = %self.topic, plugin = %self.plugin, "dispatcher stopped");
    }

    async fn supervise(self: Arc<Self>, mut delivery: Delivery, on_start: oneshot::Sender<()>) {
        let result = self.invoke(&mut delivery, on_start).await;
        self.metrics.record_dispatch(&result);
        // A closed receiver means the result is late; drop it.
        let _ = delivery.reply.send(result);
    }

    fn accepting(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.registry.is_active(&self.plugin)
    }

    async fn invoke(&self, delivery: &mut Delivery, on_start: oneshot::Sender<()>) -> DispatchResult {
        let remaining = delivery
            .deadline
            .saturating_sub(delivery.dispatched_at.elapsed());
        if remaining.is_zero() {
            return DispatchResult::timeout(&self.plugin, &self.topic, delivery.deadline);
        }
        if !self.accepting() {
            return DispatchResult::error(
                &self.plugin,
                &self.topic,
                DEACTIVATED,
                delivery.dispatched_at.elapsed(),
            );
        }

        let handler = self.handler.clone();
        let event = delivery.event.clone();
        let registry = self.registry.clone();
        let open = self.open.clone();
        let plugin = self.plugin.clone();
        let started = Instant::now();

        let mut task = tokio::spawn(async move {
            if !open.load(Ordering::SeqCst) || !registry.is_active(&plugin) {
                return Err(crate::plugin::HandleError::permanent(DEACTIVATED));
            }
            let _ = on_start.send(());
            handler.handle(&event).await
        });

        tokio::select! {
            biased;
            _ = delivery.cancel.cancelled() => {
                task.abort();
                DispatchResult::error(&self.plugin, &self.topic, "cancelled", started.elapsed())
            }
            _ = delivery.reply.closed() => {
                task.abort();
                DispatchResult::error(&self.plugin, &self.topic, "abandoned by publisher", started.elapsed())
            }
            joined = tokio::time::timeout(remaining, &mut task) => match joined {
                Ok(Ok(Ok(value))) => {
                    DispatchResult::ok(&self.plugin, &self.topic, value, started.elapsed())
                }
                Ok(Ok(Err(err))) => {
                    debug!(topic = %self.topic, plugin = %self.plugin, error = %err, "handler returned error");
                    DispatchResult::error(&self.plugin, &self.topic, err.message, started.elapsed())
                }
                Ok(Err(join_err)) => {
                    let detail = if join_err.is_panic() {
                        format!("handler panicked: {}", panic_message(join_err.into_panic()))
                    } else {
                        "handler task aborted".to_string()
                    };
                    warn!(topic = %self.topic, plugin = %self.plugin, detail = %detail, "handler fault contained");
                    DispatchResult::error(&self.plugin, &self.topic, detail, started.elapsed())
                }
                Err(_) => {
                    task.abort();
                    warn!(
                        topic = %self.topic,
                        plugin = %self.plugin,
                        deadline_ms = delivery.deadline.as_millis() as u64,
                        "handler timed out"
                    );
                    DispatchResult::timeout(&self.plugin, &self.topic, delivery.deadline)
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
