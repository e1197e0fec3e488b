//! Topic-addressed publish/subscribe bus.
//!
//! `publish` fans an event out to every active subscriber of its topic and
//! returns one [`DispatchResult`] per subscriber, in subscription order.
//!
//! The subscription table sits behind one `RwLock`. `publish` copies the
//! subscriber list for the topic under the read lock, releases it, and
//! re-checks each plugin against the registry. Handlers always run after
//! every lock has been released.
//!
//! In-flight events are bounded by a semaphore of `capacity` permits; when
//! none is available `publish` fails (or waits, then fails) with
//! `BusSaturated`.

use crate::bus::event::{DispatchResult, Event};
use crate::bus::history::EventHistory;
use crate::bus::subscription::{Delivery, Subscription, SubscriptionInfo};
use crate::config::{BusConfig, SaturationPolicy};
use crate::core::{Error, Result};
use crate::monitoring::RuntimeMetrics;
use crate::plugin::{Plugin, PluginRegistry};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct BusInner {
    registry: Arc<PluginRegistry>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    permits: Arc<Semaphore>,
    config: BusConfig,
    history: EventHistory,
    metrics: Arc<RuntimeMetrics>,
}

/// Event bus connecting the orchestrator and all active plugins.
///
/// Cheap to clone; clones share the same subscription table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus that checks delivery eligibility against `registry`.
    pub fn new(config: BusConfig, registry: Arc<PluginRegistry>, metrics: Arc<RuntimeMetrics>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            inner: Arc::new(BusInner {
                registry,
                subscriptions: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(capacity)),
                history: EventHistory::new(config.history_size),
                config,
                metrics,
            }),
        }
    }

    /// Weak handle for plugins.
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The registry consulted at publish time.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    /// Bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    fn table(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(|p| p.into_inner())
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Subscribe an active plugin's handler to `topic`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, topic: &str, plugin: &str, handler: Arc<dyn Plugin>) -> Result<()> {
        if !self.inner.registry.is_active(plugin) {
            return Err(Error::NotActive(plugin.to_string()));
        }

        let mut table = self.table_mut();
        let subscribers = table.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|s| s.plugin == plugin) {
            return Err(Error::AlreadySubscribed {
                topic: topic.to_string(),
                plugin: plugin.to_string(),
            });
        }

        subscribers.push(Subscription::spawn(
            topic,
            plugin,
            handler,
            self.inner.registry.clone(),
            self.inner.metrics.clone(),
            self.inner.config.subscriber_queue,
        ));
        info!(topic = %topic, plugin = %plugin, "subscribed");
        Ok(())
    }

    /// Remove `plugin` from `topic`. Returns whether a subscription existed.
    ///
    /// Once this returns, events still queued for the subscription are
    /// answered with an error instead of reaching the handler. A handler
    /// whose eligibility check passed just before the removal may still be
    /// invoked once; calls already running are left to finish.
    pub fn unsubscribe(&self, topic: &str, plugin: &str) -> bool {
        let mut table = self.table_mut();
        let Some(subscribers) = table.get_mut(topic) else {
            return false;
        };
        let Some(pos) = subscribers.iter().position(|s| s.plugin == plugin) else {
            return false;
        };

        let removed = subscribers.remove(pos);
        removed.close();
        if subscribers.is_empty() {
            table.remove(topic);
        }
        info!(topic = %topic, plugin = %plugin, "unsubscribed");
        true
    }

    /// Remove every subscription of `plugin`. Returns how many were removed.
    pub fn unsubscribe_all(&self, plugin: &str) -> usize {
        let mut table = self.table_mut();
        let mut removed = 0;
        for subscribers in table.values_mut() {
            subscribers.retain(|s| {
                if s.plugin == plugin {
                    s.close();
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        table.retain(|_, subscribers| !subscribers.is_empty());
        if removed > 0 {
            info!(plugin = %plugin, count = removed, "unsubscribed from all topics");
        }
        removed
    }

    /// Plugins subscribed to `topic`, in subscription order.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.table()
            .get(topic)
            .map(|subs| subs.iter().map(|s| s.plugin.clone()).collect())
            .unwrap_or_default()
    }

    /// Every subscription, grouped by topic in sorted topic order.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let table = self.table();
        let mut topics: Vec<&String> = table.keys().collect();
        topics.sort();
        topics
            .into_iter()
            .flat_map(|topic| table[topic].iter().map(Subscription::info))
            .collect()
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.table().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of published events currently awaiting results.
    pub fn in_flight(&self) -> usize {
        self.inner
            .config
            .capacity
            .max(1)
            .saturating_sub(self.inner.permits.available_permits())
    }

    /// Most recent published events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Event> {
        self.inner.history.recent(limit)
    }

    /// Publish to every active subscriber of `event.topic`.
    pub async fn publish(&self, event: Event) -> Result<Vec<DispatchResult>> {
        self.publish_with_cancel(event, &CancellationToken::new()).await
    }

    /// Publish, aborting in-flight handlers if `cancel` fires.
    pub async fn publish_with_cancel(
        &self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchResult>> {
        let _permit = self.acquire().await?;
        self.accept(&event);

        let targets = self.snapshot(&event.topic, None);
        if targets.is_empty() {
            debug!(topic = %event.topic, correlation_id = %event.correlation_id, "no subscribers");
            return Ok(Vec::new());
        }

        self.dispatch_cancellable(event, targets, cancel).await
    }

    /// Deliver to a single subscriber of `event.topic`.
    pub async fn publish_to(&self, plugin: &str, event: Event) -> Result<DispatchResult> {
        self.publish_to_with_cancel(plugin, event, &CancellationToken::new())
            .await
    }

    /// Targeted delivery, aborting the handler if `cancel` fires.
    pub async fn publish_to_with_cancel(
        &self,
        plugin: &str,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult> {
        let targets = self.snapshot(&event.topic, Some(plugin));
        if targets.is_empty() {
            return Err(Error::NotActive(plugin.to_string()));
        }

        let _permit = self.acquire().await?;
        self.accept(&event);

        let mut results = self.dispatch_cancellable(event, targets, cancel).await?;
        results
            .pop()
            .ok_or_else(|| Error::NotActive(plugin.to_string()))
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permits = self.inner.permits.clone();
        let saturated = || {
            self.inner.metrics.saturated.inc();
            warn!(capacity = self.inner.config.capacity, "event bus saturated");
            Error::BusSaturated {
                capacity: self.inner.config.capacity,
            }
        };

        match &self.inner.config.saturation {
            SaturationPolicy::Reject => permits.try_acquire_owned().map_err(|_| saturated()),
            SaturationPolicy::Wait { wait_ms } => {
                match tokio::time::timeout(Duration::from_millis(*wait_ms), permits.acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(Error::BusClosed),
                    Err(_) => Err(saturated()),
                }
            }
        }
    }

    fn accept(&self, event: &Event) {
        self.inner.history.record(event);
        self.inner.metrics.events_published.inc();
    }

    /// Copy the current subscribers under the read lock, then drop any
    /// plugin the registry no longer lists as active.
    fn snapshot(&self, topic: &str, only: Option<&str>) -> Vec<Subscription> {
        let candidates: Vec<Subscription> = {
            let table = self.table();
            table
                .get(topic)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| only.map_or(true, |p| s.plugin == p))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        candidates
            .into_iter()
            .filter(|s| self.inner.registry.is_active(&s.plugin))
            .collect()
    }

    async fn dispatch_cancellable(
        &self,
        event: Event,
        targets: Vec<Subscription>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchResult>> {
        debug!(
            topic = %event.topic,
            correlation_id = %event.correlation_id,
            subscribers = targets.len(),
            "publishing event"
        );

        let token = cancel.child_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                token.cancel();
                Err(Error::Cancelled)
            }
            results = self.dispatch(event, targets, token.clone()) => Ok(results),
        }
    }

    async fn dispatch(
        &self,
        event: Event,
        targets: Vec<Subscription>,
        cancel: CancellationToken,
    ) -> Vec<DispatchResult> {
        let deadline = event
            .deadline
            .unwrap_or_else(|| self.inner.config.default_deadline());
        let event = Arc::new(event);
        let dispatched_at = Instant::now();

        let pending = targets.into_iter().map(|sub| {
            let event = event.clone();
            let cancel = cancel.clone();
            async move {
                let (reply, response) = oneshot::channel();
                let delivery = Delivery {
                    event,
                    deadline,
                    dispatched_at,
                    cancel,
                    reply,
                };
                let wait = async {
                    sub.deliver(delivery)
                        .await
                        .map_err(|_| "subscriber dispatcher stopped")?;
                    response
                        .await
                        .map_err(|_| "subscriber dropped the delivery")
                };

                let remaining = deadline.saturating_sub(dispatched_at.elapsed());
                match tokio::time::timeout(remaining, wait).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(detail)) => DispatchResult::error(
                        &sub.plugin,
                        &sub.topic,
                        detail,
                        dispatched_at.elapsed(),
                    ),
                    Err(_) => DispatchResult::timeout(&sub.plugin, &sub.topic, deadline),
                }
            }
        });

        join_all(pending).await
    }
}

/// Weak handle to the bus, handed to plugins in their context.
///
/// Holding it does not keep the bus alive.
#[derive(Clone, Debug, Default)]
pub struct BusHandle {
    inner: Weak<BusInner>,
}

impl BusHandle {
    /// A handle not connected to any bus.
    pub fn detached() -> Self {
        Self::default()
    }

    fn upgrade(&self) -> Result<EventBus> {
        self.inner
            .upgrade()
            .map(|inner| EventBus { inner })
            .ok_or(Error::BusClosed)
    }

    /// Whether the bus is still alive.
    pub fn is_connected(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Publish a follow-up event.
    pub async fn publish(&self, event: Event) -> Result<Vec<DispatchResult>> {
        self.upgrade()?.publish(event).await
    }

    /// Publish to a single plugin.
    pub async fn publish_to(&self, plugin: &str, event: Event) -> Result<DispatchResult> {
        self.upgrade()?.publish_to(plugin, event).await
    }
}
