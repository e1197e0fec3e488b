//! Orchestrator: intent in, composed response out.
//!
//! One request resolves its intent to topics, publishes one event per topic
//! under a fresh correlation ID, waits for every `DispatchResult` and merges
//! them in topic order, subscriber order within a topic. Topics of one
//! request are published concurrently.

use crate::bus::{DispatchResult, Event, EventBus};
use crate::config::OrchestratorConfig;
use crate::core::{CorrelationId, Error, Result};
use crate::monitoring::RuntimeMetrics;
use crate::orchestrator::intent::{
    Intent, IntentResolver, KeywordResolver, ResolverChain, TableResolver,
};
use crate::orchestrator::response::{ComposedResponse, ResponseStatus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One step of a sequential workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Plugin that must handle the step
    pub plugin: String,
    /// Topic delivered to it
    pub topic: String,
    /// Event payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkflowStep {
    pub fn new(plugin: &str, topic: &str, payload: serde_json::Value) -> Self {
        Self {
            plugin: plugin.to_string(),
            topic: topic.to_string(),
            payload,
        }
    }
}

/// Result of a workflow run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Correlation ID shared by every step
    pub correlation_id: CorrelationId,
    /// One result per executed step
    pub results: Vec<DispatchResult>,
    /// Whether every step ran and succeeded
    pub completed: bool,
}

/// Orchestrator.
pub struct Orchestrator {
    bus: EventBus,
    resolver: Arc<dyn IntentResolver>,
    config: OrchestratorConfig,
    metrics: Arc<RuntimeMetrics>,
}

impl Orchestrator {
    /// Create an orchestrator with the default resolver chain.
    pub fn new(bus: EventBus, config: OrchestratorConfig, metrics: Arc<RuntimeMetrics>) -> Self {
        let mut chain = ResolverChain::new().with(TableResolver::new(config.routes.clone()));
        if config.keyword_fallback {
            chain = chain.with(KeywordResolver::new(bus.registry().clone()));
        }

        Self {
            bus,
            resolver: Arc::new(chain),
            config,
            metrics,
        }
    }

    /// Replace the resolution policy.
    pub fn with_resolver(mut self, resolver: impl IntentResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Topics for `intent`, duplicates removed.
    pub fn resolve(&self, intent: &Intent) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.resolver.resolve(intent) {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }

    /// Handle one intent.
    pub async fn handle(&self, intent: Intent) -> Result<ComposedResponse> {
        self.handle_with_cancel(intent, &CancellationToken::new())
            .await
    }

    /// Handle one intent; cancelling `cancel` aborts in-flight handlers and
    /// returns `Error::Cancelled`.
    pub async fn handle_with_cancel(
        &self,
        intent: Intent,
        cancel: &CancellationToken,
    ) -> Result<ComposedResponse> {
        self.metrics.requests.inc();
        let correlation_id = CorrelationId::new();

        let topics = self.resolve(&intent);
        if topics.is_empty() {
            warn!(action = %intent.action, correlation_id = %correlation_id, "intent did not resolve to any topic");
            self.metrics.requests_failed.inc();
            return Ok(ComposedResponse::unresolved(correlation_id));
        }

        let deadline = intent
            .deadline
            .unwrap_or_else(|| self.config.default_deadline());
        debug!(
            action = %intent.action,
            correlation_id = %correlation_id,
            topics = ?topics,
            deadline_ms = deadline.as_millis() as u64,
            "handling intent"
        );

        let publishes = topics.iter().map(|topic| {
            let event = Event::correlated(topic, correlation_id.clone(), intent.payload.clone())
                .with_deadline(deadline);
            self.bus.publish_with_cancel(event, cancel)
        });

        let mut results = Vec::new();
        for outcome in join_all(publishes).await {
            match outcome {
                Ok(batch) => results.extend(batch),
                Err(err) => {
                    warn!(correlation_id = %correlation_id, error = %err, "request aborted");
                    self.metrics.requests_failed.inc();
                    return Err(err);
                }
            }
        }

        let response = ComposedResponse::compose(
            correlation_id,
            topics,
            results,
            &self.config.required_plugins,
        );
        match response.status {
            ResponseStatus::Ok => {}
            ResponseStatus::PartialFailure => self.metrics.requests_partial.inc(),
            ResponseStatus::Error => self.metrics.requests_failed.inc(),
        }

        info!(
            correlation_id = %response.correlation_id,
            status = %response.status,
            results = response.results.len(),
            failed = ?response.failed,
            "intent handled"
        );
        Ok(response)
    }

    /// Deliver one payload to one plugin under a fresh correlation ID.
    pub async fn execute(
        &self,
        plugin: &str,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<DispatchResult> {
        self.execute_correlated(plugin, topic, payload, CorrelationId::new())
            .await
    }

    async fn execute_correlated(
        &self,
        plugin: &str,
        topic: &str,
        payload: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Result<DispatchResult> {
        let event = Event::correlated(topic, correlation_id, payload)
            .with_deadline(self.config.default_deadline());
        self.bus.publish_to(plugin, event).await
    }

    /// Run steps one after another under one correlation ID, stopping at
    /// the first step that does not succeed.
    ///
    /// A step whose plugin is not subscribed to its topic counts as a
    /// failed step rather than an error.
    pub async fn run_workflow(&self, steps: &[WorkflowStep]) -> Result<WorkflowOutcome> {
        let correlation_id = CorrelationId::new();
        let mut results = Vec::with_capacity(steps.len());

        for step in steps {
            let result = match self
                .execute_correlated(
                    &step.plugin,
                    &step.topic,
                    step.payload.clone(),
                    correlation_id.clone(),
                )
                .await
            {
                Ok(result) => result,
                Err(Error::NotActive(_)) => DispatchResult::error(
                    &step.plugin,
                    &step.topic,
                    "plugin is not subscribed to this topic",
                    std::time::Duration::ZERO,
                ),
                Err(err) => return Err(err),
            };

            let ok = result.is_ok();
            results.push(result);
            if !ok {
                warn!(
                    correlation_id = %correlation_id,
                    plugin = %step.plugin,
                    topic = %step.topic,
                    "workflow stopped at failed step"
                );
                break;
            }
        }

        let completed = results.len() == steps.len() && results.iter().all(DispatchResult::is_ok);
        Ok(WorkflowOutcome {
            correlation_id,
            results,
            completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DispatchStatus;
    use crate::config::BusConfig;
    use crate::plugin::builtin::EchoPlugin;
    use crate::plugin::testing::{activate, FailingPlugin, RecordingPlugin, SlowPlugin};
    use crate::plugin::{LifecycleManager, PluginFactory, PluginRegistry};
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tokio_test::{assert_err, assert_ok};

    fn setup(config: OrchestratorConfig) -> (EventBus, Orchestrator) {
        let metrics = Arc::new(RuntimeMetrics::new());
        let bus = EventBus::new(
            BusConfig::default(),
            Arc::new(PluginRegistry::new()),
            metrics.clone(),
        );
        let orchestrator = Orchestrator::new(bus.clone(), config, metrics);
        (bus, orchestrator)
    }

    #[tokio::test]
    async fn test_topic_without_subscribers_adds_no_results() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("health", &["ping", "audit"]));
        activate(&bus, Arc::new(EchoPlugin::new()));

        let response = assert_ok!(orchestrator.handle(Intent::new("health", json!({}))).await);
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.topics, vec!["ping", "audit"]);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].plugin, "echo");
        assert_eq!(response.results[0].topic, "ping");
        assert_eq!(response.results.iter().filter(|r| r.topic == "audit").count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_plugin_skipped_until_reactivated() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("health", &["ping"]));
        let lifecycle = LifecycleManager::new(bus.clone(), PluginFactory::with_builtins());
        lifecycle.install(Arc::new(EchoPlugin::new())).await.unwrap();

        lifecycle.disable("echo").await.unwrap();
        let response = orchestrator.handle(Intent::new("health", json!({}))).await.unwrap();
        assert!(response.results.is_empty());

        lifecycle.activate("echo").await.unwrap();
        let response = orchestrator.handle(Intent::new("health", json!({}))).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_partial_failure_and_required_plugins() {
        let config = OrchestratorConfig::default().with_route("inbound", &["inbound_message"]);
        let (bus, orchestrator) = setup(config.clone());
        activate(&bus, Arc::new(RecordingPlugin::new("crm", &["inbound_message"])));
        activate(&bus, Arc::new(FailingPlugin::new("content", &["inbound_message"])));

        let response = orchestrator.handle(Intent::new("inbound", json!({}))).await.unwrap();
        assert_eq!(response.status, ResponseStatus::PartialFailure);
        assert_eq!(response.failed, vec!["content"]);
        assert_eq!(response.results.len(), 2);

        let strict = Orchestrator::new(
            bus.clone(),
            config.with_required("content"),
            Arc::new(RuntimeMetrics::new()),
        );
        let response = strict.handle(Intent::new("inbound", json!({}))).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.failed, vec!["content"]);
    }

    #[tokio::test]
    async fn test_results_are_deterministic() {
        let (bus, orchestrator) = setup(
            OrchestratorConfig::default().with_route("fanout", &["audit", "ping"]),
        );
        activate(&bus, Arc::new(RecordingPlugin::new("auditor", &["audit", "ping"])));
        activate(&bus, Arc::new(EchoPlugin::new()));
        activate(&bus, Arc::new(RecordingPlugin::new("ledger", &["audit"])));

        let order = |r: &ComposedResponse| -> Vec<(String, String)> {
            r.results
                .iter()
                .map(|d| (d.topic.clone(), d.plugin.clone()))
                .collect()
        };

        let first = orchestrator.handle(Intent::new("fanout", json!({}))).await.unwrap();
        for _ in 0..5 {
            let again = orchestrator.handle(Intent::new("fanout", json!({}))).await.unwrap();
            assert_eq!(order(&again), order(&first));
        }
        assert_eq!(
            order(&first),
            vec![
                ("audit".to_string(), "auditor".to_string()),
                ("audit".to_string(), "ledger".to_string()),
                ("ping".to_string(), "auditor".to_string()),
                ("ping".to_string(), "echo".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_share_correlation_id() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("fanout", &["a", "b"]));
        let recorder = Arc::new(RecordingPlugin::new("recorder", &["a", "b"]));
        activate(&bus, recorder.clone());

        let response = orchestrator.handle(Intent::new("fanout", json!({"n": 1}))).await.unwrap();
        let seen = recorder.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.correlation_id == response.correlation_id));
        assert!(seen.iter().all(|e| e.deadline == Some(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_intent_deadline_applies() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("slow", &["content"]));
        activate(
            &bus,
            Arc::new(SlowPlugin::new("writer", &["content"], Duration::from_millis(400))),
        );

        let intent = Intent::new("slow", json!({})).with_deadline(Duration::from_millis(50));
        let response = orchestrator.handle(intent).await.unwrap();
        assert_eq!(response.status, ResponseStatus::PartialFailure);
        assert_eq!(response.results[0].status, DispatchStatus::Timeout);
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_serialize() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("a", &["a"]).with_route("b", &["b"]));
        activate(&bus, Arc::new(SlowPlugin::new("slow-a", &["a"], Duration::from_millis(150))));
        activate(&bus, Arc::new(SlowPlugin::new("slow-b", &["b"], Duration::from_millis(150))));

        let started = Instant::now();
        let (a, b) = tokio::join!(
            orchestrator.handle(Intent::new("a", json!({}))),
            orchestrator.handle(Intent::new("b", json!({}))),
        );
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert!(started.elapsed() < Duration::from_millis(280));
    }

    #[tokio::test]
    async fn test_slow_request_does_not_delay_another_on_same_topic() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("health", &["ping"]));
        let mixed = Arc::new(SlowPlugin::when_flagged("mixed", &["ping"], Duration::from_millis(500)));
        activate(&bus, mixed.clone());
        let orchestrator = Arc::new(orchestrator);

        let slow_orchestrator = orchestrator.clone();
        let slow = tokio::spawn(async move {
            let intent = Intent::new("health", json!({"slow": true}))
                .with_deadline(Duration::from_millis(200));
            slow_orchestrator.handle(intent).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        let intent = Intent::new("health", json!({"slow": false}))
            .with_deadline(Duration::from_millis(150));
        let fast = orchestrator.handle(intent).await.unwrap();
        assert!(fast.is_ok());
        assert_eq!(fast.results[0].status, DispatchStatus::Ok);
        assert!(started.elapsed() < Duration::from_millis(150));

        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.results[0].status, DispatchStatus::Timeout);
        assert_eq!(mixed.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_discards_request() {
        let (bus, orchestrator) =
            setup(OrchestratorConfig::default().with_route("slow", &["content"]));
        let slow = Arc::new(SlowPlugin::new("writer", &["content"], Duration::from_millis(300)));
        activate(&bus, slow.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = orchestrator
            .handle_with_cancel(Intent::new("slow", json!({})), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(slow.completed(), 0);

        // Nothing from the cancelled request leaks into the next one.
        let response = orchestrator.handle(Intent::new("slow", json!({}))).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_unresolved_intent() {
        let (_bus, orchestrator) = setup(OrchestratorConfig::default());
        let response = orchestrator.handle(Intent::from_text("nothing matches")).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert!(response.topics.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_fallback() {
        let (bus, orchestrator) = setup(OrchestratorConfig::default());
        activate(&bus, Arc::new(EchoPlugin::new()));

        let response = orchestrator.handle(Intent::from_text("please echo this")).await.unwrap();
        assert_eq!(response.topics, vec!["echo"]);
        let value = response.results[0].value.clone().unwrap();
        assert_eq!(value["echo"]["text"], "please echo this");
    }

    #[tokio::test]
    async fn test_keyword_fallback_disabled() {
        let config = OrchestratorConfig {
            keyword_fallback: false,
            ..OrchestratorConfig::default()
        };
        let (bus, orchestrator) = setup(config);
        activate(&bus, Arc::new(EchoPlugin::new()));

        let response = orchestrator.handle(Intent::from_text("echo")).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn test_execute_targets_one_plugin() {
        let (bus, orchestrator) = setup(OrchestratorConfig::default());
        let other = Arc::new(RecordingPlugin::new("mirror", &["echo"]));
        activate(&bus, Arc::new(EchoPlugin::new()));
        activate(&bus, other.clone());

        let result = orchestrator.execute("echo", "echo", json!({"x": 1})).await.unwrap();
        assert!(result.is_ok());
        assert!(other.seen().is_empty());

        assert_err!(orchestrator.execute("ghost", "echo", json!(null)).await);
    }

    #[tokio::test]
    async fn test_workflow_stops_at_first_failure() {
        let (bus, orchestrator) = setup(OrchestratorConfig::default());
        let recorder = Arc::new(RecordingPlugin::new("ledger", &["ledger.write"]));
        activate(&bus, Arc::new(EchoPlugin::new()));
        activate(&bus, Arc::new(FailingPlugin::new("crm", &["crm.sync"])));
        activate(&bus, recorder.clone());

        let steps = vec![
            WorkflowStep::new("echo", "ping", json!(null)),
            WorkflowStep::new("crm", "crm.sync", json!({"id": 7})),
            WorkflowStep::new("ledger", "ledger.write", json!(null)),
        ];
        let outcome = orchestrator.run_workflow(&steps).await.unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[1].status, DispatchStatus::Error);
        assert!(recorder.seen().is_empty());
    }

    #[tokio::test]
    async fn test_workflow_shares_correlation_id() {
        let (bus, orchestrator) = setup(OrchestratorConfig::default());
        let recorder = Arc::new(RecordingPlugin::new("ledger", &["ledger.open", "ledger.write"]));
        activate(&bus, recorder.clone());

        let steps = vec![
            WorkflowStep::new("ledger", "ledger.open", json!(null)),
            WorkflowStep::new("ledger", "ledger.write", json!(null)),
        ];
        let outcome = orchestrator.run_workflow(&steps).await.unwrap();
        assert!(outcome.completed);

        let seen = recorder.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.correlation_id == outcome.correlation_id));
    }

    #[tokio::test]
    async fn test_workflow_missing_plugin_is_failed_step() {
        let (_bus, orchestrator) = setup(OrchestratorConfig::default());
        let outcome = orchestrator
            .run_workflow(&[WorkflowStep::new("ghost", "ping", json!(null))])
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.results[0].status, DispatchStatus::Error);
    }
}
