//! Events and per-plugin dispatch outcomes.

use crate::core::{now, CorrelationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value returned by a successful handler.
pub type DispatchValue = serde_json::Value;

/// An event published on a topic.
///
/// Immutable once published; subscribers receive it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Topic the event is published to
    pub topic: String,
    /// Request this event belongs to
    pub correlation_id: CorrelationId,
    /// Opaque structured payload
    pub payload: serde_json::Value,
    /// Publication time
    pub published_at: Timestamp,
    /// Per-handler deadline (bus default when absent)
    pub deadline: Option<Duration>,
}

impl Event {
    /// Create an event under a fresh correlation ID.
    pub fn new(topic: &str, payload: serde_json::Value) -> Self {
        Self::correlated(topic, CorrelationId::new(), payload)
    }

    /// Create an event under an existing correlation ID.
    pub fn correlated(topic: &str, correlation_id: CorrelationId, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.to_string(),
            correlation_id,
            payload,
            published_at: now(),
            deadline: None,
        }
    }

    /// Set the handler deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome class of one handler invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Ok,
    Error,
    Timeout,
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStatus::Ok => write!(f, "ok"),
            DispatchStatus::Error => write!(f, "error"),
            DispatchStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Per-plugin outcome of handling one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Plugin that handled the event
    pub plugin: String,
    /// Topic of the event
    pub topic: String,
    /// Outcome
    pub status: DispatchStatus,
    /// Handler value when `status == Ok`
    pub value: Option<DispatchValue>,
    /// Failure detail otherwise
    pub error: Option<String>,
    /// Time from dispatch to outcome
    pub duration: Duration,
}

impl DispatchResult {
    /// Successful outcome.
    pub fn ok(plugin: &str, topic: &str, value: DispatchValue, duration: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            topic: topic.to_string(),
            status: DispatchStatus::Ok,
            value: Some(value),
            error: None,
            duration,
        }
    }

    /// Handler error, fault or refused delivery.
    pub fn error(plugin: &str, topic: &str, detail: impl Into<String>, duration: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            topic: topic.to_string(),
            status: DispatchStatus::Error,
            value: None,
            error: Some(detail.into()),
            duration,
        }
    }

    /// Deadline exceeded.
    pub fn timeout(plugin: &str, topic: &str, deadline: Duration) -> Self {
        Self {
            plugin: plugin.to_string(),
            topic: topic.to_string(),
            status: DispatchStatus::Timeout,
            value: None,
            error: Some(format!("no result within {}ms", deadline.as_millis())),
            duration: deadline,
        }
    }

    /// Whether the handler succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == DispatchStatus::Ok
    }
}
