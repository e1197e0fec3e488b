//! Composed responses.

use crate::bus::DispatchResult;
use crate::core::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Overall outcome of one orchestrator request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Every handler succeeded (or nothing subscribed)
    Ok,
    /// Some non-required plugins failed
    PartialFailure,
    /// A required plugin failed, or the intent resolved to no topic
    Error,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::Ok => write!(f, "ok"),
            ResponseStatus::PartialFailure => write!(f, "partial_failure"),
            ResponseStatus::Error => write!(f, "error"),
        }
    }
}

/// Aggregated result returned to the orchestrator's caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComposedResponse {
    /// Outcome
    pub status: ResponseStatus,
    /// Correlation ID shared by every event of the request
    pub correlation_id: CorrelationId,
    /// Topics the intent resolved to
    pub topics: Vec<String>,
    /// Per-plugin results, topic by topic in subscriber order
    pub results: Vec<DispatchResult>,
    /// Plugins whose handler failed or timed out, first failure first
    pub failed: Vec<String>,
}

impl ComposedResponse {
    /// Aggregate results, deriving status and the failed list.
    pub fn compose(
        correlation_id: CorrelationId,
        topics: Vec<String>,
        results: Vec<DispatchResult>,
        required: &HashSet<String>,
    ) -> Self {
        let mut failed: Vec<String> = Vec::new();
        for result in results.iter().filter(|r| !r.is_ok()) {
            if !failed.contains(&result.plugin) {
                failed.push(result.plugin.clone());
            }
        }

        let status = if failed.is_empty() {
            ResponseStatus::Ok
        } else if failed.iter().any(|p| required.contains(p)) {
            ResponseStatus::Error
        } else {
            ResponseStatus::PartialFailure
        };

        Self {
            status,
            correlation_id,
            topics,
            results,
            failed,
        }
    }

    /// Response for an intent no resolver could map to a topic.
    pub fn unresolved(correlation_id: CorrelationId) -> Self {
        Self {
            status: ResponseStatus::Error,
            correlation_id,
            topics: Vec::new(),
            results: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Results produced by one plugin.
    pub fn results_for<'a>(&'a self, plugin: &'a str) -> impl Iterator<Item = &'a DispatchResult> {
        self.results.iter().filter(move |r| r.plugin == plugin)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}
