//! Intents and intent-to-topic resolution.
//!
//! Resolution is pluggable: the orchestrator asks an [`IntentResolver`] for
//! the topics of an intent. The default chain consults the configured route
//! table first and falls back to keyword matching against the capabilities
//! of active plugins.

use crate::plugin::{PluginRegistry, PluginState};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A caller-supplied request for the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Action name looked up in the route table
    pub action: String,
    /// Payload handed to every resolved topic
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Free text used by keyword resolution
    #[serde(default)]
    pub text: Option<String>,
    /// Per-handler deadline; the orchestrator default applies when absent
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl Intent {
    /// Create an intent for a named action.
    pub fn new(action: &str, payload: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            payload,
            text: None,
            deadline: None,
        }
    }

    /// Create an intent from free text alone.
    ///
    /// The payload is `{"text": ...}`.
    pub fn from_text(text: &str) -> Self {
        Self {
            action: String::new(),
            payload: json!({ "text": text }),
            text: Some(text.to_string()),
            deadline: None,
        }
    }

    /// Attach free text.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Set the per-handler deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Maps an intent to the topics that must run for it.
pub trait IntentResolver: Send + Sync {
    /// Topics for `intent`, in publish order. Empty when unresolved.
    fn resolve(&self, intent: &Intent) -> Vec<String>;
}

/// Static action → topics table.
#[derive(Clone, Debug, Default)]
pub struct TableResolver {
    routes: HashMap<String, Vec<String>>,
}

impl TableResolver {
    pub fn new(routes: HashMap<String, Vec<String>>) -> Self {
        Self { routes }
    }

    /// Add a route.
    pub fn with_route(mut self, action: &str, topics: &[&str]) -> Self {
        self.routes.insert(
            action.to_string(),
            topics.iter().map(|t| t.to_string()).collect(),
        );
        self
    }
}

impl IntentResolver for TableResolver {
    fn resolve(&self, intent: &Intent) -> Vec<String> {
        self.routes.get(&intent.action).cloned().unwrap_or_default()
    }
}

/// Picks the active capability topic sharing the most words with the
/// intent's text (or its action when there is no text).
///
/// Topic words are split on `.`, `-` and `_`; text words on anything that
/// is not alphanumeric. Only whole words count. Ties go to the plugin
/// registered first.
pub struct KeywordResolver {
    registry: Arc<PluginRegistry>,
}

impl KeywordResolver {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }
}

fn words(text: &str) -> HashSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect()
}

fn score(topic: &str, text_words: &HashSet<&str>) -> usize {
    topic
        .to_lowercase()
        .split(['.', '-', '_'])
        .filter(|word| !word.is_empty() && text_words.contains(word))
        .count()
}

impl IntentResolver for KeywordResolver {
    fn resolve(&self, intent: &Intent) -> Vec<String> {
        let text = intent.text.as_deref().unwrap_or(&intent.action).to_lowercase();
        let text_words = words(&text);
        if text_words.is_empty() {
            return Vec::new();
        }

        let mut best: Option<(usize, String)> = None;
        for descriptor in self.registry.list(Some(PluginState::Active)) {
            for topic in &descriptor.capabilities {
                let s = score(topic, &text_words);
                if s > 0 && best.as_ref().map_or(true, |(b, _)| s > *b) {
                    best = Some((s, topic.clone()));
                }
            }
        }

        best.map(|(_, topic)| vec![topic]).unwrap_or_default()
    }
}

/// Tries resolvers in order; the first non-empty answer wins.
#[derive(Default)]
pub struct ResolverChain {
    resolvers: Vec<Box<dyn IntentResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver.
    pub fn with(mut self, resolver: impl IntentResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl IntentResolver for ResolverChain {
    fn resolve(&self, intent: &Intent) -> Vec<String> {
        self.resolvers
            .iter()
            .map(|r| r.resolve(intent))
            .find(|topics| !topics.is_empty())
            .unwrap_or_default()
    }
}
