//! Orchestrator Module
//!
//! Entry point for external intents:
//! - Intent resolution (route table, keyword fallback)
//! - Fan-out over the event bus and result aggregation
//! - Direct execution and sequential workflows

pub mod engine;
pub mod intent;
pub mod response;

pub use engine::{Orchestrator, WorkflowOutcome, WorkflowStep};
pub use intent::{Intent, IntentResolver, KeywordResolver, ResolverChain, TableResolver};
pub use response::{ComposedResponse, ResponseStatus};
