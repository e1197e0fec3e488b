//! Monitoring Module
//!
//! Provides observability for the runtime:
//! - Structured logging setup
//! - Runtime counters and latency histogram

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{Counter, Histogram, MetricsSnapshot, RuntimeMetrics};
