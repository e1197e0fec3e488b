//! # Cortex - plugin orchestrator runtime
//!
//! Receives external intents, resolves them to topics, fans them out to
//! independently developed plugins over an event bus and composes their
//! results:
//! - **Plugin**: descriptor state machine, registry, discovery, lifecycle
//! - **Bus**: topic publish/subscribe with deadlines and fault containment
//! - **Orchestrator**: intent resolution and result aggregation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cortex::config::RuntimeConfig;
//! use cortex::orchestrator::Intent;
//! use cortex::plugin::PluginFactory;
//! use cortex::runtime::Runtime;
//!
//! #[tokio::main]
//! async fn main() -> cortex::Result<()> {
//!     let mut config = RuntimeConfig::default();
//!     config.orchestrator = config.orchestrator.with_route("health", &["ping"]);
//!
//!     let runtime = Runtime::start(config, PluginFactory::with_builtins()).await?;
//!     let response = runtime
//!         .orchestrator()
//!         .handle(Intent::new("health", serde_json::json!({})))
//!         .await?;
//!     println!("{}: {} results", response.status, response.results.len());
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod core;
pub mod monitoring;
pub mod orchestrator;
pub mod plugin;
pub mod runtime;

pub use core::error::{Error, Result};
