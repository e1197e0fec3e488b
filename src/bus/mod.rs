//! Event bus.
//!
//! Topic-based publish/subscribe with per-subscriber deadlines, fault
//! containment and bounded in-flight capacity.

pub mod event;
mod event_bus;
pub mod history;
mod subscription;

pub use event::{DispatchResult, DispatchStatus, DispatchValue, Event};
pub use event_bus::{BusHandle, EventBus};
pub use history::EventHistory;
pub use subscription::SubscriptionInfo;
