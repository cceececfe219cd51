//! Lifecycle events
//!
//! ```text
//!   Regime ──publish(Event)──▶ EventBus ──join_all──▶ listener(task_started)
//!                                 │                 ├▶ listener(task_started)
//!                                 │                 └▶ ...
//!                                 └──oneshot──▶ wait_for(coup_d_etat)
//! ```
//!
//! Events are delivered, never stored.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventError, EventResult, SharedEventBus};
pub use types::{CustomEventType, Event, EventType};
