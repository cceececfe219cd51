//! Step persistence
//!
//! A step store keeps the step log of each discussion, keyed by memory id.
//! Steps are stored in their JSON form (`step_type` discriminator,
//! `request_id`, `timestamp`, `metadata`, variant fields) so any backend
//! round-trips them exactly.

pub mod file;
pub mod memory;

use std::sync::Arc;

pub use file::JsonlStepStore;
pub use memory::InMemoryStepStore;

use crate::task::Step;

/// Error type for step store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error at entry {line}: {reason}")]
    Deserialization { line: usize, reason: String },

    #[error("Invalid memory id: {0:?}")]
    InvalidMemoryId(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for step store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a step store
pub type SharedStepStore = Arc<dyn StepStore>;

/// Append-only storage of step logs
pub trait StepStore: Send + Sync {
    /// Append one step to a discussion's log
    fn append(&self, memory_id: &str, step: &Step) -> StoreResult<()>;

    /// All steps of a discussion, in append order
    fn load_all(&self, memory_id: &str) -> StoreResult<Vec<Step>>;

    /// Forget a discussion
    fn clear(&self, memory_id: &str) -> StoreResult<()>;

    /// Steps of one request within a discussion
    fn load_request(&self, memory_id: &str, request_id: &str) -> StoreResult<Vec<Step>> {
        Ok(self
            .load_all(memory_id)?
            .into_iter()
            .filter(|step| step.request_id() == request_id)
            .collect())
    }
}

fn encode(step: &Step) -> StoreResult<String> {
    step.to_json()
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(line: usize, json: &str) -> StoreResult<Step> {
    Step::from_json(json).map_err(|e| StoreError::Deserialization {
        line,
        reason: e.to_string(),
    })
}
