//! Task and step model
//!
//! A [`Task`] is the mutable record of one user request; its history is an
//! append-only log of immutable [`Step`]s shared with the step store.

pub mod step;
pub mod types;

pub use step::{Step, StepKind};
pub use types::{Metadata, Task, TaskError, TaskResult, TaskStatus, DEFAULT_PRIORITY};
