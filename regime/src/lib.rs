//! Regime: task delegation across a roster of LLM-backed agents
//!
//! A request is broken into subtasks, every agent rates its own fit, and
//! the best-scoring agent takes command of the roster while the other
//! qualifying agents contribute. The coordinator's answer is streamed back
//! fragment by fragment.
//!
//! ```text
//!   request
//!      │
//!      ▼
//!   Regime::chat ──▶ CommandChain ──▶ TaskDecomposer ──▶ CapabilityEvaluator × N
//!      │                  │
//!      │                  └──▶ coordinator + contributors (or a clarification)
//!      ▼
//!   power transfer ──▶ ConversationProtocol ──▶ FragmentStream
//!      │
//!      ├──▶ StepStore   (every step, keyed by memory id)
//!      └──▶ EventBus    (task_started, coup_d_etat, task_completed, ...)
//! ```
//!
//! # Features
//!
//! ## Conversation protocols
//! - `broadcast`: contributors answer concurrently, coordinator integrates
//! - `nested`: contributors answer in turn, each seeing earlier replies
//! - `sequential`: coordinator drafts, contributors refine in order
//! - `pairwise`: one contributor, one exchange
//!
//! ## Oracles
//! - [`HttpOracle`]: OpenAI-compatible chat completions, SSE streaming
//! - [`ScriptedOracle`]: canned replies for tests and demos
//!
//! # Usage
//!
//! ```bash
//! # One request against a roster file
//! regime --roster agents.toml "Review the termination clause of my lease"
//!
//! # Continue a stored discussion with the sequential protocol
//! REGIME_STORE_DIR=./discussions regime --roster agents.toml \
//!     --memory-id lease-review --protocol sequential "And the deposit?"
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod chain;
pub mod config;
pub mod conversation;
pub mod decomposer;
pub mod evaluator;
pub mod events;
pub mod mediator;
pub mod oracle;
pub mod prompts;
pub mod regime;
pub mod store;
pub mod stream;
pub mod task;

pub use agent::{Agent, Assignment, Capability, SharedAgent, Tool, ToolRegistry};
pub use chain::{ChainError, CommandChain, Selection};
pub use config::{ConfigError, RegimeConfig, RosterFile};
pub use conversation::{ConversationError, ConversationProtocol, ProtocolKind};
pub use decomposer::{DecompositionFallback, Subtask, TaskDecomposer};
pub use evaluator::{CapabilityEvaluator, Evaluation, Verdict};
pub use events::{Event, EventBus, EventType};
pub use oracle::{HttpOracle, OracleConfig, OracleError, ReasoningOracle, ScriptedOracle, SharedOracle};
pub use regime::{Regime, RegimeError, RegimeResult, Role, Roster, SharedRegime};
pub use store::{InMemoryStepStore, JsonlStepStore, StepStore};
pub use stream::FragmentStream;
pub use task::{Step, StepKind, Task, TaskStatus};
