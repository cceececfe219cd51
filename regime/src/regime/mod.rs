//! The regime: a roster of agents under one coordinator
//!
//! ```text
//!   chat(request) ──▶ spawn ──▶ lock ──▶ Task::replay(history) + UserMessage
//!                                  │         └──▶ task_started
//!                                  ▼
//!                            CommandChain::select
//!                           ok │            │ err
//!                              ▼            ▼
//!            power_transfer ──▶ coup     clarification ──▶ task_failed
//!                              │
//!                              ▼
//!            task_updated ──▶ protocol (or solo) ──▶ FragmentSink
//!                              │
//!                              ▼
//!            AssistantMessage ──▶ task_completed
//! ```
//!
//! Every step is appended to the step store as soon as its phase ends, so a
//! later [`Regime::resume`] sees the same history.

pub mod roster;

use futures::Future;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use roster::{PowerTransfer, Role, Roster, RosterError};

use crate::agent::{AgentRunner, SharedAgent};
use crate::chain::CommandChain;
use crate::config::{ConfigError, RegimeConfig};
use crate::conversation::{self, ConversationError, ConversationProtocol, Session};
use crate::events::{Event, EventResult, EventType, SharedEventBus, EventBus};
use crate::oracle::SharedOracle;
use crate::store::{InMemoryStepStore, SharedStepStore, StoreError};
use crate::stream::{self, FragmentSink, FragmentStream};
use crate::task::{Step, StepKind, Task, TaskError, TaskStatus};

/// Errors surfaced by the regime
#[derive(Debug, thiserror::Error)]
pub enum RegimeError {
    #[error("Regime execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for regime operations
pub type RegimeResult<T> = Result<T, RegimeError>;

/// Shared handle to a regime; `chat` needs one
pub type SharedRegime = Arc<Regime>;

/// State guarded by the chat lock
struct RegimeState {
    roster: Roster,
    history: Vec<Step>,
}

/// Entry point: routes each request through selection and a conversation
/// protocol, streaming the answer back.
pub struct Regime {
    config: RegimeConfig,
    memory_id: String,
    chain: CommandChain,
    runner: AgentRunner,
    protocol: Box<dyn ConversationProtocol>,
    store: SharedStepStore,
    events: SharedEventBus,
    state: Mutex<RegimeState>,
}

impl Regime {
    /// New discussion backed by an in-memory store
    pub fn new(config: RegimeConfig, oracle: SharedOracle, agents: Vec<SharedAgent>) -> RegimeResult<Self> {
        let memory_id = format!("mem_{}", uuid::Uuid::new_v4().simple());
        Self::resume(config, oracle, agents, Arc::new(InMemoryStepStore::new()), memory_id)
    }

    /// Continue the discussion stored under `memory_id`.
    ///
    /// An unknown id starts an empty discussion.
    pub fn resume(
        config: RegimeConfig,
        oracle: SharedOracle,
        agents: Vec<SharedAgent>,
        store: SharedStepStore,
        memory_id: impl Into<String>,
    ) -> RegimeResult<Self> {
        config.validate()?;
        let memory_id = memory_id.into();
        let roster = Roster::new(agents)?;
        let history = store.load_all(&memory_id)?;

        info!(
            memory_id = %memory_id,
            agents = roster.len(),
            history = history.len(),
            protocol = %config.protocol,
            "Regime ready"
        );

        Ok(Self {
            chain: CommandChain::new(oracle.clone(), &config),
            runner: AgentRunner::new(oracle, config.language.clone(), config.max_tool_rounds),
            protocol: config.protocol.protocol(),
            config,
            memory_id,
            store,
            events: EventBus::new().shared(),
            state: Mutex::new(RegimeState { roster, history }),
        })
    }

    /// Publish on `events` instead of a private bus
    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn shared(self) -> SharedRegime {
        Arc::new(self)
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn memory_id(&self) -> &str {
        &self.memory_id
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Snapshot of the roster in its current order
    pub async fn roster(&self) -> Roster {
        self.state.lock().await.roster.clone()
    }

    pub async fn coordinator(&self) -> Option<SharedAgent> {
        self.state.lock().await.roster.coordinator().cloned()
    }

    /// Every step of the discussion so far
    pub async fn history(&self) -> Vec<Step> {
        self.state.lock().await.history.clone()
    }

    /// Forget the discussion, in the store and in memory
    pub async fn clear_history(&self) -> RegimeResult<()> {
        let mut state = self.state.lock().await;
        self.store.clear(&self.memory_id)?;
        state.history.clear();
        info!(memory_id = %self.memory_id, "History cleared");
        Ok(())
    }

    pub fn subscribe<F, Fut>(&self, event_type: EventType, listener: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.subscribe(event_type, listener);
    }

    /// Resolve on the next event of `event_type`
    pub fn wait_for(&self, event_type: EventType) -> impl Future<Output = EventResult<Value>> {
        self.events.wait_for(event_type)
    }

    pub fn register_event(&self, name: &str) -> EventResult<EventType> {
        self.events.register_custom(name)
    }

    /// Handle a request, streaming the answer.
    ///
    /// Requests are served one at a time in arrival order. Dropping the
    /// returned stream cancels the run at its next fragment.
    pub fn chat(self: &Arc<Self>, request: impl Into<String>) -> FragmentStream {
        let (sink, stream) = stream::channel(self.config.stream_capacity);
        let regime = Arc::clone(self);
        let request = request.into();
        tokio::spawn(async move { regime.run(request, sink).await });
        stream
    }

    /// `chat`, collected into a single string
    pub async fn ask(self: &Arc<Self>, request: impl Into<String>) -> RegimeResult<String> {
        self.chat(request).collect_text().await
    }

    async fn run(&self, request: String, mut sink: FragmentSink) {
        let mut state = self.state.lock().await;
        let mut task = Task::replay(request, state.history.clone());
        let mut persisted = task.steps().len();

        if let Err(e) = self
            .drive(&mut state, &mut task, &mut persisted, &mut sink)
            .await
        {
            error!(task_id = task.id(), error = %e, "Chat failed");
            if !task.status().is_terminal() {
                if let Err(status_err) = task.set_status(TaskStatus::Failed) {
                    warn!(task_id = task.id(), error = %status_err, "Could not mark task failed");
                }
            }
            self.events
                .publish(
                    Event::new(EventType::TaskFailed, format!("Task failed: {e}"))
                        .with_task(task.id())
                        .with_detail("error", e.to_string()),
                )
                .await;
            if sink.fail(e).await.is_err() {
                debug!(task_id = task.id(), "Receiver gone before the error was delivered");
            }
        }
    }

    async fn drive(
        &self,
        state: &mut RegimeState,
        task: &mut Task,
        persisted: &mut usize,
        sink: &mut FragmentSink,
    ) -> RegimeResult<()> {
        let request = task.request().to_string();
        task.record(StepKind::UserMessage {
            content: request.clone(),
        });
        task.set_status(TaskStatus::InProgress)?;
        self.persist(state, task, persisted)?;
        self.events
            .publish(
                Event::new(EventType::TaskStarted, "Task started")
                    .with_task(task.id())
                    .with_detail("request", request.clone()),
            )
            .await;

        let roster = state.roster.agents().to_vec();
        let selection = match self.chain.select(&roster, task).await {
            Ok(selection) => selection,
            Err(e) => {
                let clarification = e.clarification().to_string();
                task.record(StepKind::AssistantMessage {
                    content: clarification.clone(),
                });
                task.set_status(TaskStatus::Failed)?;
                self.persist(state, task, persisted)?;
                self.events
                    .publish(
                        Event::new(EventType::TaskFailed, e.to_string())
                            .with_task(task.id())
                            .with_detail("reason", e.reason())
                            .with_detail("clarification", clarification.clone()),
                    )
                    .await;
                if sink.send(clarification).await.is_err() {
                    debug!(task_id = task.id(), "Receiver gone before the clarification");
                }
                return Ok(());
            }
        };
        self.persist(state, task, persisted)?;

        let coordinator = selection.coordinator.name().to_string();
        let contributors = selection.contributor_names();
        if let Some(transfer) = state.roster.power_transfer(&coordinator, &contributors)? {
            task.record(StepKind::CoupDEtat {
                new_coordinator: transfer.coordinator.clone(),
                previous_coordinator: transfer.previous.clone(),
                contributors: transfer.contributors.clone(),
            });
            self.persist(state, task, persisted)?;
            self.events
                .publish(
                    Event::new(
                        EventType::CoupDEtat,
                        format!("{} has taken command", transfer.coordinator),
                    )
                    .with_task(task.id())
                    .with_agent(transfer.coordinator.clone())
                    .with_detail("previous_coordinator", json!(transfer.previous))
                    .with_detail("contributors", json!(transfer.contributors)),
                )
                .await;
        }

        let plan = if contributors.is_empty() {
            format!("{coordinator} is attempting to solve the task alone")
        } else {
            format!(
                "{coordinator} is attempting to solve the task with the help of: {}",
                contributors.join(", ")
            )
        };
        self.events
            .publish(
                Event::new(EventType::TaskUpdated, plan)
                    .with_task(task.id())
                    .with_agent(coordinator.clone())
                    .with_detail("contributors", json!(contributors)),
            )
            .await;

        let session = Session {
            coordinator: &selection.coordinator,
            contributors: &selection.contributors,
            runner: &self.runner,
        };
        let outcome = if selection.contributors.is_empty() {
            conversation::solo(&session, task, sink).await
        } else {
            self.protocol.converse(&session, task, sink).await
        };

        match outcome {
            Ok(()) => {
                let answer = sink.take_transcript();
                task.record(StepKind::AssistantMessage {
                    content: answer.clone(),
                });
                task.set_status(TaskStatus::Completed)?;
                self.persist(state, task, persisted)?;
                info!(task_id = task.id(), coordinator = %coordinator, chars = answer.len(), "Task completed");
                self.events
                    .publish(
                        Event::new(EventType::TaskCompleted, "Task completed")
                            .with_task(task.id())
                            .with_agent(coordinator)
                            .with_detail("result", answer),
                    )
                    .await;
                Ok(())
            }
            Err(ConversationError::Cancelled) => {
                warn!(task_id = task.id(), "Chat cancelled by the caller");
                task.set_status(TaskStatus::Failed)?;
                self.persist(state, task, persisted)?;
                self.events
                    .publish(
                        Event::new(EventType::TaskFailed, "Task cancelled")
                            .with_task(task.id())
                            .with_agent(coordinator),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                task.set_status(TaskStatus::Failed)?;
                self.persist(state, task, persisted)?;
                Err(RegimeError::Execution(e.to_string()))
            }
        }
    }

    /// Append the steps recorded since the last call
    fn persist(&self, state: &mut RegimeState, task: &Task, persisted: &mut usize) -> RegimeResult<()> {
        for step in task.steps_since(*persisted) {
            self.store.append(&self.memory_id, step)?;
            state.history.push(step.clone());
            *persisted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::oracle::{OracleError, ScriptedOracle};
    use futures::StreamExt;

    const PLAN: &str = r#"{"subtasks": [{"id": "1", "description": "Answer", "required_expertise": "law"}]}"#;
    const ENTIRE: &str = r#"{"result": "entire", "confidence": 0.9, "details": [{"capability": "law", "explanation": "core"}]}"#;

    fn agents() -> Vec<SharedAgent> {
        vec![
            Agent::new("Ada", "Accountant").with_capability("tax", "Taxes").shared(),
            Agent::new("Lex", "Lawyer").with_capability("law", "Contracts").shared(),
        ]
    }

    fn regime(oracle: ScriptedOracle) -> SharedRegime {
        Regime::new(RegimeConfig::default(), Arc::new(oracle), agents())
            .unwrap()
            .shared()
    }

    fn lex_only() -> ScriptedOracle {
        ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .on("Capability evaluation for Lex", ENTIRE)
            .on("Capability evaluation for Ada", r#"{"result": "none", "confidence": 0.0}"#)
    }

    #[tokio::test]
    async fn test_duplicate_agents_rejected() {
        let mut agents = agents();
        agents.push(Agent::new("Lex", "Another lawyer").shared());
        let err = Regime::new(RegimeConfig::default(), Arc::new(ScriptedOracle::new()), agents)
            .err()
            .unwrap();
        assert!(matches!(err, RegimeError::Roster(RosterError::DuplicateAgent(_))));
    }

    #[tokio::test]
    async fn test_same_coordinator_keeps_roster() {
        let regime = regime(lex_only().on("You are Lex", "The clause is enforceable."));

        assert_eq!(regime.ask("Is clause 4 enforceable?").await.unwrap(), "The clause is enforceable.");
        let names = regime.roster().await.names();
        assert_eq!(names, vec!["Lex", "Ada"]);

        regime.ask("And clause 5?").await.unwrap();
        assert_eq!(regime.roster().await.names(), names);

        let coups = regime
            .history()
            .await
            .iter()
            .filter(|s| s.step_type() == "coup_d_etat")
            .count();
        assert_eq!(coups, 1);
    }

    #[tokio::test]
    async fn test_second_request_sees_first_exchange() {
        let regime = regime(lex_only().on("You are Lex", "Yes."));
        regime.ask("First question").await.unwrap();
        regime.ask("Second question").await.unwrap();

        let history = regime.history().await;
        let request_ids: std::collections::BTreeSet<_> =
            history.iter().map(|s| s.request_id().to_string()).collect();
        assert_eq!(request_ids.len(), 2);
        assert_eq!(history[0].step_type(), "user_message");
        assert_eq!(history.last().unwrap().step_type(), "assistant_message");
    }

    #[tokio::test]
    async fn test_conversation_failure_ends_with_error_item() {
        let oracle = lex_only().fail_on("You are Lex", OracleError::Stream("connection reset".into()));
        let regime = regime(oracle);
        let failed = regime.wait_for(EventType::TaskFailed);

        let items: Vec<_> = regime.chat("Is clause 4 enforceable?").collect().await;
        assert!(matches!(items.last(), Some(Err(RegimeError::Execution(_)))));

        let payload = failed.await.unwrap();
        assert!(payload["message"].as_str().unwrap().contains("connection reset"));
        assert_eq!(regime.coordinator().await.unwrap().name(), "Lex");
    }

    #[tokio::test]
    async fn test_clear_history() {
        let regime = regime(lex_only().on("You are Lex", "Yes."));
        regime.ask("Question").await.unwrap();
        assert!(!regime.history().await.is_empty());

        regime.clear_history().await.unwrap();
        assert!(regime.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_cancels_quietly() {
        let regime = regime(lex_only().on("You are Lex", "A long answer split in many words"));
        let failed = regime.wait_for(EventType::TaskFailed);
        drop(regime.chat("Question"));

        let payload = failed.await.unwrap();
        assert_eq!(payload["message"], "Task cancelled");
        assert!(regime
            .history()
            .await
            .iter()
            .all(|s| s.step_type() != "assistant_message"));
    }
}
