//! Task record and its lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::step::{Step, StepKind};

/// Default priority for new tasks
pub const DEFAULT_PRIORITY: i32 = 5;

/// Free-form metadata attached to tasks and steps.
///
/// Values are plain JSON, so nothing executable can ever be stored here.
pub type Metadata = Map<String, Value>;

/// Errors from task bookkeeping
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Metadata value for '{key}' is not serializable: {reason}")]
    UnserializableMetadata { key: String, reason: String },

    #[error("Metadata key not found: {0}")]
    MissingMetadata(String),
}

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether a move from `self` to `next` is allowed
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work submitted by the user.
///
/// The step log is append-only: steps can be recorded but never removed or
/// reordered, and the log is only exposed as a slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: String,
    request: String,
    request_id: String,
    steps: Vec<Step>,
    metadata: Metadata,
    priority: i32,
    status: TaskStatus,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Create a fresh task for a request
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: request.into(),
            request_id: new_request_id(),
            steps: Vec::new(),
            metadata: Metadata::new(),
            priority: DEFAULT_PRIORITY,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a task for a returning discussion.
    ///
    /// `history` is replayed in order ahead of any step recorded for the new
    /// request.
    pub fn replay(request: impl Into<String>, history: Vec<Step>) -> Self {
        let mut task = Self::new(request);
        task.steps = history;
        task
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    /// Correlation id shared by every step recorded for this request
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps recorded after the first `offset` entries
    pub fn steps_since(&self, offset: usize) -> &[Step] {
        self.steps.get(offset..).unwrap_or(&[])
    }

    /// Steps belonging to one request, in recording order
    pub fn steps_for_request<'a>(&'a self, request_id: &'a str) -> impl Iterator<Item = &'a Step> {
        self.steps
            .iter()
            .filter(move |step| step.request_id() == request_id)
    }

    /// Record a new step under the current request id
    pub fn record(&mut self, kind: StepKind) -> &Step {
        self.record_with_metadata(kind, Metadata::new())
    }

    pub fn record_with_metadata(&mut self, kind: StepKind, metadata: Metadata) -> &Step {
        let step = Step::new(self.request_id.clone(), kind, metadata);
        self.push_step(step)
    }

    /// Append an already-built step
    pub fn push_step(&mut self, step: Step) -> &Step {
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    /// Move to a new status, rejecting transitions the lifecycle forbids
    pub fn set_status(&mut self, next: TaskStatus) -> TaskResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Insert or replace a metadata entry
    pub fn add_metadata<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> TaskResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| TaskError::UnserializableMetadata {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.metadata.insert(key, value);
        Ok(())
    }

    /// Insert a value that is already JSON; nothing left to serialize
    pub(crate) fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn remove_metadata(&mut self, key: &str) -> TaskResult<Value> {
        self.metadata
            .remove(key)
            .ok_or_else(|| TaskError::MissingMetadata(key.to_string()))
    }

    /// User and assistant messages from earlier requests, oldest first.
    ///
    /// Used as conversation context when prompting agents.
    pub fn conversation(&self) -> Vec<(&'static str, &str)> {
        self.steps
            .iter()
            .filter(|step| step.request_id() != self.request_id)
            .filter_map(|step| match step.kind() {
                StepKind::UserMessage { content } => Some(("user", content.as_str())),
                StepKind::AssistantMessage { content } => Some(("assistant", content.as_str())),
                _ => None,
            })
            .collect()
    }
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("draft a contract");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.priority(), DEFAULT_PRIORITY);
        assert!(task.steps().is_empty());
        assert!(task.request_id().starts_with("req_"));
    }

    #[test]
    fn test_status_transitions() {
        let mut task = Task::new("x");
        assert!(task.set_status(TaskStatus::Completed).is_err());
        task.set_status(TaskStatus::InProgress).unwrap();
        task.set_status(TaskStatus::Completed).unwrap();

        let err = task.set_status(TaskStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::Failed
            }
        ));
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut task = Task::new("x");
        task.set_status(TaskStatus::Failed).unwrap();
        assert!(task.status().is_terminal());
    }

    #[test]
    fn test_metadata_add_and_remove() {
        let mut task = Task::new("x");
        task.add_metadata("source", "cli").unwrap();
        task.add_metadata("source", "api").unwrap();
        assert_eq!(task.get_metadata("source"), Some(&Value::from("api")));

        assert_eq!(task.remove_metadata("source").unwrap(), Value::from("api"));
        assert!(matches!(
            task.remove_metadata("source"),
            Err(TaskError::MissingMetadata(_))
        ));
    }

    #[test]
    fn test_metadata_rejects_unserializable_values() {
        // JSON object keys must be strings
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], "v");

        let mut task = Task::new("x");
        let err = task.add_metadata("bad", bad).unwrap_err();
        assert!(matches!(err, TaskError::UnserializableMetadata { .. }));
        assert!(task.get_metadata("bad").is_none());
    }

    #[test]
    fn test_steps_are_appended_in_order() {
        let mut task = Task::new("x");
        task.record(StepKind::UserMessage { content: "a".into() });
        task.record(StepKind::AssistantMessage { content: "b".into() });
        task.record(StepKind::UserMessage { content: "c".into() });

        let contents: Vec<_> = task
            .steps()
            .iter()
            .map(|s| match s.kind() {
                StepKind::UserMessage { content } | StepKind::AssistantMessage { content } => {
                    content.clone()
                }
                _ => String::new(),
            })
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert!(task.steps().windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    }

    #[test]
    fn test_replay_keeps_history_as_context() {
        let mut first = Task::new("first");
        first.record(StepKind::UserMessage { content: "first".into() });
        first.record(StepKind::AssistantMessage { content: "answer".into() });

        let mut second = Task::replay("second", first.steps().to_vec());
        second.record(StepKind::UserMessage { content: "second".into() });

        assert_eq!(second.steps().len(), 3);
        assert_eq!(second.steps_since(2).len(), 1);
        assert_eq!(
            second.conversation(),
            vec![("user", "first"), ("assistant", "answer")]
        );
        assert_eq!(second.steps_for_request(first.request_id()).count(), 2);
    }
}
