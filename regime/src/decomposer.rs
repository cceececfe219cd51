//! Task decomposition into ordered subtasks

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::oracle::{parse_json_reply, CompletionRequest, OracleError, SharedOracle};
use crate::prompts;
use crate::task::Task;

/// Errors from decomposition
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecompositionError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Decomposition produced no subtasks")]
    Empty,
}

/// What to do when the oracle returns an empty subtask list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionFallback {
    /// Treat the whole request as a single subtask
    #[default]
    WholeTask,
    /// Fail the selection
    Fail,
}

impl std::fmt::Display for DecompositionFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WholeTask => write!(f, "whole_task"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// One unit of a decomposed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_expertise: Option<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, required_expertise: Option<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            required_expertise,
        }
    }
}

#[derive(Deserialize)]
struct RawSubtask {
    #[serde(default)]
    id: Value,
    description: String,
    #[serde(default, alias = "required_expert")]
    required_expertise: Option<String>,
}

/// Splits a task into subtasks via the oracle
pub struct TaskDecomposer {
    oracle: SharedOracle,
    language: String,
    fallback: DecompositionFallback,
}

impl TaskDecomposer {
    pub fn new(oracle: SharedOracle, language: impl Into<String>, fallback: DecompositionFallback) -> Self {
        Self {
            oracle,
            language: language.into(),
            fallback,
        }
    }

    pub async fn decompose(&self, task: &Task) -> Result<Vec<Subtask>, DecompositionError> {
        let reply = self
            .oracle
            .complete(CompletionRequest::json(prompts::decomposition(task, &self.language)))
            .await?;
        let subtasks = parse_subtasks(&reply.content)?;

        if subtasks.is_empty() {
            warn!(task_id = task.id(), fallback = %self.fallback, "Empty decomposition");
            return match self.fallback {
                DecompositionFallback::WholeTask => {
                    Ok(vec![Subtask::new("1", task.request(), None)])
                }
                DecompositionFallback::Fail => Err(DecompositionError::Empty),
            };
        }

        info!(task_id = task.id(), subtasks = subtasks.len(), "Task decomposed");
        Ok(subtasks)
    }
}

/// Parse `{"subtasks": [...]}` or a bare array of subtasks
pub fn parse_subtasks(content: &str) -> Result<Vec<Subtask>, OracleError> {
    let value: Value = parse_json_reply(content)?;
    let list = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => map
            .remove("subtasks")
            .ok_or_else(|| OracleError::Parse("missing 'subtasks' field".into()))?,
        other => {
            return Err(OracleError::Parse(format!(
                "expected subtask object or array, got {}",
                other
            )))
        }
    };

    let raw: Vec<RawSubtask> =
        serde_json::from_value(list).map_err(|e| OracleError::Parse(e.to_string()))?;
    debug!(count = raw.len(), "Parsed subtasks");

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let id = match raw.id {
                Value::String(s) if !s.is_empty() => s,
                Value::Number(n) => n.to_string(),
                _ => (index + 1).to_string(),
            };
            Subtask {
                id,
                description: raw.description,
                required_expertise: raw.required_expertise.filter(|e| !e.is_empty()),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use std::sync::Arc;

    #[test]
    fn test_parse_subtasks_normalizes_ids() {
        let subtasks = parse_subtasks(
            r#"{"main_legal_issue": "lease", "subtasks": [
                {"id": 1, "description": "Read the lease", "required_expert": "contract_law"},
                {"description": "Estimate taxes", "required_expertise": ""}
            ]}"#,
        )
        .unwrap();

        assert_eq!(subtasks[0].id, "1");
        assert_eq!(subtasks[0].required_expertise.as_deref(), Some("contract_law"));
        assert_eq!(subtasks[1].id, "2");
        assert_eq!(subtasks[1].required_expertise, None);
    }

    #[test]
    fn test_parse_subtasks_malformed() {
        assert!(matches!(parse_subtasks("no json"), Err(OracleError::Parse(_))));
        assert!(matches!(parse_subtasks("{\"plan\": []}"), Err(OracleError::Parse(_))));
    }

    #[tokio::test]
    async fn test_empty_decomposition_fallback_policies() {
        let oracle = Arc::new(ScriptedOracle::new().otherwise("{\"subtasks\": []}"));
        let task = Task::new("Review my lease");

        let whole = TaskDecomposer::new(oracle.clone(), "en", DecompositionFallback::WholeTask);
        let subtasks = whole.decompose(&task).await.unwrap();
        assert_eq!(subtasks, vec![Subtask::new("1", "Review my lease", None)]);

        let strict = TaskDecomposer::new(oracle, "en", DecompositionFallback::Fail);
        assert!(matches!(
            strict.decompose(&task).await,
            Err(DecompositionError::Empty)
        ));
    }
}
