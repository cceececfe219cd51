//! Immutable step records.
//!
//! Every decision taken while resolving a task is captured as a [`Step`].
//! Steps serialize to flat JSON objects discriminated by `step_type`, which
//! is also the format step stores persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Metadata;

/// What happened at a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    UserMessage {
        content: String,
    },
    AssistantMessage {
        content: String,
    },
    /// Decomposition of the request into subtasks
    #[serde(rename = "planning_step")]
    Planning {
        subtasks: Value,
    },
    GeneralSelection {
        coordinator: String,
        selected: Vec<String>,
    },
    /// One agent's capability evaluation, or the reason it failed
    GeneralEvaluation {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evaluation: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolExecution {
        agent: String,
        tool_name: String,
        arguments: Value,
        output: Value,
        success: bool,
    },
    CoupDEtat {
        new_coordinator: String,
        previous_coordinator: Option<String>,
        contributors: Vec<String>,
    },
    Action {
        agent: String,
        action: String,
        result: String,
    },
}

impl StepKind {
    /// Wire name of the step type
    pub fn step_type(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::Planning { .. } => "planning_step",
            Self::GeneralSelection { .. } => "general_selection",
            Self::GeneralEvaluation { .. } => "general_evaluation",
            Self::ToolExecution { .. } => "tool_execution",
            Self::CoupDEtat { .. } => "coup_d_etat",
            Self::Action { .. } => "action",
        }
    }
}

/// A recorded step. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    request_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(flatten)]
    kind: StepKind,
}

impl Step {
    pub fn new(request_id: impl Into<String>, kind: StepKind, metadata: Metadata) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            metadata,
            kind,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn step_type(&self) -> &'static str {
        self.kind.step_type()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_serializes_flat_with_discriminator() {
        let mut metadata = Metadata::new();
        metadata.insert("phase".into(), json!("selection"));
        let step = Step::new(
            "req_1",
            StepKind::CoupDEtat {
                new_coordinator: "Lex".into(),
                previous_coordinator: Some("Ada".into()),
                contributors: vec!["Tax".into()],
            },
            metadata,
        );

        let value: Value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["step_type"], "coup_d_etat");
        assert_eq!(value["request_id"], "req_1");
        assert_eq!(value["metadata"]["phase"], "selection");
        assert_eq!(value["new_coordinator"], "Lex");
        assert_eq!(step.step_type(), "coup_d_etat");
    }

    #[test]
    fn test_planning_step_wire_name() {
        let step = Step::new(
            "req_2",
            StepKind::Planning {
                subtasks: json!([{"id": "1", "description": "read"}]),
            },
            Metadata::new(),
        );
        let json = step.to_json().unwrap();
        assert!(json.contains("\"step_type\":\"planning_step\""));

        let parsed = Step::from_json(&json).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_evaluation_error_omits_evaluation() {
        let kind = StepKind::GeneralEvaluation {
            agent: "Ada".into(),
            evaluation: None,
            error: Some("timeout".into()),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert!(value.get("evaluation").is_none());
        assert_eq!(value["error"], "timeout");
    }
}
