//! Per-request decoration of an agent

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Agent, SharedAgent};
use crate::decomposer::Subtask;

/// A capability the evaluator credited to an agent for this task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityUse {
    pub capability: String,
    #[serde(default)]
    pub explanation: String,
}

/// An agent selected for a request, with what it was selected for.
///
/// The base agent is reached explicitly through [`Assignment::agent`];
/// nothing is forwarded implicitly.
#[derive(Debug, Clone)]
pub struct Assignment {
    agent: SharedAgent,
    subtasks: Vec<Subtask>,
    capabilities_used: Vec<CapabilityUse>,
    confidence: f64,
    contribution_score: f64,
}

impl Assignment {
    pub fn new(
        agent: SharedAgent,
        subtasks: Vec<Subtask>,
        capabilities_used: Vec<CapabilityUse>,
        confidence: f64,
        contribution_score: f64,
    ) -> Self {
        Self {
            agent,
            subtasks,
            capabilities_used,
            confidence: confidence.clamp(0.0, 1.0),
            contribution_score,
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn shared_agent(&self) -> &SharedAgent {
        &self.agent
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn capabilities_used(&self) -> &[CapabilityUse] {
        &self.capabilities_used
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn contribution_score(&self) -> f64 {
        self.contribution_score
    }

    /// Bullet list of the capabilities this agent was chosen for
    pub fn capabilities_summary(&self) -> String {
        if self.capabilities_used.is_empty() {
            return self.agent.capability_summary();
        }
        self.capabilities_used
            .iter()
            .map(|c| {
                if c.explanation.is_empty() {
                    format!("- {}", c.capability)
                } else {
                    format!("- {}: {}", c.capability, c.explanation)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Bullet list of the assigned subtasks
    pub fn subtasks_summary(&self) -> String {
        self.subtasks
            .iter()
            .map(|s| format!("- [{}] {}", s.id, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// JSON summary recorded in task metadata
    pub fn to_summary(&self) -> Value {
        json!({
            "agent": self.name(),
            "confidence": self.confidence,
            "contribution_score": self.contribution_score,
            "capabilities": self
                .capabilities_used
                .iter()
                .map(|c| c.capability.as_str())
                .collect::<Vec<_>>(),
            "subtasks": self.subtasks.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        })
    }
}
