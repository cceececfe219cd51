//! Command chain: choosing who resolves a task
//!
//! ```text
//!   Task ──▶ TaskDecomposer ──▶ subtasks ──▶ PlanningStep
//!                                  │
//!                                  ▼
//!          CapabilityEvaluator (all agents, concurrently, strict join)
//!                                  │            └──▶ GeneralEvaluationStep per agent
//!                                  ▼
//!          keep entire|partial ──▶ scoring::score ──▶ team coverage ≥ threshold?
//!                                  │                          │ no
//!                                  ▼                          ▼
//!          rank ──▶ coordinator + contributors       NoCapableAgent + clarification
//!                   (GeneralSelectionStep)
//! ```

pub mod scoring;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{Assignment, CapabilityUse, SharedAgent};
use crate::config::RegimeConfig;
use crate::decomposer::{DecompositionError, Subtask, TaskDecomposer};
use crate::evaluator::{CapabilityEvaluator, Evaluation};
use crate::mediator::Mediator;
use crate::oracle::SharedOracle;
use crate::task::{StepKind, Task};

/// Errors from agent selection.
///
/// Every variant carries the clarification request produced by the
/// mediator for the user.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("No capable agent: {reason}")]
    NoCapableAgent { reason: String, clarification: String },

    #[error("Task execution failed: {reason}")]
    TaskExecution { reason: String, clarification: String },

    #[error("Subtask decomposition failed: {reason}")]
    Decomposition { reason: String, clarification: String },
}

impl ChainError {
    pub fn clarification(&self) -> &str {
        match self {
            Self::NoCapableAgent { clarification, .. }
            | Self::TaskExecution { clarification, .. }
            | Self::Decomposition { clarification, .. } => clarification,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::NoCapableAgent { reason, .. }
            | Self::TaskExecution { reason, .. }
            | Self::Decomposition { reason, .. } => reason,
        }
    }
}

/// Selection failure before the mediator has weighed in
#[derive(Debug)]
enum Failure {
    NoCapableAgent(String),
    TaskExecution(String),
    Decomposition(String),
}

impl Failure {
    fn reason(&self) -> &str {
        match self {
            Self::NoCapableAgent(r) | Self::TaskExecution(r) | Self::Decomposition(r) => r,
        }
    }

    fn with_clarification(self, clarification: String) -> ChainError {
        match self {
            Self::NoCapableAgent(reason) => ChainError::NoCapableAgent {
                reason,
                clarification,
            },
            Self::TaskExecution(reason) => ChainError::TaskExecution {
                reason,
                clarification,
            },
            Self::Decomposition(reason) => ChainError::Decomposition {
                reason,
                clarification,
            },
        }
    }
}

/// Outcome of a successful selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub coordinator: Assignment,
    /// Remaining qualifying agents, best score first
    pub contributors: Vec<Assignment>,
    pub team_coverage: f64,
    pub subtasks: Vec<Subtask>,
}

impl Selection {
    pub fn contributor_names(&self) -> Vec<String> {
        self.contributors.iter().map(|c| c.name().to_string()).collect()
    }
}

/// Selects a coordinator and contributors for a task
pub struct CommandChain {
    decomposer: TaskDecomposer,
    evaluator: CapabilityEvaluator,
    mediator: Mediator,
    confidence_threshold: f64,
}

impl CommandChain {
    pub fn new(oracle: SharedOracle, config: &RegimeConfig) -> Self {
        Self {
            decomposer: TaskDecomposer::new(
                oracle.clone(),
                config.language.clone(),
                config.decomposition_fallback,
            ),
            evaluator: CapabilityEvaluator::new(oracle.clone(), config.language.clone()),
            mediator: Mediator::new(oracle, config.language.clone()),
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Pick the coordinator and contributors, annotating `task` with the
    /// planning, evaluation and selection steps.
    pub async fn select(&self, roster: &[SharedAgent], task: &mut Task) -> Result<Selection, ChainError> {
        match self.resolve(roster, task).await {
            Ok(selection) => Ok(selection),
            Err(failure) => {
                warn!(task_id = task.id(), reason = failure.reason(), "Selection failed");
                let clarification = self.mediator.clarify(task, failure.reason()).await;
                Err(failure.with_clarification(clarification))
            }
        }
    }

    async fn resolve(&self, roster: &[SharedAgent], task: &mut Task) -> Result<Selection, Failure> {
        if roster.is_empty() {
            return Err(Failure::NoCapableAgent("the roster is empty".into()));
        }

        let subtasks = match self.decomposer.decompose(task).await {
            Ok(subtasks) => subtasks,
            Err(DecompositionError::Oracle(e)) => return Err(Failure::TaskExecution(e.to_string())),
            Err(e @ DecompositionError::Empty) => return Err(Failure::Decomposition(e.to_string())),
        };
        let planned = serde_json::to_value(&subtasks)
            .map_err(|e| Failure::TaskExecution(format!("Failed to record subtasks: {e}")))?;
        task.record(StepKind::Planning { subtasks: planned });

        let results = self.evaluator.evaluate_all(roster, &subtasks, task).await;

        let mut first_error = None;
        let mut failures = 0usize;
        let mut qualifying: Vec<(SharedAgent, Evaluation)> = Vec::new();
        for (agent, result) in results {
            match result {
                Ok(evaluation) => {
                    task.record(StepKind::GeneralEvaluation {
                        agent: agent.name().to_string(),
                        evaluation: serde_json::to_value(&evaluation).ok(),
                        error: None,
                    });
                    if evaluation.verdict.qualifies() {
                        qualifying.push((agent, evaluation));
                    }
                }
                Err(e) => {
                    warn!(agent = agent.name(), error = %e, "Capability evaluation failed");
                    task.record(StepKind::GeneralEvaluation {
                        agent: agent.name().to_string(),
                        evaluation: None,
                        error: Some(e.to_string()),
                    });
                    failures += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        if qualifying.is_empty() {
            if let Some(e) = first_error.filter(|_| failures == roster.len()) {
                return Err(Failure::TaskExecution(e.to_string()));
            }
            return Err(Failure::NoCapableAgent(
                "no agent reported the capabilities this task needs".into(),
            ));
        }

        let credited: Vec<(f64, Vec<String>)> = qualifying
            .iter()
            .map(|(agent, evaluation)| (evaluation.confidence, evaluation.credited_capabilities(agent)))
            .collect();
        let scores = scoring::score(&credited);

        if scores.team_coverage < self.confidence_threshold {
            return Err(Failure::NoCapableAgent(format!(
                "combined coverage {:.2} is below the confidence threshold {:.2}",
                scores.team_coverage, self.confidence_threshold
            )));
        }

        let mut assignments: Vec<Assignment> = scoring::rank(&scores.per_agent)
            .into_iter()
            .map(|index| {
                let (agent, evaluation) = &qualifying[index];
                let capabilities_used = if evaluation.details.is_empty() {
                    credited[index]
                        .1
                        .iter()
                        .map(|tag| CapabilityUse {
                            capability: tag.clone(),
                            explanation: String::new(),
                        })
                        .collect()
                } else {
                    evaluation.details.iter().map(CapabilityUse::from).collect()
                };
                Assignment::new(
                    agent.clone(),
                    evaluation.claimed_subtasks(&subtasks),
                    capabilities_used,
                    evaluation.confidence,
                    scores.per_agent[index],
                )
            })
            .collect();

        let coordinator = assignments.remove(0);
        let selection = Selection {
            coordinator,
            contributors: assignments,
            team_coverage: scores.team_coverage,
            subtasks,
        };

        let mut selected = vec![selection.coordinator.name().to_string()];
        selected.extend(selection.contributor_names());
        task.record(StepKind::GeneralSelection {
            coordinator: selection.coordinator.name().to_string(),
            selected,
        });
        let contributions: Vec<Value> = std::iter::once(&selection.coordinator)
            .chain(selection.contributors.iter())
            .map(Assignment::to_summary)
            .collect();
        task.set_metadata("general_contributions", Value::Array(contributions));
        task.set_metadata("team_coverage", json!(selection.team_coverage));

        info!(
            task_id = task.id(),
            coordinator = selection.coordinator.name(),
            contributors = selection.contributors.len(),
            team_coverage = selection.team_coverage,
            "Agents selected"
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::oracle::{OracleError, ScriptedOracle};
    use std::sync::Arc;

    const PLAN: &str = r#"{"subtasks": [
        {"id": "1", "description": "Assess the lease", "required_expertise": "x"},
        {"id": "2", "description": "Assess the taxes", "required_expertise": "y"}
    ]}"#;

    fn chain(oracle: ScriptedOracle) -> CommandChain {
        CommandChain::new(Arc::new(oracle), &RegimeConfig::default().with_confidence_threshold(0.6))
    }

    fn roster() -> Vec<SharedAgent> {
        vec![
            Agent::new("Ada", "Generalist").with_capability("x", "X work").shared(),
            Agent::new("Bob", "Specialist").with_capability("y", "Y work").shared(),
        ]
    }

    #[tokio::test]
    async fn test_threshold_gates_selection() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .on(
                "Capability evaluation for Ada",
                r#"{"result": "partial", "confidence": 0.3, "details": [{"capability": "x", "explanation": "some"}]}"#,
            )
            .on("Capability evaluation for Bob", r#"{"result": "none", "confidence": 0.1}"#)
            .on("Clarification needed", "Please tell me more.");

        let mut task = Task::new("Review my lease and taxes");
        let err = chain(oracle).select(&roster(), &mut task).await.unwrap_err();

        assert!(matches!(err, ChainError::NoCapableAgent { .. }));
        assert_eq!(err.clarification(), "Please tell me more.");
        assert!(err.reason().contains("0.30"));
        // planning + two evaluations
        assert_eq!(task.steps().len(), 3);
    }

    #[tokio::test]
    async fn test_lone_agent_listing_many_capabilities_is_gated_on_own_confidence() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .on(
                "Capability evaluation for Ada",
                r#"{"result": "partial", "confidence": 0.3, "details": [
                    {"capability": "x", "explanation": "lease"},
                    {"capability": "y", "explanation": "taxes"}
                ]}"#,
            )
            .on("Clarification needed", "Who else could help?");

        let roster = vec![Agent::new("Ada", "Generalist")
            .with_capability("x", "X work")
            .with_capability("y", "Y work")
            .shared()];
        let mut task = Task::new("Review my lease and taxes");
        let err = chain(oracle).select(&roster, &mut task).await.unwrap_err();

        assert!(matches!(err, ChainError::NoCapableAgent { .. }));
        assert!(err.reason().contains("0.30"));
        assert!(task.get_metadata("general_contributions").is_none());
    }

    #[tokio::test]
    async fn test_empty_roster_is_no_capable_agent() {
        let oracle = Arc::new(ScriptedOracle::new().on("Clarification needed", "Please add an agent."));
        let chain = CommandChain::new(oracle.clone(), &RegimeConfig::default());

        let mut task = Task::new("Anything");
        let err = chain.select(&[], &mut task).await.unwrap_err();

        assert!(matches!(err, ChainError::NoCapableAgent { .. }));
        assert_eq!(err.clarification(), "Please add an agent.");
        // Only the mediator was consulted
        assert_eq!(oracle.calls().len(), 1);
        assert!(task.steps().is_empty());
    }

    #[tokio::test]
    async fn test_complementary_agents_selected_together() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .on(
                "Capability evaluation for Ada",
                r#"{"result": "partial", "confidence": 0.5, "details": [{"capability": "x", "explanation": "lease", "subtasks": ["1"]}]}"#,
            )
            .on(
                "Capability evaluation for Bob",
                r#"{"result": "partial", "confidence": 0.4, "details": [{"capability": "y", "explanation": "tax", "subtasks": ["2"]}]}"#,
            );

        let mut task = Task::new("Review my lease and taxes");
        let selection = chain(oracle).select(&roster(), &mut task).await.unwrap();

        assert_eq!(selection.coordinator.name(), "Ada");
        assert_eq!(selection.contributor_names(), vec!["Bob"]);
        assert!(selection.team_coverage >= 0.6);
        assert_eq!(selection.contributors[0].subtasks()[0].id, "2");

        let kinds: Vec<_> = task.steps().iter().map(|s| s.step_type()).collect();
        assert_eq!(
            kinds,
            vec!["planning_step", "general_evaluation", "general_evaluation", "general_selection"]
        );
        assert_eq!(task.get_metadata("general_contributions").unwrap()[1]["agent"], "Bob");
    }

    #[tokio::test]
    async fn test_ties_keep_roster_order() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .on(
                "Capability evaluation for Ada",
                r#"{"result": "entire", "confidence": 0.8, "details": [{"capability": "x", "explanation": ""}]}"#,
            )
            .on(
                "Capability evaluation for Bob",
                r#"{"result": "entire", "confidence": 0.8, "details": [{"capability": "y", "explanation": ""}]}"#,
            );

        let mut task = Task::new("q");
        let roster = roster();
        let selection = chain(oracle).select(&roster, &mut task).await.unwrap();
        assert_eq!(selection.coordinator.name(), "Ada");

        let reversed: Vec<_> = roster.into_iter().rev().collect();
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .otherwise(r#"{"result": "entire", "confidence": 0.8, "details": [{"capability": "z", "explanation": ""}]}"#);
        let selection = chain(oracle).select(&reversed, &mut Task::new("q")).await.unwrap();
        assert_eq!(selection.coordinator.name(), "Bob");
    }

    #[tokio::test]
    async fn test_all_evaluations_failing_is_task_execution() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", PLAN)
            .fail_on("Capability evaluation", OracleError::Request("timeout".into()))
            .on("Clarification needed", "Try again later.");

        let err = chain(oracle).select(&roster(), &mut Task::new("q")).await.unwrap_err();
        assert!(matches!(err, ChainError::TaskExecution { .. }));
        assert_eq!(err.clarification(), "Try again later.");
    }

    #[tokio::test]
    async fn test_decomposition_failure_is_wrapped() {
        let oracle = ScriptedOracle::new()
            .on("Request to decompose", "not json at all")
            .on("Clarification needed", "Could you rephrase?");

        let mut task = Task::new("q");
        let err = chain(oracle).select(&roster(), &mut task).await.unwrap_err();
        assert!(matches!(err, ChainError::TaskExecution { .. }));
        assert!(task.steps().is_empty());
    }
}
