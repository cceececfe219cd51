//! Capability evaluation of agents against decomposed subtasks

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::{Agent, CapabilityUse, SharedAgent};
use crate::decomposer::Subtask;
use crate::oracle::{parse_json_reply, CompletionRequest, OracleError, OracleResult, SharedOracle};
use crate::prompts;
use crate::task::Task;

/// How much of the work an agent believes it can cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Entire,
    Partial,
    None,
}

impl Verdict {
    /// Parse the oracle's wording, accepting common variants
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "entire" | "entirely" | "full" | "fully" => Some(Self::Entire),
            "partial" | "partially" => Some(Self::Partial),
            "none" | "no" | "not" => Some(Self::None),
            _ => None,
        }
    }

    pub fn qualifies(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entire => write!(f, "entire"),
            Self::Partial => write!(f, "partial"),
            Self::None => write!(f, "none"),
        }
    }
}

/// A capability the agent claims for specific subtasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityClaim {
    pub capability: String,
    pub explanation: String,
    /// Subtask ids this capability covers; empty means unspecified
    pub subtasks: Vec<String>,
}

impl From<&CapabilityClaim> for CapabilityUse {
    fn from(claim: &CapabilityClaim) -> Self {
        CapabilityUse {
            capability: claim.capability.clone(),
            explanation: claim.explanation.clone(),
        }
    }
}

/// Result of evaluating one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub confidence: f64,
    pub details: Vec<CapabilityClaim>,
}

impl Evaluation {
    /// Capability tags credited to the agent.
    ///
    /// Falls back to the agent's declared tags when the oracle listed none.
    pub fn credited_capabilities(&self, agent: &Agent) -> Vec<String> {
        let mut credited: Vec<String> = Vec::new();
        for claim in &self.details {
            if !credited.contains(&claim.capability) {
                credited.push(claim.capability.clone());
            }
        }
        if credited.is_empty() {
            credited = agent.capability_tags();
        }
        credited
    }

    /// Subtasks the claims point at, or every subtask when none are named
    pub fn claimed_subtasks(&self, subtasks: &[Subtask]) -> Vec<Subtask> {
        let named: Vec<&str> = self
            .details
            .iter()
            .flat_map(|c| c.subtasks.iter().map(String::as_str))
            .collect();
        if named.is_empty() {
            return subtasks.to_vec();
        }
        subtasks
            .iter()
            .filter(|s| named.contains(&s.id.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Deserialize)]
struct RawEvaluation {
    #[serde(alias = "verdict")]
    result: String,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    details: Vec<RawClaim>,
}

#[derive(Deserialize)]
struct RawClaim {
    #[serde(alias = "name")]
    capability: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    subtasks: Vec<Value>,
}

/// Parse a strict-JSON evaluation reply
pub fn parse_evaluation(content: &str) -> OracleResult<Evaluation> {
    let raw: RawEvaluation = parse_json_reply(content)?;

    let verdict = Verdict::parse(&raw.result)
        .ok_or_else(|| OracleError::Parse(format!("unknown verdict '{}'", raw.result)))?;

    let confidence = match &raw.confidence {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .ok_or_else(|| OracleError::Parse(format!("invalid confidence {}", raw.confidence)))?;

    if !(0.0..=1.0).contains(&confidence) {
        warn!(confidence, "Confidence outside [0, 1], clamping");
    }

    let details = raw
        .details
        .into_iter()
        .map(|claim| CapabilityClaim {
            capability: claim.capability,
            explanation: claim.explanation,
            subtasks: claim
                .subtasks
                .into_iter()
                .filter_map(|id| match id {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        })
        .collect();

    Ok(Evaluation {
        verdict,
        confidence: confidence.clamp(0.0, 1.0),
        details,
    })
}

/// Asks the oracle how well each agent fits a set of subtasks
pub struct CapabilityEvaluator {
    oracle: SharedOracle,
    language: String,
}

impl CapabilityEvaluator {
    pub fn new(oracle: SharedOracle, language: impl Into<String>) -> Self {
        Self {
            oracle,
            language: language.into(),
        }
    }

    pub async fn evaluate(&self, agent: &Agent, subtasks: &[Subtask], task: &Task) -> OracleResult<Evaluation> {
        let reply = self
            .oracle
            .complete(CompletionRequest::json(prompts::evaluation(
                agent,
                subtasks,
                task,
                &self.language,
            )))
            .await?;
        let evaluation = parse_evaluation(&reply.content)?;
        debug!(
            agent = agent.name(),
            verdict = %evaluation.verdict,
            confidence = evaluation.confidence,
            "Agent evaluated"
        );
        Ok(evaluation)
    }

    /// Evaluate every agent concurrently, one result per agent in input order.
    ///
    /// A failed evaluation never cancels the others.
    pub async fn evaluate_all(
        &self,
        agents: &[SharedAgent],
        subtasks: &[Subtask],
        task: &Task,
    ) -> Vec<(SharedAgent, OracleResult<Evaluation>)> {
        let results = join_all(
            agents
                .iter()
                .map(|agent| self.evaluate(agent, subtasks, task)),
        )
        .await;

        agents.iter().cloned().zip(results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use std::sync::Arc;

    #[test]
    fn test_parse_lenient_evaluation() {
        let evaluation = parse_evaluation(
            r#"{"result": "Partially", "confidence": "0.55",
                "details": [{"capability": "tax", "explanation": "VAT", "subtasks": [2]}]}"#,
        )
        .unwrap();
        assert_eq!(evaluation.verdict, Verdict::Partial);
        assert!((evaluation.confidence - 0.55).abs() < 1e-9);
        assert_eq!(evaluation.details[0].subtasks, vec!["2"]);
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let evaluation = parse_evaluation(r#"{"result": "entirely", "confidence": 1.7}"#).unwrap();
        assert_eq!(evaluation.confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_unknown_verdict() {
        let err = parse_evaluation(r#"{"result": "maybe", "confidence": 0.5}"#).unwrap_err();
        assert!(matches!(err, OracleError::Parse(_)));
    }

    #[test]
    fn test_credited_capabilities_fall_back_to_declared() {
        let agent = Agent::new("Lex", "Lawyer").with_capability("contract_law", "Contracts");
        let evaluation = Evaluation {
            verdict: Verdict::Entire,
            confidence: 0.9,
            details: vec![],
        };
        assert_eq!(evaluation.credited_capabilities(&agent), vec!["contract_law"]);

        let subtasks = vec![Subtask::new("1", "a", None), Subtask::new("2", "b", None)];
        assert_eq!(evaluation.claimed_subtasks(&subtasks).len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_reply_does_not_abort_siblings() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .on("Capability evaluation for Lex", r#"{"result": "entire", "confidence": 0.9}"#)
                .on("Capability evaluation for Bob", "I am not sure, sorry."),
        );
        let evaluator = CapabilityEvaluator::new(oracle, "en");
        let agents = vec![
            Agent::new("Bob", "Builder").shared(),
            Agent::new("Lex", "Lawyer").shared(),
        ];
        let subtasks = vec![Subtask::new("1", "Review", None)];

        let results = evaluator
            .evaluate_all(&agents, &subtasks, &Task::new("Review my lease"))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.name(), "Bob");
        assert!(matches!(results[0].1, Err(OracleError::Parse(_))));
        assert_eq!(results[1].1.as_ref().unwrap().verdict, Verdict::Entire);
    }
}
