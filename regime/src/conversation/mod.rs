//! Conversation protocols
//!
//! Once a coordinator and its contributors are chosen, a protocol decides
//! how they talk and streams the coordinator's final resolution:
//!
//! | protocol   | contributors        | contributor input                          |
//! |------------|---------------------|--------------------------------------------|
//! | broadcast  | any, concurrently   | own assignment only                        |
//! | nested     | any, one at a time  | own assignment + earlier replies           |
//! | sequential | any, in order       | previous draft to refine                   |
//! | pairwise   | exactly one         | own assignment, one message each way       |
//!
//! A contributor that fails is replaced by an error marker in the
//! aggregate; only coordinator failures abort the conversation.

mod broadcast;
mod nested;
mod pairwise;
mod sequential;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use broadcast::Broadcast;
pub use nested::Nested;
pub use pairwise::Pairwise;
pub use sequential::Sequential;

use crate::agent::{AgentRunner, Assignment, Reply};
use crate::oracle::OracleError;
use crate::stream::FragmentSink;
use crate::task::{StepKind, Task};

/// Errors that abort a conversation
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConversationError {
    #[error("The {protocol} protocol needs exactly {expected} contributor(s), got {actual}")]
    ContributorCount {
        protocol: ProtocolKind,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Conversation cancelled by the receiver")]
    Cancelled,
}

/// A contributor that could not be reached. Contained, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorFailure {
    pub agent: String,
    pub reason: String,
}

impl ContributorFailure {
    /// Marker text standing in for the missing contribution
    pub fn marker(&self) -> String {
        format!("[contributor {} unavailable: {}]", self.agent, self.reason)
    }
}

impl std::fmt::Display for ContributorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.marker())
    }
}

/// Which protocol to run
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    Broadcast,
    Nested,
    Sequential,
    Pairwise,
}

impl ProtocolKind {
    pub fn protocol(self) -> Box<dyn ConversationProtocol> {
        match self {
            Self::Broadcast => Box::new(Broadcast),
            Self::Nested => Box::new(Nested),
            Self::Sequential => Box::new(Sequential),
            Self::Pairwise => Box::new(Pairwise),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Nested => write!(f, "nested"),
            Self::Sequential => write!(f, "sequential"),
            Self::Pairwise => write!(f, "pairwise"),
        }
    }
}

/// Participants of one conversation
pub struct Session<'a> {
    pub coordinator: &'a Assignment,
    pub contributors: &'a [Assignment],
    pub runner: &'a AgentRunner,
}

/// Strategy for aggregating contributor output into the final answer
#[async_trait]
pub trait ConversationProtocol: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Run the conversation, streaming the final resolution into `sink`
    async fn converse(
        &self,
        session: &Session<'_>,
        task: &mut Task,
        sink: &mut FragmentSink,
    ) -> Result<(), ConversationError>;
}

/// The coordinator answers on its own
pub async fn solo(session: &Session<'_>, task: &mut Task, sink: &mut FragmentSink) -> Result<(), ConversationError> {
    let request = task.request().to_string();
    let reply = session
        .runner
        .solve(session.coordinator, &request, task, sink)
        .await?;
    reply.record_tool_runs(session.coordinator.name(), task);
    Ok(())
}

/// Send one message to a contributor, containing any failure
async fn solicit(
    runner: &AgentRunner,
    contributor: &Assignment,
    message: &str,
    task: &Task,
) -> Result<Reply, ContributorFailure> {
    runner
        .respond(contributor, message, task)
        .await
        .map_err(|e| {
            warn!(agent = contributor.name(), error = %e, "Contributor unavailable");
            ContributorFailure {
                agent: contributor.name().to_string(),
                reason: e.to_string(),
            }
        })
}

/// Record a contributor outcome and return the text to aggregate
fn record_outcome(task: &mut Task, agent: &str, action: &str, outcome: Result<Reply, ContributorFailure>) -> String {
    match outcome {
        Ok(reply) => {
            reply.record_tool_runs(agent, task);
            task.record(StepKind::Action {
                agent: agent.to_string(),
                action: action.to_string(),
                result: reply.content.clone(),
            });
            reply.content
        }
        Err(failure) => {
            let marker = failure.marker();
            task.record(StepKind::Action {
                agent: agent.to_string(),
                action: format!("{action}_failed"),
                result: marker.clone(),
            });
            marker
        }
    }
}

/// Coordinator streams the final answer from the gathered contributions
async fn integrate(
    session: &Session<'_>,
    contributions: &[(String, String)],
    task: &mut Task,
    sink: &mut FragmentSink,
) -> Result<(), ConversationError> {
    let prompt = crate::prompts::integration(task.request(), contributions);
    let reply = session
        .runner
        .solve(session.coordinator, &prompt, task, sink)
        .await?;
    reply.record_tool_runs(session.coordinator.name(), task);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_marker() {
        let failure = ContributorFailure {
            agent: "Bob".into(),
            reason: "timeout".into(),
        };
        assert_eq!(failure.to_string(), "[contributor Bob unavailable: timeout]");
    }

    #[test]
    fn test_protocol_kind_round_trip_names() {
        for kind in [
            ProtocolKind::Broadcast,
            ProtocolKind::Nested,
            ProtocolKind::Sequential,
            ProtocolKind::Pairwise,
        ] {
            assert_eq!(kind.protocol().kind(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
