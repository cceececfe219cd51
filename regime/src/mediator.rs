//! Fallback agent that turns a failed selection into a clarification request

use tracing::{info, warn};

use crate::oracle::{CompletionRequest, SharedOracle};
use crate::prompts;
use crate::task::Task;

/// Used when the oracle cannot produce a clarification either
pub const FALLBACK_CLARIFICATION: &str = "None of the available agents could take on this request. \
Could you rephrase it, narrow it down, or add the details that matter most?";

pub struct Mediator {
    oracle: SharedOracle,
    language: String,
}

impl Mediator {
    pub fn new(oracle: SharedOracle, language: impl Into<String>) -> Self {
        Self {
            oracle,
            language: language.into(),
        }
    }

    /// Ask the user for what the team needs to proceed. Never fails.
    pub async fn clarify(&self, task: &Task, reason: &str) -> String {
        let request = CompletionRequest::new(prompts::mediator(task, reason, &self.language));
        match self.oracle.complete(request).await {
            Ok(reply) if !reply.content.trim().is_empty() => {
                info!(task_id = task.id(), "Clarification requested from user");
                reply.content
            }
            Ok(_) => FALLBACK_CLARIFICATION.to_string(),
            Err(e) => {
                warn!(task_id = task.id(), error = %e, "Mediator unavailable, using fallback clarification");
                FALLBACK_CLARIFICATION.to_string()
            }
        }
    }
}
