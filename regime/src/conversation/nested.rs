use async_trait::async_trait;

use super::{integrate, record_outcome, solicit, ConversationError, ConversationProtocol, ProtocolKind, Session};
use crate::prompts;
use crate::stream::FragmentSink;
use crate::task::Task;

/// Contributors are consulted one at a time, each seeing what the
/// previous ones said.
pub struct Nested;

fn with_running_context(message: String, contributions: &[(String, String)]) -> String {
    if contributions.is_empty() {
        return message;
    }
    let earlier = contributions
        .iter()
        .map(|(name, text)| format!("{name}: {text}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{message}\n\nYour colleagues have already answered:\n{earlier}")
}

#[async_trait]
impl ConversationProtocol for Nested {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Nested
    }

    async fn converse(
        &self,
        session: &Session<'_>,
        task: &mut Task,
        sink: &mut FragmentSink,
    ) -> Result<(), ConversationError> {
        let request = task.request().to_string();
        let mut contributions: Vec<(String, String)> = Vec::with_capacity(session.contributors.len());

        for contributor in session.contributors {
            let message = with_running_context(
                prompts::contributor_request(session.coordinator, contributor, &request),
                &contributions,
            );
            let outcome = solicit(session.runner, contributor, &message, task).await;
            let text = record_outcome(task, contributor.name(), "contribute", outcome);
            contributions.push((contributor.name().to_string(), text));
        }

        integrate(session, &contributions, task, sink).await
    }
}
