use async_trait::async_trait;

use super::{integrate, record_outcome, solicit, ConversationError, ConversationProtocol, ProtocolKind, Session};
use crate::prompts;
use crate::stream::FragmentSink;
use crate::task::Task;

/// Coordinator and a single contributor exchange one message each.
pub struct Pairwise;

#[async_trait]
impl ConversationProtocol for Pairwise {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Pairwise
    }

    async fn converse(
        &self,
        session: &Session<'_>,
        task: &mut Task,
        sink: &mut FragmentSink,
    ) -> Result<(), ConversationError> {
        let [contributor] = session.contributors else {
            return Err(ConversationError::ContributorCount {
                protocol: ProtocolKind::Pairwise,
                expected: 1,
                actual: session.contributors.len(),
            });
        };

        let message = prompts::contributor_request(session.coordinator, contributor, task.request());
        let outcome = solicit(session.runner, contributor, &message, task).await;
        let text = record_outcome(task, contributor.name(), "reply", outcome);

        integrate(session, &[(contributor.name().to_string(), text)], task, sink).await
    }
}
