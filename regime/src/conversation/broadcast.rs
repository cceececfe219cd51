use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use super::{integrate, record_outcome, solicit, ConversationError, ConversationProtocol, ProtocolKind, Session};
use crate::prompts;
use crate::stream::FragmentSink;
use crate::task::Task;

/// All contributors are asked at once; the coordinator integrates after
/// every reply (or failure marker) is in.
pub struct Broadcast;

#[async_trait]
impl ConversationProtocol for Broadcast {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Broadcast
    }

    async fn converse(
        &self,
        session: &Session<'_>,
        task: &mut Task,
        sink: &mut FragmentSink,
    ) -> Result<(), ConversationError> {
        let request = task.request().to_string();
        let outcomes = {
            let snapshot: &Task = task;
            join_all(session.contributors.iter().map(|contributor| {
                let message = prompts::contributor_request(session.coordinator, contributor, &request);
                async move { solicit(session.runner, contributor, &message, snapshot).await }
            }))
            .await
        };

        let contributions: Vec<(String, String)> = session
            .contributors
            .iter()
            .zip(outcomes)
            .map(|(contributor, outcome)| {
                let text = record_outcome(task, contributor.name(), "contribute", outcome);
                (contributor.name().to_string(), text)
            })
            .collect();
        debug!(contributors = contributions.len(), "Broadcast replies gathered");

        integrate(session, &contributions, task, sink).await
    }
}
