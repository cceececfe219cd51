use async_trait::async_trait;
use tracing::warn;

use super::{record_outcome, solicit, ConversationError, ConversationProtocol, ProtocolKind, Session};
use crate::prompts;
use crate::stream::FragmentSink;
use crate::task::{StepKind, Task};

/// The coordinator drafts, then each contributor in turn refines the
/// previous version. The last refinement is streamed.
pub struct Sequential;

#[async_trait]
impl ConversationProtocol for Sequential {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Sequential
    }

    async fn converse(
        &self,
        session: &Session<'_>,
        task: &mut Task,
        sink: &mut FragmentSink,
    ) -> Result<(), ConversationError> {
        let request = task.request().to_string();
        let Some((last, middle)) = session.contributors.split_last() else {
            return super::solo(session, task, sink).await;
        };

        let draft = session
            .runner
            .respond(session.coordinator, &request, task)
            .await?;
        draft.record_tool_runs(session.coordinator.name(), task);
        task.record(StepKind::Action {
            agent: session.coordinator.name().to_string(),
            action: "draft".into(),
            result: draft.content.clone(),
        });
        let mut current = draft.content;
        let mut author = session.coordinator.name().to_string();

        for contributor in middle {
            let message = prompts::refinement(&request, &author, &current, contributor);
            match solicit(session.runner, contributor, &message, task).await {
                Ok(reply) => {
                    current = record_outcome(task, contributor.name(), "refine", Ok(reply));
                    author = contributor.name().to_string();
                }
                // Keep the previous draft
                Err(failure) => {
                    record_outcome(task, contributor.name(), "refine", Err(failure));
                }
            }
        }

        let message = prompts::refinement(&request, &author, &current, last);
        match session.runner.solve(last, &message, task, sink).await {
            Ok(reply) => {
                reply.record_tool_runs(last.name(), task);
                Ok(())
            }
            Err(ConversationError::Oracle(e)) if sink.transcript().is_empty() => {
                warn!(agent = last.name(), error = %e, "Final refinement failed, streaming previous draft");
                task.record(StepKind::Action {
                    agent: last.name().to_string(),
                    action: "refine_failed".into(),
                    result: e.to_string(),
                });
                sink.send(current)
                    .await
                    .map_err(|_| ConversationError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }
}
