//! Drives an agent through the oracle: prompting, the tool-call loop and
//! streamed answers.

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Agent, Assignment};
use crate::conversation::ConversationError;
use crate::oracle::{CompletionRequest, Message, OracleResult, SharedOracle};
use crate::prompts;
use crate::stream::FragmentSink;
use crate::task::{StepKind, Task};

/// One tool invocation made while an agent was answering
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRun {
    pub tool_name: String,
    pub arguments: Value,
    pub output: Value,
    pub success: bool,
}

impl ToolRun {
    pub fn into_step(self, agent: &str) -> StepKind {
        StepKind::ToolExecution {
            agent: agent.to_string(),
            tool_name: self.tool_name,
            arguments: self.arguments,
            output: self.output,
            success: self.success,
        }
    }
}

/// Full answer of an agent and the tools it used on the way
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub content: String,
    pub tool_runs: Vec<ToolRun>,
}

impl Reply {
    /// Record the tool runs on the task as steps attributed to `agent`
    pub fn record_tool_runs(&self, agent: &str, task: &mut Task) {
        for run in &self.tool_runs {
            task.record(run.clone().into_step(agent));
        }
    }
}

/// Runs agents against the shared oracle
#[derive(Clone)]
pub struct AgentRunner {
    oracle: SharedOracle,
    language: String,
    max_tool_rounds: usize,
}

impl AgentRunner {
    pub fn new(oracle: SharedOracle, language: impl Into<String>, max_tool_rounds: usize) -> Self {
        Self {
            oracle,
            language: language.into(),
            max_tool_rounds,
        }
    }

    pub fn oracle(&self) -> &SharedOracle {
        &self.oracle
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn conversation(&self, agent: &Agent, task: &Task, prompt: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(prompts::agent_system(agent, &self.language))];
        messages.extend(prompts::history(task));
        messages.push(Message::user(prompt));
        messages
    }

    /// Let the agent call tools until it answers in plain text.
    ///
    /// Returns the plain answer when one was produced within the round
    /// budget. Tool results are appended to `messages` as `tool` entries
    /// correlated by call id.
    async fn tool_loop(
        &self,
        agent: &Agent,
        messages: &mut Vec<Message>,
        runs: &mut Vec<ToolRun>,
    ) -> OracleResult<Option<String>> {
        if agent.tools().is_empty() {
            return Ok(None);
        }
        let catalog = agent.tools().catalog();

        for round in 0..self.max_tool_rounds {
            let reply = self
                .oracle
                .complete(CompletionRequest::new(messages.clone()).with_tools(catalog.clone()))
                .await?;
            if reply.tool_calls.is_empty() {
                return Ok(Some(reply.content));
            }

            debug!(agent = agent.name(), round, calls = reply.tool_calls.len(), "Tool calls requested");
            messages.push(Message::assistant_tool_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            for call in reply.tool_calls {
                let (output, success) = match agent
                    .tools()
                    .execute(&call.name, call.arguments.clone())
                    .await
                {
                    Ok(result) => (json!({ "result": result }), true),
                    Err(e) => {
                        warn!(agent = agent.name(), tool = %call.name, error = %e, "Tool call failed");
                        (json!({ "error": e.to_string() }), false)
                    }
                };
                messages.push(Message::tool_result(call.id.clone(), output.to_string()));
                runs.push(ToolRun {
                    tool_name: call.name,
                    arguments: call.arguments,
                    output,
                    success,
                });
            }
        }

        warn!(
            agent = agent.name(),
            max_rounds = self.max_tool_rounds,
            "Tool round budget exhausted"
        );
        Ok(None)
    }

    /// Non-streamed answer to a single message
    pub async fn respond(&self, assignment: &Assignment, message: &str, task: &Task) -> OracleResult<Reply> {
        let agent = assignment.agent();
        let mut messages = self.conversation(agent, task, message);
        let mut tool_runs = Vec::new();

        if let Some(content) = self.tool_loop(agent, &mut messages, &mut tool_runs).await? {
            return Ok(Reply { content, tool_runs });
        }
        let reply = self.oracle.complete(CompletionRequest::new(messages)).await?;
        Ok(Reply {
            content: reply.content,
            tool_runs,
        })
    }

    /// Streamed answer to `prompt`, forwarded fragment by fragment to `sink`
    pub async fn solve(
        &self,
        assignment: &Assignment,
        prompt: &str,
        task: &Task,
        sink: &mut FragmentSink,
    ) -> Result<Reply, ConversationError> {
        let agent = assignment.agent();
        let mut messages = self.conversation(agent, task, prompt);
        let mut tool_runs = Vec::new();

        // An answer produced during the tool loop is final; only when the
        // loop gave none is a streamed completion requested.
        if let Some(content) = self.tool_loop(agent, &mut messages, &mut tool_runs).await? {
            sink.send(content.clone())
                .await
                .map_err(|_| ConversationError::Cancelled)?;
            debug!(agent = agent.name(), chars = content.len(), "Answer forwarded from tool loop");
            return Ok(Reply { content, tool_runs });
        }

        let mut fragments = self
            .oracle
            .complete_streaming(CompletionRequest::new(messages))
            .await?;
        let mut content = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            content.push_str(&fragment);
            sink.send(fragment)
                .await
                .map_err(|_| ConversationError::Cancelled)?;
        }

        debug!(agent = agent.name(), chars = content.len(), "Answer streamed");
        Ok(Reply { content, tool_runs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Tool;
    use crate::oracle::{OracleReply, ScriptedOracle, ToolCall};
    use crate::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn assignment(agent: Agent) -> Assignment {
        Assignment::new(agent.shared(), vec![], vec![], 0.9, 0.9)
    }

    #[tokio::test]
    async fn test_respond_without_tools() {
        let oracle = Arc::new(ScriptedOracle::new().otherwise("Clause 4 is void."));
        let runner = AgentRunner::new(oracle.clone(), "en", 4);
        let task = Task::new("Check clause 4");

        let reply = runner
            .respond(&assignment(Agent::new("Lex", "Lawyer")), "Check clause 4", &task)
            .await
            .unwrap();
        assert_eq!(reply.content, "Clause 4 is void.");
        assert!(reply.tool_runs.is_empty());
        assert!(oracle.calls()[0].messages[0].content.contains("You are Lex"));
    }

    #[tokio::test]
    async fn test_tool_loop_reinjects_results() {
        let round = Arc::new(AtomicUsize::new(0));
        let counter = round.clone();
        let oracle = Arc::new(ScriptedOracle::new().on_with("You are Lex", move |request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(OracleReply {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        id: "call_1".into(),
                        name: "lookup_article".into(),
                        arguments: json!({"article": 1101}),
                    }],
                })
            } else {
                let tool_msg = request.messages.last().unwrap();
                assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
                Ok(OracleReply::text(format!("Based on {}", tool_msg.content)))
            }
        }));

        let agent = Agent::new("Lex", "Lawyer").with_tool(
            Tool::from_fn(
                "lookup_article",
                "Fetch an article",
                json!({"type": "object", "properties": {"article": {"type": "integer"}}}),
                |args| async move { Ok(json!(format!("text of {}", args["article"]))) },
            )
            .unwrap(),
        );

        let runner = AgentRunner::new(oracle, "en", 4);
        let reply = runner
            .respond(&assignment(agent), "What does article 1101 say?", &Task::new("q"))
            .await
            .unwrap();

        assert_eq!(reply.content, "Based on {\"result\":\"text of 1101\"}");
        assert_eq!(reply.tool_runs.len(), 1);
        assert!(reply.tool_runs[0].success);
        assert_eq!(round.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_solve_streams_to_sink() {
        let oracle = Arc::new(ScriptedOracle::new().otherwise("The contract is enforceable."));
        let runner = AgentRunner::new(oracle, "en", 4);
        let (mut sink, stream) = stream::channel(64);

        let reply = runner
            .solve(&assignment(Agent::new("Ada", "Generalist")), "Is it enforceable?", &Task::new("q"), &mut sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(reply.content, "The contract is enforceable.");
        assert_eq!(stream.collect_text().await.unwrap(), "The contract is enforceable.");
    }

    #[tokio::test]
    async fn test_solve_reports_cancellation() {
        let oracle = Arc::new(ScriptedOracle::new().otherwise("Some long answer"));
        let runner = AgentRunner::new(oracle, "en", 4);
        let (mut sink, stream) = stream::channel(1);
        drop(stream);

        let err = runner
            .solve(&assignment(Agent::new("Ada", "Generalist")), "q", &Task::new("q"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Cancelled));
    }

    #[tokio::test]
    async fn test_solve_forwards_tool_loop_answer_without_second_call() {
        let oracle = Arc::new(ScriptedOracle::new().otherwise("Article 1101 defines a contract."));
        let agent = Agent::new("Lex", "Lawyer").with_tool(
            Tool::from_fn(
                "lookup_article",
                "Fetch an article",
                json!({"type": "object"}),
                |_| async move { Ok(json!("unused")) },
            )
            .unwrap(),
        );
        let runner = AgentRunner::new(oracle.clone(), "en", 4);
        let (mut sink, stream) = stream::channel(64);

        let reply = runner
            .solve(&assignment(agent), "What is article 1101?", &Task::new("q"), &mut sink)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(oracle.calls().len(), 1);
        assert!(!oracle.calls()[0].tools.is_empty());
        assert_eq!(reply.content, "Article 1101 defines a contract.");
        assert!(reply.tool_runs.is_empty());
        assert_eq!(stream.collect_text().await.unwrap(), "Article 1101 defines a contract.");
    }
}
