//! Prompt construction for every oracle interaction

use crate::agent::{Agent, Assignment};
use crate::decomposer::Subtask;
use crate::oracle::Message;
use crate::task::Task;

const DECOMPOSITION_SYSTEM: &str = r#"You are the planning officer of a team of expert agents.
Break down the user request into subtasks that can each be handled by a single expert.

Respond with a JSON object only:
{
  "subtasks": [
    {"id": "1", "description": "...", "required_expertise": "..."}
  ]
}"#;

const EVALUATION_INSTRUCTIONS: &str = r#"Assess honestly whether your capabilities cover the subtasks below.

Respond with a JSON object only:
{
  "result": "entire" | "partial" | "none",
  "confidence": <number between 0 and 1>,
  "details": [
    {"capability": "<one of your capability tags>", "explanation": "...", "subtasks": ["<subtask id>"]}
  ]
}"#;

const MEDIATOR_SYSTEM: &str = r#"You are the mediator of a team of expert agents.
The team could not take on the user's request. Explain briefly why, then ask the
user the precise questions or details needed to make the request actionable.
Do not attempt to answer the request yourself."#;

fn language_line(language: &str) -> String {
    format!("Always answer in the language with code '{language}'.")
}

fn subtask_list(subtasks: &[Subtask]) -> String {
    subtasks
        .iter()
        .map(|s| match &s.required_expertise {
            Some(expertise) => format!("- [{}] {} (expertise: {})", s.id, s.description, expertise),
            None => format!("- [{}] {}", s.id, s.description),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Earlier turns of the discussion as oracle messages
pub fn history(task: &Task) -> Vec<Message> {
    task.conversation()
        .into_iter()
        .map(|(role, content)| match role {
            "assistant" => Message::assistant(content),
            _ => Message::user(content),
        })
        .collect()
}

/// Persona prompt for an agent answering as itself
pub fn agent_system(agent: &Agent, language: &str) -> String {
    format!(
        "You are {}. {}\n\nYour capabilities:\n{}\n\n{}",
        agent.name(),
        agent.description(),
        agent.capability_summary(),
        language_line(language)
    )
}

pub fn decomposition(task: &Task, language: &str) -> Vec<Message> {
    let mut messages = vec![Message::system(format!(
        "{}\n\n{}",
        DECOMPOSITION_SYSTEM,
        language_line(language)
    ))];
    messages.extend(history(task));
    messages.push(Message::user(format!("Request to decompose:\n{}", task.request())));
    messages
}

pub fn evaluation(agent: &Agent, subtasks: &[Subtask], task: &Task, language: &str) -> Vec<Message> {
    vec![
        Message::system(agent_system(agent, language)),
        Message::user(format!(
            "Capability evaluation for {}.\n\nRequest: {}\n\nSubtasks:\n{}\n\n{}",
            agent.name(),
            task.request(),
            subtask_list(subtasks),
            EVALUATION_INSTRUCTIONS
        )),
    ]
}

/// Message the coordinator sends to one contributor.
///
/// Only the contributor's own assignment is included.
pub fn contributor_request(coordinator: &Assignment, contributor: &Assignment, request: &str) -> String {
    let mut message = format!(
        "I am {}, and I have selected you, {}, to assist with the task: '{}'. \
         You have been chosen based on the following capabilities:\n{}",
        coordinator.name(),
        contributor.name(),
        request,
        contributor.capabilities_summary()
    );
    if !contributor.subtasks().is_empty() {
        message.push_str("\n\nFocus on these subtasks:\n");
        message.push_str(&contributor.subtasks_summary());
    }
    message.push_str("\n\nReply with your contribution only.");
    message
}

/// Final integration request for the coordinator
pub fn integration(request: &str, contributions: &[(String, String)]) -> String {
    if contributions.is_empty() {
        return request.to_string();
    }
    let listed = contributions
        .iter()
        .map(|(name, text)| format!("### {}\n{}", name, text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Task: {}\n\nContributions from your team:\n\n{}\n\n\
         Integrate these contributions with your own expertise and give the final answer.",
        request, listed
    )
}

/// Refinement request used by the sequential protocol
pub fn refinement(request: &str, author: &str, draft: &str, assignment: &Assignment) -> String {
    format!(
        "Task: {}\n\nCurrent answer drafted by {}:\n{}\n\n\
         Refine and correct this answer using your capabilities:\n{}\n\n\
         Reply with the complete improved answer.",
        request,
        author,
        draft,
        assignment.capabilities_summary()
    )
}

pub fn mediator(task: &Task, reason: &str, language: &str) -> Vec<Message> {
    let mut messages = vec![Message::system(format!(
        "{}\n\n{}",
        MEDIATOR_SYSTEM,
        language_line(language)
    ))];
    messages.extend(history(task));
    messages.push(Message::user(format!(
        "Clarification needed for request: {}\nReason the team could not proceed: {}",
        task.request(),
        reason
    )));
    messages
}
