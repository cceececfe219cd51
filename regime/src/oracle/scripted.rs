//! In-process oracle driven by ordered pattern rules.
//!
//! Used by the test suite. A rule matches when its
//! pattern occurs in the system prompt or in the last message of the
//! request; the first matching rule wins.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Mutex;

use super::{
    CompletionRequest, OracleError, OracleReply, OracleResult, ReasoningOracle, Role, TextStream,
};

type Responder = Box<dyn Fn(&CompletionRequest) -> OracleResult<OracleReply> + Send + Sync>;

struct Rule {
    pattern: String,
    respond: Responder,
}

/// Oracle answering from a fixed script
pub struct ScriptedOracle {
    rules: Vec<Rule>,
    fallback: Option<Responder>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with fixed text when `pattern` matches
    pub fn on(self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        self.on_with(pattern, move |_| Ok(OracleReply::text(reply.clone())))
    }

    /// Fail with `error` when `pattern` matches
    pub fn fail_on(self, pattern: impl Into<String>, error: OracleError) -> Self {
        self.on_with(pattern, move |_| Err(error.clone()))
    }

    /// Compute the reply when `pattern` matches
    pub fn on_with<F>(mut self, pattern: impl Into<String>, respond: F) -> Self
    where
        F: Fn(&CompletionRequest) -> OracleResult<OracleReply> + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            pattern: pattern.into(),
            respond: Box::new(respond),
        });
        self
    }

    /// Reply used when no rule matches
    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        self.fallback = Some(Box::new(move |_| Ok(OracleReply::text(reply.clone()))));
        self
    }

    /// Every request received so far, oldest first
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn answer(&self, request: &CompletionRequest) -> OracleResult<OracleReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let rule = self
            .rules
            .iter()
            .find(|rule| system.contains(&rule.pattern) || last.contains(&rule.pattern));

        match (rule, &self.fallback) {
            (Some(rule), _) => (rule.respond)(request),
            (None, Some(fallback)) => fallback(request),
            (None, None) => Err(OracleError::Request(format!(
                "no scripted reply for: {}",
                last
            ))),
        }
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn complete(&self, request: CompletionRequest) -> OracleResult<OracleReply> {
        self.answer(&request)
    }

    async fn complete_streaming(&self, request: CompletionRequest) -> OracleResult<TextStream> {
        let reply = self.answer(&request)?;
        Ok(futures::stream::iter(split_fragments(&reply.content).into_iter().map(Ok)).boxed())
    }
}

/// Split text into word-sized fragments that concatenate back to the input
fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            fragments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}
