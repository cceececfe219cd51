//! Agents, their capabilities and tools
//!
//! ```text
//!   Arc<Agent> ──shared by──▶ Roster (role bookkeeping)
//!        │
//!        └──wrapped by──▶ Assignment (subtasks, capabilities used, confidence)
//!                              │
//!                              └──driven by──▶ AgentRunner (prompts, tool loop, streaming)
//! ```
//!
//! Agents are immutable once built; everything that changes per request
//! lives in the [`Assignment`] wrapping them or in the roster.

pub mod assignment;
pub mod runner;
pub mod tool;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use assignment::{Assignment, CapabilityUse};
pub use runner::{AgentRunner, Reply, ToolRun};
pub use tool::{Tool, ToolError, ToolHandler, ToolRegistry, ToolResult};

/// Shared reference to an agent
pub type SharedAgent = Arc<Agent>;

/// A declared area of expertise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub tag: String,
    pub description: String,
}

impl Capability {
    pub fn new(tag: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            description: description.into(),
        }
    }
}

/// A capability-tagged participant of the regime
#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    description: String,
    capabilities: Vec<Capability>,
    tools: ToolRegistry,
}

impl Agent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
            tools: ToolRegistry::new(),
        }
    }

    pub fn with_capability(mut self, tag: impl Into<String>, description: impl Into<String>) -> Self {
        self.capabilities.push(Capability::new(tag, description));
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn shared(self) -> SharedAgent {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn capability_tags(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.tag.clone()).collect()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Capabilities rendered as a bullet list for prompts
    pub fn capability_summary(&self) -> String {
        self.capabilities
            .iter()
            .map(|c| format!("- {}: {}", c.tag, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
