//! Ordered roster with a single coordinator

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::agent::SharedAgent;

/// Errors from roster construction and power transfer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Agent not in roster: {0}")]
    UnknownAgent(String),
}

/// Role an agent currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Contributor,
    Idle,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Contributor => write!(f, "contributor"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Outcome of a power transfer that changed the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerTransfer {
    pub previous: Option<String>,
    pub coordinator: String,
    pub contributors: Vec<String>,
}

/// Agents in order, with the coordinator (if any) at position 0 followed by
/// the contributors of the latest resolution.
#[derive(Debug, Clone)]
pub struct Roster {
    agents: Vec<SharedAgent>,
    roles: HashMap<String, Role>,
}

impl Roster {
    pub fn new(agents: Vec<SharedAgent>) -> Result<Self, RosterError> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.name().to_string()) {
                return Err(RosterError::DuplicateAgent(agent.name().to_string()));
            }
        }
        let roles = agents
            .iter()
            .map(|a| (a.name().to_string(), Role::Idle))
            .collect();
        Ok(Self { agents, roles })
    }

    pub fn agents(&self) -> &[SharedAgent] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn role_of(&self, name: &str) -> Option<Role> {
        self.roles.get(name).copied()
    }

    pub fn coordinator(&self) -> Option<&SharedAgent> {
        self.agents
            .first()
            .filter(|a| self.role_of(a.name()) == Some(Role::Coordinator))
    }

    pub fn contributors(&self) -> Vec<&SharedAgent> {
        self.agents
            .iter()
            .filter(|a| self.role_of(a.name()) == Some(Role::Contributor))
            .collect()
    }

    /// Hand the coordinator role to `coordinator`, with `contributors`
    /// placed right after it in the given order.
    ///
    /// Re-selecting the current coordinator changes nothing and returns
    /// `None`.
    pub fn power_transfer(
        &mut self,
        coordinator: &str,
        contributors: &[String],
    ) -> Result<Option<PowerTransfer>, RosterError> {
        if self.coordinator().map(|c| c.name()) == Some(coordinator) {
            return Ok(None);
        }
        for name in std::iter::once(coordinator).chain(contributors.iter().map(String::as_str)) {
            if !self.roles.contains_key(name) {
                return Err(RosterError::UnknownAgent(name.to_string()));
            }
        }

        let previous = self.coordinator().map(|c| c.name().to_string());

        let mut front: Vec<&str> = vec![coordinator];
        for name in contributors {
            if !front.contains(&name.as_str()) {
                front.push(name);
            }
        }
        let mut reordered: Vec<SharedAgent> = front
            .iter()
            .filter_map(|name| self.agents.iter().find(|a| a.name() == *name).cloned())
            .collect();
        reordered.extend(
            self.agents
                .iter()
                .filter(|a| !front.contains(&a.name()))
                .cloned(),
        );

        let contributors: Vec<String> = front[1..].iter().map(|s| s.to_string()).collect();
        for role in self.roles.values_mut() {
            *role = Role::Idle;
        }
        self.roles.insert(coordinator.to_string(), Role::Coordinator);
        for name in &contributors {
            self.roles.insert(name.clone(), Role::Contributor);
        }
        self.agents = reordered;

        info!(
            coordinator,
            previous = previous.as_deref().unwrap_or("none"),
            contributors = contributors.len(),
            "Power transferred"
        );
        Ok(Some(PowerTransfer {
            previous,
            coordinator: coordinator.to_string(),
            contributors,
        }))
    }
}
