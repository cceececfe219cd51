//! Regime configuration
//!
//! Loaded from a TOML file, with environment variables supplying defaults
//! for anything the file leaves out:
//!
//! ```toml
//! language = "en"
//! confidence_threshold = 0.6
//! protocol = "broadcast"
//! decomposition_fallback = "whole_task"
//!
//! [oracle]
//! base_url = "http://localhost:8080/v1"
//! model = "gpt-4o-mini"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::agent::{Agent, Capability};
use crate::conversation::ProtocolKind;
use crate::decomposer::DecompositionFallback;
use crate::oracle::OracleConfig;

/// Default minimum team coverage for a selection to stand
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Errors loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level regime configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Language code agents answer in
    pub language: String,
    /// Minimum combined coverage in [0, 1]
    pub confidence_threshold: f64,
    pub protocol: ProtocolKind,
    pub decomposition_fallback: DecompositionFallback,
    /// Upper bound on tool-call rounds per answer
    pub max_tool_rounds: usize,
    /// Capacity of the fragment channel returned by `chat`
    pub stream_capacity: usize,
    /// Directory of the JSON-lines step store; in-memory when unset
    pub store_dir: Option<PathBuf>,
    pub oracle: OracleConfig,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            language: std::env::var("REGIME_LANGUAGE").unwrap_or_else(|_| "en".into()),
            confidence_threshold: std::env::var("REGIME_CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            protocol: ProtocolKind::default(),
            decomposition_fallback: DecompositionFallback::default(),
            max_tool_rounds: 8,
            stream_capacity: 64,
            store_dir: std::env::var("REGIME_STORE_DIR").ok().map(PathBuf::from),
            oracle: OracleConfig::default(),
        }
    }
}

impl RegimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.stream_capacity == 0 {
            return Err(ConfigError::Invalid("stream_capacity must be positive".into()));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_decomposition_fallback(mut self, fallback: DecompositionFallback) -> Self {
        self.decomposition_fallback = fallback;
        self
    }
}

/// Agent declaration in a roster file
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl AgentSpec {
    pub fn into_agent(self) -> Agent {
        Agent::new(self.name, self.description).with_capabilities(self.capabilities)
    }
}

/// Roster file: an ordered list of `[[agents]]` tables
#[derive(Debug, Clone, Deserialize)]
pub struct RosterFile {
    pub agents: Vec<AgentSpec>,
}

impl RosterFile {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn into_agents(self) -> Vec<Agent> {
        self.agents.into_iter().map(AgentSpec::into_agent).collect()
    }
}
