//! Command-line front end for the regime
//!
//! Sends one request to a roster of agents and prints the streamed answer
//! on stdout. Logs and lifecycle events go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Roster from a file, oracle from REGIME_ORACLE_URL / REGIME_ORACLE_MODEL
//! regime --roster agents.toml "Is my non-compete clause enforceable?"
//!
//! # Persistent discussion
//! REGIME_STORE_DIR=./discussions regime --roster agents.toml --memory-id nc-review "And in Germany?"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

use regime::agent::Agent;
use regime::config::{RegimeConfig, RosterFile};
use regime::conversation::ProtocolKind;
use regime::events::EventType;
use regime::oracle::{HttpOracle, SharedOracle};
use regime::regime::Regime;
use regime::store::{InMemoryStepStore, JsonlStepStore, SharedStepStore};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; environment defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML roster file with one `[[agents]]` table per agent
    #[arg(long)]
    roster: PathBuf,

    /// Discussion to continue; a new one is started when omitted
    #[arg(long)]
    memory_id: Option<String>,

    /// Conversation protocol (overrides the configuration file)
    #[arg(long, value_enum)]
    protocol: Option<ProtocolKind>,

    /// Minimum combined coverage (overrides the configuration file)
    #[arg(long)]
    confidence_threshold: Option<f64>,

    /// Forget the stored discussion before sending the request
    #[arg(long, default_value_t = false)]
    clear_history: bool,

    /// Log lifecycle events
    #[arg(long, default_value_t = false)]
    events: bool,

    /// The request to resolve
    request: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("regime=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => RegimeConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RegimeConfig::default(),
    };
    if let Some(protocol) = args.protocol {
        config = config.with_protocol(protocol);
    }
    if let Some(threshold) = args.confidence_threshold {
        config = config.with_confidence_threshold(threshold);
    }
    config.validate().context("Invalid configuration")?;

    let agents = RosterFile::load(&args.roster)
        .with_context(|| format!("Failed to load roster from {}", args.roster.display()))?
        .into_agents()
        .into_iter()
        .map(Agent::shared)
        .collect();

    let oracle: SharedOracle =
        Arc::new(HttpOracle::new(config.oracle.clone()).context("Failed to create oracle client")?);

    let store: SharedStepStore = match &config.store_dir {
        Some(dir) => Arc::new(
            JsonlStepStore::open(dir)
                .with_context(|| format!("Failed to open step store at {}", dir.display()))?,
        ),
        None => Arc::new(InMemoryStepStore::new()),
    };
    let memory_id = args
        .memory_id
        .unwrap_or_else(|| format!("mem_{}", uuid::Uuid::new_v4().simple()));

    let regime = Regime::resume(config, oracle, agents, store, memory_id)
        .context("Failed to start regime")?
        .shared();

    if args.clear_history {
        regime.clear_history().await.context("Failed to clear history")?;
    }

    if args.events {
        for event_type in EventType::BUILTIN {
            regime.subscribe(event_type, |payload| async move {
                info!(event = %payload, "Regime event");
                Ok(())
            });
        }
    }

    let mut stdout = tokio::io::stdout();
    let mut fragments = regime.chat(args.request);
    while let Some(fragment) = fragments.next().await {
        let text = fragment.context("Request failed")?;
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;

    info!(memory_id = regime.memory_id(), "Discussion saved");
    Ok(())
}
