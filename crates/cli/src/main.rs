//! Cortex command-line front end.
//!
//! Usage:
//!   cortex --config cortex.toml execute "what is 2+2?" --user u1 --session s1
//!   cortex --seed memory.json execute "what did we discuss?" --user u1 --session s1
//!   cortex classify "fetch https://example.com"
//!   cortex classify-batch queries.json --concurrency 8
//!   cortex tools
//!
//! # Environment Variables
//!
//! - `CORTEX_CONFIG` - Path to the TOML configuration file
//! - `RUST_LOG` - Log filter (default: info,cortex_coordinator=debug)

mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use cortex_common::{ClassifyHints, ExecuteOptions, ResponseDetail};
use cortex_coordinator::{BatchEntry, CoordinatorConfig, Orchestrator};
use cortex_memory::{build_embedder, InMemoryEpisodicStore, InMemorySemanticStore};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::seed::SeedFile;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Agent orchestration core")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file of memory records to load before running.
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query through the full pipeline.
    Execute {
        query: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        session: String,

        /// Skip memory retrieval.
        #[arg(long)]
        no_memory: bool,

        /// Force an intent instead of classifying.
        #[arg(long)]
        hint: Option<String>,

        /// Run independent tools concurrently.
        #[arg(long)]
        parallel_tools: bool,

        #[arg(long, value_enum, default_value = "full")]
        detail: Detail,

        /// Maximum memory records in the context.
        #[arg(long)]
        max_memory: Option<usize>,

        /// Model override for every completion.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Tool arguments as a JSON object keyed by tool name.
        #[arg(long)]
        tool_args: Option<String>,

        /// Leave the intent's reasoning out of the result.
        #[arg(long)]
        no_reasoning: bool,
    },

    /// Classify a query without executing it.
    Classify {
        query: String,

        /// Caller context as a JSON object.
        #[arg(long)]
        user_context: Option<String>,
    },

    /// Classify every query in a JSON file.
    ClassifyBatch {
        /// JSON array of strings or `{"query", "hints"}` objects.
        file: PathBuf,

        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// List the registered tools.
    Tools,
}

#[derive(Clone, Copy, ValueEnum)]
enum Detail {
    Full,
    Summary,
    Minimal,
}

impl From<Detail> for ResponseDetail {
    fn from(detail: Detail) -> Self {
        match detail {
            Detail::Full => ResponseDetail::Full,
            Detail::Summary => ResponseDetail::Summary,
            Detail::Minimal => ResponseDetail::Minimal,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchLine {
    Query(String),
    Entry(BatchEntry),
}

impl From<BatchLine> for BatchEntry {
    fn from(line: BatchLine) -> Self {
        match line {
            BatchLine::Query(query) => BatchEntry::new(query),
            BatchLine::Entry(entry) => entry,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cortex_coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            CoordinatorConfig::from_file(path)?
        }
        None => {
            warn!("No configuration file given, using defaults");
            CoordinatorConfig::default()
        }
    };

    let episodic = Arc::new(InMemoryEpisodicStore::new());
    let semantic = Arc::new(InMemorySemanticStore::with_dimension(
        config.embedding.dimension,
    ));
    let embedder = build_embedder(&config.embedding)?;

    if let Some(path) = &cli.seed {
        SeedFile::from_path(path)?
            .load(episodic.as_ref(), semantic.as_ref(), &embedder)
            .await?;
    }

    let orchestrator =
        Orchestrator::from_config_with_embedder(&config, episodic, semantic, embedder)?;

    let output = match cli.command {
        Commands::Execute {
            query,
            user,
            session,
            no_memory,
            hint,
            parallel_tools,
            detail,
            max_memory,
            model,
            deadline_ms,
            tool_args,
            no_reasoning,
        } => {
            let mut options = ExecuteOptions::new(user, session);
            options.include_memory_context = !no_memory;
            options.hint_intent = hint;
            options.parallel_tools = parallel_tools;
            options.detail = detail.into();
            options.model = model;
            options.deadline_ms = deadline_ms;
            options.include_reasoning = !no_reasoning;
            if let Some(max) = max_memory {
                options.max_memory_results = max;
            }
            if let Some(raw) = tool_args {
                options.tool_args = serde_json::from_str(&raw)
                    .context("--tool-args must be a JSON object keyed by tool name")?;
            }

            let result = orchestrator.execute(&query, &options).await?;
            serde_json::to_value(result)?
        }
        Commands::Classify {
            query,
            user_context,
        } => {
            let hints = ClassifyHints {
                user_context: user_context
                    .map(|raw| serde_json::from_str::<Value>(&raw))
                    .transpose()
                    .context("--user-context must be valid JSON")?,
                ..Default::default()
            };
            let intent = orchestrator.classify(&query, &hints).await?;
            serde_json::to_value(intent)?
        }
        Commands::ClassifyBatch { file, concurrency } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let lines: Vec<BatchLine> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            let entries = lines.into_iter().map(BatchEntry::from).collect();
            let summary = orchestrator.classify_batch(entries, concurrency).await;
            serde_json::to_value(summary)?
        }
        Commands::Tools => serde_json::to_value(orchestrator.tools())?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
