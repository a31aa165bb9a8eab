//! Maintenance commands
//!
//! Each command runs against an initialized engine and returns a JSON
//! value for stdout. Logs go to stderr so hook scripts can pipe the output.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use recall_memory::{HookKind, MemoryEngine, MemoryId, MemoryType, SearchOptions};

use crate::error::{CliError, CliResult};
use crate::output::{CohesionOutput, ContextOutput, EdgeView, EdgesOutput, SearchOutput};

#[derive(Debug, Parser)]
#[command(name = "recall")]
#[command(about = "Maintenance and hook driver for the Recall memory engine")]
#[command(version)]
pub struct Cli {
    /// Directory holding config.toml, index.json and vectors.bin
    #[arg(long, short, default_value = ".recall")]
    pub data_dir: PathBuf,

    /// Rank lexically only, without the built-in embedder
    #[arg(long)]
    pub lexical_only: bool,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Re-scan every scope root and rewrite the index
    Rebuild,

    /// Hybrid search across scopes
    Search {
        query: String,
        /// Scope name, comma-separated list, or "all"
        #[arg(long, short, default_value = "all")]
        scope: String,
        #[arg(long, short)]
        limit: Option<usize>,
        /// Only these types
        #[arg(long = "type", short = 't')]
        types: Vec<MemoryType>,
        /// Records with at least one of these tags
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Ids to exclude
        #[arg(long)]
        avoid: Vec<MemoryId>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Hide lower-precedence records with the same title
        #[arg(long)]
        shadow: bool,
    },

    /// Report records with no links in either direction
    Cohesion,

    /// Link the given records, or every orphan when none are given
    Link { ids: Vec<MemoryId> },

    /// Drop links to records that no longer exist
    Prune,

    /// Compute vectors for records that have none
    Embed,

    /// Weighted context for a hook
    Inject {
        /// session_start, pre_compact, restore, pre_edit, pre_read or user_prompt
        hook: HookKind,
        query: String,
        #[arg(long, short, default_value = "all")]
        scope: String,
        #[arg(long, short, default_value_t = 5)]
        limit: usize,
    },

    /// Index statistics
    Stats,
}

/// Run one command and return its JSON output
pub async fn run(command: Command, engine: &MemoryEngine) -> CliResult<serde_json::Value> {
    match command {
        Command::Rebuild => to_json(engine.rebuild_index().await?),
        Command::Search {
            query,
            scope,
            limit,
            types,
            tags,
            avoid,
            min_score,
            shadow,
        } => {
            let mut options = SearchOptions::new().avoid_all(avoid).shadow(shadow);
            options.types = types;
            options.tags = tags;
            options.limit = limit;
            options.min_score = min_score;

            let response = engine.search(&query, &scope, &options).await?;
            to_json(SearchOutput::from(response))
        }
        Command::Cohesion => to_json(CohesionOutput::from(engine.check_cohesion())),
        Command::Link { ids } => to_json(link(engine, ids).await?),
        Command::Prune => {
            let removed = engine.prune_dangling().await?;
            to_json(EdgesOutput {
                edges: removed.into_iter().map(Into::into).collect(),
                remaining_orphans: orphan_strings(engine),
            })
        }
        Command::Embed => to_json(engine.index_embeddings().await?),
        Command::Inject {
            hook,
            query,
            scope,
            limit,
        } => {
            let items = engine.context_for(hook, &query, &scope, limit).await?;
            to_json(ContextOutput {
                hook: hook.to_string(),
                items: items.into_iter().map(Into::into).collect(),
            })
        }
        Command::Stats => to_json(engine.stats()),
    }
}

/// The periodic linking pass: link each target, then report what is still
/// orphaned. One failing record does not stop the pass.
async fn link(engine: &MemoryEngine, ids: Vec<MemoryId>) -> CliResult<EdgesOutput> {
    let explicit = !ids.is_empty();
    let targets = if explicit { ids } else { engine.check_cohesion() };
    if targets.is_empty() {
        tracing::info!("No orphans to link");
    }

    let mut edges: Vec<EdgeView> = Vec::new();
    for id in &targets {
        match engine.auto_link(id.as_str()).await {
            Ok(added) => edges.extend(added.into_iter().map(EdgeView::from)),
            Err(e) if explicit => return Err(e.into()),
            Err(e) => tracing::warn!("Failed to link {}: {}", id, e),
        }
    }

    if explicit && edges.is_empty() {
        let joined: Vec<String> = targets.iter().map(|id| id.to_string()).collect();
        return Err(CliError::NothingToLink(joined.join(", ")));
    }

    tracing::info!("Added {} edge(s)", edges.len());
    Ok(EdgesOutput {
        edges,
        remaining_orphans: orphan_strings(engine),
    })
}

fn orphan_strings(engine: &MemoryEngine) -> Vec<String> {
    engine
        .check_cohesion()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

fn to_json(value: impl Serialize) -> CliResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}
