mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use quarry::{Engine, QuarryConfig};

#[derive(Parser)]
#[command(name = "quarry-cli", about = "Document search and grounded question answering", version)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/quarry/quarry.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a text file (use "-" to read from stdin)
    Ingest {
        file: String,
        /// Source label (defaults to the file name)
        #[arg(long)]
        source: Option<String>,
        /// Reuse a document ID, replacing its previous content
        #[arg(long)]
        id: Option<Uuid>,
    },

    /// Ask a question answered from the ingested documents
    Ask {
        question: String,
        /// How many excerpts to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Semantic search without answer generation
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Substring search over raw document text
    Grep {
        query: String,
        /// Maximum results
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// List ingested documents
    Documents,

    /// Remove a document and its index entries
    Remove {
        /// Document ID
        id: Uuid,
    },

    /// Show corpus and index statistics
    Stats,

    /// Rebuild the in-memory index from stored vectors
    Rebuild,
}

/// Resolve the config file, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<QuarryConfig> {
    let mut config = match &cli.config {
        Some(path) => QuarryConfig::load(path)?,
        None => {
            let default_path = dirs::config_dir().map(|p| p.join("quarry").join("quarry.toml"));
            match default_path {
                Some(path) if path.exists() => QuarryConfig::load(&path)?,
                _ => QuarryConfig::default(),
            }
        }
    };

    if let Some(db) = &cli.db {
        config.storage.db_path = Some(db.clone());
    } else if config.storage.db_path.is_none() {
        config.storage.db_path = dirs::data_local_dir()
            .map(|p| p.join("quarry").join("documents.db"));
    }

    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let engine = Engine::new(&config)?;

    match &cli.command {
        Command::Ingest { file, source, id } => {
            commands::run_ingest(&engine, file, source.as_deref(), *id, &cli.format)?;
        }
        Command::Ask { question, top_k } => {
            commands::run_ask(&engine, question, *top_k, &cli.format)?;
        }
        Command::Search { query, top_k } => {
            commands::run_search(&engine, query, *top_k, &cli.format)?;
        }
        Command::Grep { query, limit } => {
            commands::run_grep(&engine, query, *limit, &cli.format)?;
        }
        Command::Documents => {
            commands::run_documents(&engine, &cli.format)?;
        }
        Command::Remove { id } => {
            commands::run_remove(&engine, *id, &cli.format)?;
        }
        Command::Stats => {
            commands::run_stats(&engine, &cli.format)?;
        }
        Command::Rebuild => {
            commands::run_rebuild(&engine, &cli.format)?;
        }
    }

    Ok(())
}
