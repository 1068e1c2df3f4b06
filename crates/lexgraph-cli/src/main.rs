use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "lexgraph")]
#[command(about = "Ask questions of Vietnamese and English legal texts through a knowledge graph.")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to LEXGRAPH_DATA_DIR or the platform data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a legal document from a JSON request file ("-" for stdin)
    Ingest {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Skip unit embeddings for this document
        #[arg(long)]
        no_embed: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search the knowledge graph for answers
    Query {
        #[arg(value_name = "TEXT", required = true)]
        text: Vec<String>,

        /// Show candidates, stars and stage timings
        #[arg(long)]
        debug: bool,

        /// Output as JSON (includes the debug trace)
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from retrieved provisions
    Ask {
        #[arg(value_name = "QUESTION", required = true)]
        question: Vec<String>,

        /// Retrieve context through the graph instead of embeddings
        #[arg(long)]
        graph: bool,

        /// Number of units used as context for semantic retrieval
        #[arg(long, value_name = "N")]
        top_k: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a document and its unit hierarchy
    Doc {
        id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Exclude a triple from answers
    Blacklist {
        triple_id: i64,

        /// Restore a blacklisted triple
        #[arg(long)]
        undo: bool,
    },

    /// Show row counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Debug logs are hidden unless RUST_LOG asks for them
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut core = commands::open_core(cli.data_dir).await?;

    match cli.command {
        Commands::Ingest { file, no_embed, json } => commands::ingest::run(&core, &file, no_embed, json).await,
        Commands::Query { text, debug, json } => commands::query::run(&core, &text.join(" "), debug, json).await,
        Commands::Ask {
            question,
            graph,
            top_k,
            json,
        } => commands::ask::run(&mut core, &question.join(" "), graph, top_k, json).await,
        Commands::Doc { id, json } => commands::doc::run(&core, id, json).await,
        Commands::Blacklist { triple_id, undo } => commands::blacklist::run(&core, triple_id, undo).await,
        Commands::Stats { json } => commands::stats::run(&core, json).await,
    }
}
