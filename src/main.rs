//! # repolens CLI
//!
//! ## Usage
//!
//! ```bash
//! repolens [--config ./config/repolens.toml] [--repo PATH] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repolens index [--reindex]` | Build the index, or reuse the persisted one |
//! | `repolens ask "<question>" [--show-sources]` | Answer one question |
//! | `repolens chat` | Interactive question loop |
//! | `repolens map` | Print the repository structure map |
//!
//! `ask`, `chat` and `map` index first, loading the persisted index when it
//! is usable.
//!
//! ## Examples
//!
//! ```bash
//! # Index a Rust and Go project into a custom location
//! repolens --repo ../service --extensions .rs,.go --db-path /tmp/service_db index
//!
//! # One-off question with the retrieved code shown
//! repolens ask "where are tokens validated?" --show-sources
//!
//! # Talk to OpenAI instead of a local Ollama
//! LLM_PROVIDER=openai OPENAI_API_KEY=sk-... repolens chat
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repolens::config::{self, Overrides, DEFAULT_CONFIG_PATH};
use repolens::session::{write_answer, IndexOutcome, Session};

/// repolens: ask questions about a code repository.
#[derive(Parser)]
#[command(
    name = "repolens",
    about = "Ask natural-language questions about a code repository",
    version,
    long_about = "repolens chunks and embeds a repository's source files, keeps a compact \
    map of its files and declarations, and answers questions with an LLM using the most \
    relevant (and mutually diverse) code chunks as context."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/repolens.toml`; a missing default file means
    /// built-in defaults. An explicitly given file must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root to index (overrides `[repo].root`).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Comma-separated file extensions to index, e.g. `.py,.rs`.
    #[arg(long, global = true, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Index persistence directory (overrides `[index].path`).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log progress at info level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index, or reuse the persisted one.
    Index {
        /// Ignore the persisted index and rebuild from the repository.
        #[arg(long)]
        reindex: bool,
    },

    /// Answer a single question.
    Ask {
        /// The question to ask.
        question: String,

        /// Print a preview of each retrieved source chunk.
        #[arg(long)]
        show_sources: bool,

        /// Rebuild the index before answering.
        #[arg(long)]
        reindex: bool,
    },

    /// Start the interactive question loop.
    ///
    /// Type `sources` to toggle source previews and `exit` to quit.
    Chat {
        /// Rebuild the index before starting.
        #[arg(long)]
        reindex: bool,
    },

    /// Print the repository structure map.
    Map,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn print_outcome(outcome: &IndexOutcome) {
    match outcome {
        IndexOutcome::Loaded => println!("Loaded existing index."),
        IndexOutcome::Rebuilt {
            chunks,
            files,
            warnings,
        } => {
            println!("Indexed {} chunks from {} files.", chunks, files);
            if !warnings.is_empty() {
                println!("{} files skipped (run with --verbose for details).", warnings.len());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let overrides = Overrides {
        repo: cli.repo.clone(),
        extensions: cli.extensions.clone(),
        db_path: cli.db_path.clone(),
    };
    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let cfg = config::load_config(&config_path, required, &overrides)?;
    let extensions = cfg.extensions();

    let mut session = Session::from_config(cfg)?;

    match cli.command {
        Commands::Index { reindex } => {
            let outcome = session.index(&extensions, reindex).await?;
            print_outcome(&outcome);
        }
        Commands::Ask {
            question,
            show_sources,
            reindex,
        } => {
            session.index(&extensions, reindex).await?;
            let answer = session.ask(&question, show_sources).await?;
            write_answer(&mut std::io::stdout(), &answer)?;
        }
        Commands::Chat { reindex } => {
            let outcome = session.index(&extensions, reindex).await?;
            print_outcome(&outcome);

            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let interrupt = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let interactive = atty::is(atty::Stream::Stdin);
            session
                .run_loop(input, &mut std::io::stdout(), interrupt, interactive)
                .await?;
        }
        Commands::Map => {
            session.index(&extensions, false).await?;
            println!("{}", session.structure_map()?);
        }
    }

    Ok(())
}
