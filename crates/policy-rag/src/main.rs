//! # Policy RAG CLI (`policy-rag`)
//!
//! ## Usage
//!
//! ```bash
//! policy-rag --config ./config/policy-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `policy-rag ingest <paths...>` | Extract, chunk, embed, and index files |
//! | `policy-rag ask "<question>"` | Answer with cited sources (JSON) |
//! | `policy-rag ask "<question>" --stream` | Stream the answer as NDJSON events |
//! | `policy-rag search "<query>"` | Show the ranked chunks retrieval would use |
//! | `policy-rag stats` | Summarize the index |
//! | `policy-rag show <file>` | Chunks, sections, and a preview of one file |
//! | `policy-rag remove <hash>` | Delete one document's chunks |
//! | `policy-rag remove --file <name>` | Delete every document stored under a file name |
//! | `policy-rag clear` | Delete everything in the index |

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};

use policy_rag::app::App;
use policy_rag::config::{self, Config};
use policy_rag::{ask, ingest, search, stats, telemetry};

const DEFAULT_CONFIG_PATH: &str = "./config/policy-rag.toml";

/// Policy RAG: question answering over a private policy-document corpus.
///
/// Answers are grounded in the indexed documents and cite the chunks they
/// were built from. Requires `OPENAI_API_KEY` for the default providers.
#[derive(Parser)]
#[command(name = "policy-rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/policy-rag.toml`; built-in defaults are used if
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest policy documents.
    ///
    /// Directories are walked recursively and filtered by
    /// `ingest.include_globs`. A file that fails is reported and skipped.
    Ingest {
        /// Files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Write NDJSON events (`sources`, `token`, `complete`|`error`) as they arrive.
        #[arg(long)]
        stream: bool,

        /// Number of chunks to retrieve (default: `retrieval.k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Run retrieval only and print the ranked chunks.
    Search {
        query: String,

        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Summarize one indexed file.
    Show {
        /// File name as listed by `stats`.
        file: String,
    },

    /// Remove a document and all its chunks.
    #[command(group(ArgGroup::new("target").required(true).args(["hash", "file"])))]
    Remove {
        /// Document content hash, as printed by `ingest`.
        hash: Option<String>,

        /// Remove every document stored under this file name instead.
        #[arg(long)]
        file: Option<String>,
    },

    /// Remove every document from the index.
    Clear,
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                config::load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    telemetry::init(&cfg.logging);

    let app = App::build(&cfg)?;
    let mut out = std::io::stdout();

    match cli.command {
        Commands::Ingest { paths } => {
            let summary = ingest::ingest_paths(&app.service, &cfg.ingest, &paths).await?;
            if summary.ingested() > 0 {
                app.persist()?;
            }
            ingest::print_summary(&summary);
        }
        Commands::Ask { question, stream, k } => {
            ask::run_ask(&app.service, &question, k, stream, &mut out).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&app.service, &query, k, &mut out).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, &app.service, &mut out).await?;
        }
        Commands::Show { file } => {
            stats::run_show(&app.service, &file, &mut out).await?;
        }
        Commands::Remove { hash, file } => {
            let removed = match (hash, file) {
                (_, Some(file)) => stats::run_remove_file(&app.service, &file, &mut out).await?,
                (Some(hash), None) => stats::run_remove(&app.service, &hash, &mut out).await?,
                (None, None) => anyhow::bail!("remove needs a document hash or --file"),
            };
            if removed {
                app.persist()?;
            }
        }
        Commands::Clear => {
            stats::run_clear(&app.service, &mut out).await?;
            app.persist()?;
        }
    }

    Ok(())
}
