//! # Kowalski CLI
//!
//! ## Usage
//!
//! ```bash
//! kowalski [--config kowalski.toml] [--debug] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kowalski collections` | List collections and their document counts |
//! | `kowalski add <collection> <files…>` | Convert, embed and store documents |
//! | `kowalski list <collection>` | List stored documents |
//! | `kowalski get <id>` | Print a document by hash or id |
//! | `kowalski drop <hash>` | Remove a document |
//! | `kowalski search "<question>"` | Show the nearest sections |
//! | `kowalski context "<question>"` | Print the assembled prompt |
//! | `kowalski evaluate <files…>` | Assemble prompts for evaluation files into a report |
//!
//! Collections are named `label@embeddingmodel`, e.g. `zypper@nomic-embed-text`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kowalski::commands::{self, OutputFormat};
use kowalski::config;
use kowalski::context::ContextAssembler;
use kowalski::embedding::create_provider;
use kowalski::evaluate::Evaluator;
use kowalski::file::LocalFiles;
use kowalski::knowledge::Knowledge;
use kowalski::retrieve::Retriever;
use kowalski::sysinfo::OsRelease;

/// Kowalski: a retrieval-augmented helper for Linux systems.
#[derive(Parser)]
#[command(name = "kowalski", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to /etc/kowalski.toml
    /// when present, built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory; overrides `[db].path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all collections.
    Collections,

    /// Add documents to a collection, creating it if needed.
    ///
    /// `.yaml`/`.yml` files are read as curated entries, `.md`/`.txt` as
    /// Markdown. Files already stored are reported and skipped.
    Add {
        /// Collection name (`label@embeddingmodel`).
        collection: String,
        /// Files to add.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the documents of a collection.
    List {
        collection: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Full)]
        format: OutputFormat,
    },

    /// Print a document by content hash or store id.
    Get {
        id: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Full)]
        format: OutputFormat,
    },

    /// Remove a document from every collection holding it.
    Drop { hash: String },

    /// Show the sections nearest to a question.
    Search {
        question: String,
        /// Collections to search; all when omitted.
        #[arg(long = "collection", short = 'c')]
        collections: Vec<String>,
        /// Number of sections; defaults to `[retrieval].top_k`.
        #[arg(short = 'k', long)]
        k: Option<usize>,
    },

    /// Print the prompt assembled for a question.
    Context {
        question: String,
        /// Collections to search; all when omitted.
        #[arg(long = "collection", short = 'c')]
        collections: Vec<String>,
        /// Prompt budget in tokens; defaults to `[context].budget`.
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Assemble the prompt of every entry in the given evaluation files and
    /// write them to `<run-id>.yaml`.
    Evaluate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Collections to search; all when omitted.
        #[arg(long = "collection", short = 'c')]
        collections: Vec<String>,
        /// Prompt budget in tokens; defaults to `[context].budget`.
        #[arg(long)]
        budget: Option<usize>,
        /// Directory the report is written to.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug { "kowalski=debug,kowalski_core=debug" } else { "kowalski=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut cfg = config::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        cfg.db.path = db;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let knowledge = Arc::new(Knowledge::open(&cfg.db.path).await?);
    let provider: Arc<dyn kowalski_core::embedding::EmbeddingProvider> =
        Arc::from(create_provider(&cfg.embedding)?);

    let result = match cli.command {
        Commands::Collections => commands::run_collections(&knowledge).await,
        Commands::Add { collection, files } => {
            commands::run_add(&knowledge, provider.as_ref(), &collection, &files, &cancel).await
        }
        Commands::List { collection, format } => {
            commands::run_list(&knowledge, &collection, format).await
        }
        Commands::Get { id, format } => commands::run_get(&knowledge, &id, format).await,
        Commands::Drop { hash } => commands::run_drop(&knowledge, &hash).await,
        Commands::Search {
            question,
            collections,
            k,
        } => {
            let retriever = Retriever::new(knowledge.clone(), provider.clone(), &cfg.retrieval);
            let k = k.unwrap_or(cfg.retrieval.top_k);
            commands::run_search(&retriever, &question, &collections, k, &cancel).await
        }
        Commands::Context {
            question,
            collections,
            budget,
        } => {
            let retriever = Arc::new(Retriever::new(
                knowledge.clone(),
                provider.clone(),
                &cfg.retrieval,
            ));
            let assembler = ContextAssembler::new(
                retriever,
                Arc::new(OsRelease::default()),
                Arc::new(LocalFiles::new(&cfg.context)),
                &cfg,
            );
            let budget = budget.unwrap_or(cfg.context.budget);
            commands::run_context(&assembler, &question, &collections, budget, &cancel).await
        }
        Commands::Evaluate {
            files,
            collections,
            budget,
            output_dir,
        } => {
            let retriever = Arc::new(Retriever::new(
                knowledge.clone(),
                provider.clone(),
                &cfg.retrieval,
            ));
            let evaluator = Evaluator::new(
                retriever,
                Arc::new(OsRelease::default()),
                Arc::new(LocalFiles::new(&cfg.context)),
                &cfg,
            );
            let budget = budget.unwrap_or(cfg.context.budget);
            commands::run_evaluate(&evaluator, &files, &collections, budget, &output_dir, &cancel)
                .await
        }
    };

    knowledge.close().await;
    result
}
