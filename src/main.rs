//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat import <page>` | Import a Confluence page and its descendants |
//! | `docchat search "<query>"` | Run the retrieval cascade |
//! | `docchat ask "<query>"` | Answer a question from the stored pages |
//! | `docchat route "<query>"` | Show how a chat query would be routed |
//! | `docchat get <page_id>` | Print a stored page with its elements |
//! | `docchat pages` | List stored pages |
//! | `docchat delete <page_id>` | Remove a stored page |
//! | `docchat serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! docchat init
//! docchat import "https://wiki.example.com/spaces/ENG/pages/123456/Flashing" --depth 2
//! docchat search "secure boot" --limit 3
//! docchat ask "how do I flash the board?"
//! docchat serve
//! ```
//!
//! Diagnostics go to stderr through `tracing` (`RUST_LOG`, default
//! `docchat=info`); command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docchat::{chat, config, import, migrate, pages, retrieve, router, server};

/// docchat: answers questions from a local index of Confluence documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "docchat: chat over locally indexed Confluence documentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Import a Confluence page tree.
    ///
    /// `page` is a page id, a `viewpage.action?pageId=N` URL, or a
    /// `/spaces/KEY/pages/N/...` URL.
    Import {
        page: String,

        /// Maximum depth below the root page (root is depth 0).
        #[arg(long)]
        depth: Option<usize>,

        /// Maximum number of pages to fetch.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Import only the given page.
        #[arg(long)]
        no_children: bool,
    },

    /// Search stored pages.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,

        /// Treat the query as code-related (enables the code block stage).
        #[arg(long)]
        code: bool,
    },

    /// Answer a question from the stored pages.
    Ask { query: String },

    /// Show the routing decision for a chat query.
    Route { query: String },

    /// Print a stored page.
    Get { page_id: String },

    /// List stored pages.
    Pages,

    /// Delete a stored page.
    Delete { page_id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    // Routing is pure; no config needed.
    if let Commands::Route { query } = &cli.command {
        let route = router::route(query);
        println!("{}", serde_json::to_string_pretty(&route)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            page,
            depth,
            max_pages,
            no_children,
        } => {
            import::run_import(&cfg, &page, depth, max_pages, !no_children).await?;
        }
        Commands::Search { query, limit, code } => {
            retrieve::run_search(&cfg, &query, limit, code).await?;
        }
        Commands::Ask { query } => {
            chat::run_ask(&cfg, &query).await?;
        }
        Commands::Get { page_id } => {
            pages::run_get(&cfg, &page_id).await?;
        }
        Commands::Pages => {
            pages::run_list(&cfg).await?;
        }
        Commands::Delete { page_id } => {
            pages::run_delete(&cfg, &page_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Route { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}
