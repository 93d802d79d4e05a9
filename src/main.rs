//! # Precedent Harness CLI (`pct`)
//!
//! Command-line interface for the precedent retrieval engine.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pct init` | Create the SQLite database and run schema migrations |
//! | `pct query <hs_code>` | Full retrieval: cache → collect → index → neighbors |
//! | `pct search "<text>"` | Semantic search against the index alone |
//! | `pct lookup <hs_code>` | Direct HS-code lookup in the metadata store |
//! | `pct stats` | Database and cache statistics |
//!
//! ## Examples
//!
//! ```bash
//! pct init --config ./config/pct.toml
//! pct query 8518.22.00 --product "bluetooth bookshelf speakers"
//! pct search "wireless loudspeakers classification"
//! pct lookup 3304.99.50.00
//! pct stats
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use precedent_harness::collector::HttpRulingCollector;
use precedent_harness::config;
use precedent_harness::models::RulingQuery;
use precedent_harness::retrieve::RetrievalEngine;
use precedent_harness::{db, migrate, stats};

/// Precedent Harness — customs-ruling precedent retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pct.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pct",
    about = "Precedent Harness — customs-ruling precedent retrieval",
    version,
    long_about = "Retrieves and ranks historical customs-ruling precedents for a product/HS-code \
    combination, combining a TTL cache, live collection from the authoritative ruling source, \
    and nearest-neighbor search over a durable vector index."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pct.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, embeddings, index_meta, ruling_cache). Idempotent.
    Init,

    /// Run a full retrieval for an HS code.
    ///
    /// Checks the cache, collects fresh rulings on a miss, indexes them,
    /// and returns the assembled result with vector neighbors appended.
    Query {
        /// HS code to retrieve precedents for (e.g. `8518.22.00`).
        hs_code: String,

        /// Product description used to sharpen the neighbor search.
        #[arg(long)]
        product: Option<String>,
    },

    /// Semantic search against the vector index alone.
    ///
    /// No collection is performed; an empty index yields no results.
    Search {
        /// Free-text query.
        text: String,

        /// Maximum number of neighbors to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Direct HS-code lookup in the metadata store, newest first.
    Lookup {
        /// Exact HS code to look up.
        hs_code: String,

        /// Maximum number of rulings to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show database and cache statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Query { hs_code, product } => {
            let collector = Arc::new(HttpRulingCollector::new(cfg.collector.clone())?);
            let engine = RetrievalEngine::open(&cfg, collector).await?;

            let mut query = RulingQuery::new(hs_code);
            if let Some(product) = product {
                query = query.with_product(product);
            }

            let result = engine.retrieve(&query).await?;
            println!(
                "source: {}{}",
                result.source,
                if result.degraded { " (degraded)" } else { "" }
            );
            println!("rulings: {}", result.documents.len());
            println!();
            for (i, doc) in result.documents.iter().enumerate() {
                println!("{}. [{}] {}", i + 1, doc.hs_code, doc.title);
                println!("    url: {}", doc.source_url);
                if let Some(date) = doc.published_date {
                    println!("    published: {}", date);
                }
                println!("    excerpt: \"{}\"", excerpt(&doc.body_text));
                println!();
            }
        }
        Commands::Search { text, limit } => {
            let collector = Arc::new(HttpRulingCollector::new(cfg.collector.clone())?);
            let engine = RetrievalEngine::open(&cfg, collector).await?;

            let k = limit.unwrap_or(cfg.retrieval.top_k);
            let results = engine.search_neighbors(&text, k).await?;
            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, (doc, score)) in results.iter().enumerate() {
                println!("{}. [{:.3}] [{}] {}", i + 1, score, doc.hs_code, doc.title);
                println!("    url: {}", doc.source_url);
                println!("    excerpt: \"{}\"", excerpt(&doc.body_text));
                println!();
            }
        }
        Commands::Lookup { hs_code, limit } => {
            let collector = Arc::new(HttpRulingCollector::new(cfg.collector.clone())?);
            let engine = RetrievalEngine::open(&cfg, collector).await?;

            let results = engine.index().find_by_hs_code(&hs_code, limit).await?;
            if results.is_empty() {
                println!("No rulings indexed for {}.", hs_code);
                return Ok(());
            }
            for (i, doc) in results.iter().enumerate() {
                println!("{}. {}", i + 1, doc.title);
                println!("    url: {}", doc.source_url);
                println!("    excerpt: \"{}\"", excerpt(&doc.body_text));
                println!();
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

fn excerpt(body: &str) -> String {
    let flat = body.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() > 160 {
        let cut: String = trimmed.chars().take(160).collect();
        format!("{}...", cut.trim_end())
    } else {
        trimmed.to_string()
    }
}
