//! # Pagetrail CLI (`ptx`)
//!
//! The `ptx` binary is the primary interface for Pagetrail. It provides
//! commands for database initialization, browser profile ingestion, hybrid
//! search, counting and aggregation, embedding backfill, and the HTTP query
//! server.
//!
//! ## Usage
//!
//! ```bash
//! ptx --config ./config/ptx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ptx init` | Create the SQLite database and run schema migrations |
//! | `ptx ingest` | Read the browser profile and upsert visits and bookmarks |
//! | `ptx search "<query>"` | Hybrid search across the index |
//! | `ptx count` | Count records matching filters |
//! | `ptx aggregate --group-by domain` | Top groups by record count |
//! | `ptx embed pending` | Backfill missing embeddings |
//! | `ptx capabilities` | Print the query surface as JSON |
//! | `ptx stats` | Index statistics |
//! | `ptx serve http` | Start the HTTP query server |

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use pagetrail::config;
use pagetrail::db;
use pagetrail::embedding::HttpEmbedder;
use pagetrail::filter::RawFilter;
use pagetrail::ingest::{self, IngestOptions};
use pagetrail::migrate;
use pagetrail::models::Method;
use pagetrail::query::{self, Mode, QueryError, SearchRequest};
use pagetrail::server;
use pagetrail::stats;
use pagetrail::store::{BookmarkStore, VisitStore};
use pagetrail::{backfill, models};

/// Pagetrail — a queryable personal index of browser history and bookmarks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ptx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ptx",
    about = "Pagetrail — hybrid search over your browser history and bookmarks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ptx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Which record tables a query touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Visits,
    Bookmarks,
    All,
}

impl KindArg {
    fn selects(self) -> (bool, bool) {
        match self {
            KindArg::Visits => (true, false),
            KindArg::Bookmarks => (false, true),
            KindArg::All => (true, true),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file, the visits and bookmarks tables, identity
    /// indexes, and FTS tables with their sync triggers. Idempotent.
    Init,

    /// Read the browser profile and upsert visits and bookmarks.
    ///
    /// Re-running never duplicates records: rows are matched by identity key
    /// (URL hash plus browser, plus folder for bookmarks) and refreshed in
    /// place. Missing embeddings are backfilled afterwards unless
    /// `--skip-embed` is given.
    Ingest {
        /// Browser profile directory (overrides config).
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Ingest history only.
        #[arg(long, conflicts_with = "bookmarks_only")]
        visits_only: bool,

        /// Ingest bookmarks only.
        #[arg(long)]
        bookmarks_only: bool,

        /// Upsert without running the embedding backfill.
        #[arg(long)]
        skip_embed: bool,

        /// Read and report counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Override the embedding batch size from config.
        #[arg(long)]
        embed_batch_size: Option<usize>,
    },

    /// Search the index.
    ///
    /// With no --method, methods are chosen automatically: filters run a
    /// structured select, query text runs fulltext and vector retrieval.
    Search {
        /// The search query string (may be empty when filtering).
        #[arg(default_value = "")]
        query: String,

        /// Which record kinds to search.
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,

        /// Retrieval method, repeatable: structured, fulltext, vector.
        #[arg(long = "method")]
        methods: Vec<String>,

        /// Only records on or after this date (YYYY-MM-DD or date-time).
        #[arg(long)]
        after: Option<String>,

        /// Only records on or before this date (inclusive; bare date means
        /// end of that day).
        #[arg(long)]
        before: Option<String>,

        /// Substring match on the visit domain.
        #[arg(long)]
        domain: Option<String>,

        /// Substring match on the bookmark folder path.
        #[arg(long)]
        folder: Option<String>,

        /// Maximum number of results (clamped to 1..=100).
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Count records matching filters.
    Count {
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },

    /// Top groups by record count (domains for visits, folders for bookmarks).
    Aggregate {
        /// Group field: `domain` or `folder`.
        #[arg(long)]
        group_by: String,
        #[arg(long, default_value_t = 10)]
        top_n: usize,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
    },

    /// Print the query surface (methods, filters, modes) as JSON.
    Capabilities,

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Index statistics.
    Stats,

    /// Start the HTTP query server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed records that do not have a vector yet.
    Pending {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// JSON API: POST /tools/search, GET /tools/capabilities, GET /health.
    Http,
}

fn cli_filters(
    after: Option<String>,
    before: Option<String>,
    domain: Option<String>,
    folder: Option<String>,
) -> Vec<RawFilter> {
    [
        ("date_after", after),
        ("date_before", before),
        ("domain", domain),
        ("folder", folder),
    ]
    .into_iter()
    .filter_map(|(field, value)| {
        value.map(|v| RawFilter {
            field: field.to_string(),
            value: v,
        })
    })
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            profile,
            visits_only,
            bookmarks_only,
            skip_embed,
            dry_run,
            embed_batch_size,
        } => {
            let pool = db::connect(&cfg).await?;
            let visits = VisitStore::new(pool.clone());
            let bookmarks = BookmarkStore::new(pool.clone());
            let opts = IngestOptions {
                profile,
                visits_only,
                bookmarks_only,
                skip_embed,
                dry_run,
                embed_batch_size,
            };
            ingest::run_ingest(&cfg, &visits, &bookmarks, &opts).await?;
            pool.close().await;
        }
        Commands::Search {
            query,
            kind,
            methods,
            after,
            before,
            domain,
            folder,
            top_k,
        } => {
            let methods = if methods.is_empty() {
                None
            } else {
                Some(
                    methods
                        .iter()
                        .map(|m| Method::from_str(m.as_str()))
                        .collect::<Result<Vec<_>>>()?,
                )
            };
            let (search_visits, search_bookmarks) = kind.selects();
            let req = SearchRequest {
                query,
                methods,
                filters: cli_filters(after, before, domain, folder),
                top_k,
                search_visits,
                search_bookmarks,
                mode: Mode::Search,
                ..Default::default()
            };
            let resp = run_request(&cfg, &req).await?;
            print_results(&resp);
        }
        Commands::Count {
            kind,
            after,
            before,
            domain,
            folder,
        } => {
            let (search_visits, search_bookmarks) = kind.selects();
            let req = SearchRequest {
                filters: cli_filters(after, before, domain, folder),
                search_visits,
                search_bookmarks,
                mode: Mode::Count,
                ..Default::default()
            };
            let resp = run_request(&cfg, &req).await?;
            println!("{}", resp.count.unwrap_or(0));
        }
        Commands::Aggregate {
            group_by,
            top_n,
            after,
            before,
        } => {
            let req = SearchRequest {
                filters: cli_filters(after, before, None, None),
                mode: Mode::Aggregate,
                group_by: Some(group_by),
                aggregate_top_n: top_n,
                ..Default::default()
            };
            let resp = run_request(&cfg, &req).await?;
            let aggregates = resp.aggregates.unwrap_or_default();
            if aggregates.is_empty() {
                println!("No groups.");
            }
            for (i, g) in aggregates.iter().enumerate() {
                println!("{}. {} ({})", i + 1, g.group_value, g.count);
            }
        }
        Commands::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&query::capabilities())?);
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { batch_size } => {
                let pool = db::connect(&cfg).await?;
                let visits = VisitStore::new(pool.clone());
                let bookmarks = BookmarkStore::new(pool.clone());
                let embedder = HttpEmbedder::new(&cfg.embedding);
                let batch_size = batch_size.unwrap_or(cfg.embedding.batch_size).max(1);
                let report =
                    backfill::run_backfill(&visits, &bookmarks, &embedder, batch_size).await?;
                println!(
                    "Embedded {} visits, {} bookmarks.",
                    report.visits_embedded, report.bookmarks_embedded
                );
                pool.close().await;
            }
        },
        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            stats::print_stats(&cfg, &pool).await?;
            pool.close().await;
        }
        Commands::Serve { service } => match service {
            ServeService::Http => {
                let pool = db::connect(&cfg).await?;
                server::run_server(&cfg, pool).await?;
            }
        },
    }

    Ok(())
}

async fn run_request(
    cfg: &config::Config,
    req: &SearchRequest,
) -> Result<query::SearchResponse> {
    let pool = db::connect(cfg).await?;
    let visits = VisitStore::new(pool.clone());
    let bookmarks = BookmarkStore::new(pool.clone());
    let embedder = HttpEmbedder::new(&cfg.embedding);
    let result = query::run_query(&visits, &bookmarks, &embedder, req).await;
    pool.close().await;
    result.map_err(|e| match e {
        QueryError::BadRequest(msg) => anyhow::anyhow!(msg),
        QueryError::Internal(e) => e,
    })
}

fn print_results(resp: &query::SearchResponse) {
    if resp.results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in resp.results.iter().enumerate() {
        let methods = hit
            .methods
            .iter()
            .map(models::Method::as_str)
            .collect::<Vec<_>>()
            .join("+");
        println!("{}. [{:.2}] {} ({})", i + 1, hit.score, hit.title, methods);
        println!("    url: {}", hit.url);
        if let Some(ref ts) = hit.timestamp {
            println!("    when: {}", ts);
        }
        if let Some(ref domain) = hit.domain {
            println!("    domain: {}", domain);
        }
        if let Some(ref folder) = hit.folder {
            println!("    folder: {}", folder);
        }
        if !hit.snippet.is_empty() {
            println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " "));
        }
        println!();
    }
    println!(
        "{} of {} results ({} ms)",
        resp.results.len(),
        resp.total_available,
        resp.timing_ms
            .iter()
            .filter(|(k, _)| k.ends_with("total"))
            .map(|(_, v)| v)
            .sum::<f64>()
    );
}
