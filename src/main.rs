//! pubwatch - institution publication harvester
//!
//! Pulls newly published, institution-affiliated papers from PubMed into a
//! SQLite store, flags probable duplicates, and serves the store read-only.
//!
//! ## Usage
//!
//! ### Ingestion run (scheduled)
//! ```bash
//! PUBWATCH_CONTACT_EMAIL=ops@example.org pubwatch ingest
//! ```
//!
//! ### Query the store
//! ```bash
//! pubwatch search --last-names smith,jones --keywords polymer
//! pubwatch serve --port 8000
//! ```
//!
//! ### Digest of the latest run
//! ```bash
//! pubwatch digest --output updates.csv
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use pubwatch::catalog::{self, CatalogParams, PaperQuery, SearchHit};
use pubwatch::config::Config;
use pubwatch::digest;
use pubwatch::error::IngestError;
use pubwatch::normalize::TextNormalizer;
use pubwatch::pipeline::Pipeline;
use pubwatch::pubmed::PubMedClient;
use pubwatch::store::PaperStore;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Exit status for a run aborted by the operator (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

// ============================================================================
// CLI Definition
// ============================================================================

/// Institution publication harvester
#[derive(Parser)]
#[command(name = "pubwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true, env = "PUBWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, filter, deduplicate and store new papers
    Ingest,

    /// Search the primary store and print JSON
    Search {
        /// Comma-separated surnames; all must match
        #[arg(long, default_value = "")]
        last_names: String,

        /// Start of the publication date range (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        start_date: String,

        /// End of the publication date range (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        end_date: String,

        /// Comma-separated keywords; any may match
        #[arg(long, default_value = "")]
        keywords: String,

        /// Maximum number of hits
        #[arg(long, default_value_t = catalog::DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Write the papers added by the latest run as CSV
    Digest {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the read-only search API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

enum Outcome {
    Completed,
    Interrupted,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match run(cli).await {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Ingest => run_ingest(config).await,
        Commands::Search {
            last_names,
            start_date,
            end_date,
            keywords,
            limit,
        } => {
            let mut query = PaperQuery::from_csv_params(&last_names, &start_date, &end_date, &keywords);
            query.limit = limit;

            let store = PaperStore::open_read_only(&config.primary_db)?;
            let hits = catalog::search(&store, &query)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
            Ok(Outcome::Completed)
        }
        Commands::Digest { output } => {
            let delta = PaperStore::open_read_only(&config.delta_db)?;
            let rows = digest::write_digest_file(&delta, &output)
                .with_context(|| format!("Failed to write digest to {}", output.display()))?;
            println!("Saved {} row(s) to {:?}", rows, output);
            Ok(Outcome::Completed)
        }
        Commands::Serve { port, host } => {
            run_server(config, host, port).await?;
            Ok(Outcome::Completed)
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

async fn run_ingest(config: Config) -> Result<Outcome> {
    config.validate()?;

    let normalizer = TextNormalizer::new()?;
    let source = PubMedClient::new(&config.source)?;
    let primary = PaperStore::open(&config.primary_db)
        .with_context(|| format!("Failed to open {}", config.primary_db.display()))?;
    let delta = PaperStore::open(&config.delta_db)
        .with_context(|| format!("Failed to open {}", config.delta_db.display()))?;

    let today = Local::now().date_naive();
    info!(today = %today, primary = %primary.label(), delta = %delta.label(), "Starting ingestion run");

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let mut pipeline = Pipeline::new(config, source, normalizer, primary, delta)
        .with_interrupt(Arc::clone(&interrupt));

    // The flag covers blocking stages; the select drops pending awaits such as pacing sleeps.
    let result = tokio::select! {
        result = pipeline.run(today) => result,
        _ = tokio::signal::ctrl_c() => Err(IngestError::Interrupted),
    };

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string(&report)?);
            Ok(Outcome::Completed)
        }
        Err(IngestError::Interrupted) => {
            warn!("Interrupted, nothing committed");
            Ok(Outcome::Interrupted)
        }
        Err(e) => Err(anyhow::Error::new(e).context("Ingestion run failed")),
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

struct AppState {
    primary_db: PathBuf,
}

async fn run_server(config: Config, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, db = %config.primary_db.display(), "Starting HTTP server");

    let app_state = Arc::new(AppState {
        primary_db: config.primary_db,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/papers", get(papers_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Status endpoint
async fn index_handler() -> Json<Value> {
    Json(json!({ "status": "API is running" }))
}

/// Paper search endpoint
async fn papers_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CatalogParams>,
) -> Result<Json<Vec<SearchHit>>, (StatusCode, Json<Value>)> {
    let query = PaperQuery::from(params);
    info!(last_names = ?query.last_names, keywords = ?query.keywords, "Search request");

    let path = state.primary_db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let store = PaperStore::open_read_only(&path)?;
        catalog::search(&store, &query)
    })
    .await;

    match result {
        Ok(Ok(hits)) => Ok(Json(hits)),
        Ok(Err(e)) => {
            error!(error = %e, "Search failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ))
        }
        Err(e) => {
            error!(error = %e, "Search task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            ))
        }
    }
}
