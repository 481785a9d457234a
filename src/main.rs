use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use glean::api::create_router;
use glean::config::Config;
use glean::db::{Database, SnapshotRepo};
use glean::orchestrator::{Orchestrator, PipelineOptions};
use glean::snapshot;

#[derive(Parser)]
#[command(name = "glean", about = "Search the web, index what it finds, answer from it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once for a query
    Ask {
        query: String,
        #[arg(long)]
        num_results: Option<usize>,
        /// Answer from the existing index without searching
        #[arg(long)]
        no_search: bool,
        #[arg(long)]
        top_k: Option<usize>,
        /// Load the index from this file before asking and save it afterwards
        #[arg(long)]
        index_file: Option<PathBuf>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

/// Where the index lives between runs.
enum Store {
    File(PathBuf),
    Mongo(SnapshotRepo),
    Memory,
}

impl Store {
    async fn open(config: &Config, index_file: Option<PathBuf>) -> anyhow::Result<Store> {
        if let Some(path) = index_file.or_else(|| config.index_file.clone()) {
            return Ok(Store::File(path));
        }
        if let Some(uri) = &config.mongo_uri {
            let db = Database::new(uri, &config.mongo_db_name).await?;
            return Ok(Store::Mongo(SnapshotRepo::new(&db)));
        }
        Ok(Store::Memory)
    }

    async fn load(&self, orchestrator: &Orchestrator) -> anyhow::Result<()> {
        let snapshot = match self {
            Store::File(path) => snapshot::load(path).await?,
            Store::Mongo(repo) => Some(repo.load().await?),
            Store::Memory => None,
        };
        if let Some(snapshot) = snapshot {
            orchestrator
                .indexer()
                .restore(snapshot)
                .await
                .context("Failed to restore saved index")?;
        }
        Ok(())
    }

    async fn save(&self, orchestrator: &Orchestrator) -> anyhow::Result<()> {
        let snapshot = orchestrator.indexer().snapshot().await;
        match self {
            Store::File(path) => snapshot::save(path, &snapshot).await?,
            Store::Mongo(repo) => {
                repo.save(&snapshot).await?;
            }
            Store::Memory => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // fmt().init() also bridges log records into tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Ask {
            query,
            num_results,
            no_search,
            top_k,
            index_file,
            json,
        } => {
            let orchestrator = Orchestrator::from_config(&config)?;
            let store = Store::open(&config, index_file).await?;
            store.load(&orchestrator).await?;

            let defaults = orchestrator.default_options();
            let options = PipelineOptions {
                num_results: num_results.unwrap_or(defaults.num_results),
                search_first: !no_search,
                top_k: top_k.unwrap_or(defaults.top_k),
            };
            let outcome = orchestrator.run(&query, options).await;
            store.save(&orchestrator).await?;

            if json {
                let body = serde_json::json!({
                    "query": &outcome.query,
                    "success": outcome.is_success(),
                    "error": outcome.failure.as_ref().map(|e| e.to_string()),
                    "search_source": &outcome.search_source,
                    "pages_scraped": outcome.pages_scraped(),
                    "result": &outcome.rag_result,
                    "statistics": &outcome.statistics,
                    "total_time_ms": outcome.total_time.as_millis() as u64,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                match (&outcome.rag_result, &outcome.failure) {
                    (Some(result), _) => {
                        println!("{}\n", result.generated_response);
                        println!("confidence: {:.2}", result.confidence_score);
                        for source in &result.sources {
                            println!("  - {}", source);
                        }
                    }
                    (None, Some(e)) => println!("error: {}", e),
                    (None, None) => println!("no result"),
                }
                println!(
                    "\n{} chunks from {} sources indexed, {:.1}s",
                    outcome.statistics.total_chunks,
                    outcome.statistics.unique_sources,
                    outcome.total_time.as_secs_f64()
                );
            }
        }
        Command::Serve { bind } => {
            let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
            let store = Store::open(&config, None).await?;
            store.load(&orchestrator).await?;

            let addr = bind.unwrap_or(config.bind_addr);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            log::info!("listening on {}", addr);

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("shutdown requested");
                        signal.cancel();
                    }
                    Err(e) => log::error!("failed to listen for ctrl-c: {}", e),
                }
            });

            axum::serve(listener, create_router(orchestrator.clone()))
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await?;

            store.save(&orchestrator).await?;
        }
    }
    Ok(())
}
