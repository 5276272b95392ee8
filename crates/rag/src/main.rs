//! RagForge command line
//!
//! Loads a JSONL corpus into the in-process indexes, then answers a question,
//! compares strategies, or streams an answer. Results go to stdout as JSON,
//! logs go to stderr.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use ragforge_common::config::{AppConfig, ObservabilityConfig};
use ragforge_common::metrics;
use ragforge_rag::{highlight_citations, Document, QueryRequest, RagApp};
use ragforge_search::Strategy;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragforge")]
#[command(about = "Hybrid retrieval and citation-aware answer generation")]
#[command(version)]
struct Cli {
    /// Configuration file; defaults to config/{default,APP_ENV,local} plus APP__ variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSONL corpus, one {"id", "text", "source", "page"} document per line
    #[arg(long, env = "RAGFORGE_CORPUS", global = true)]
    corpus: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question
    Query {
        question: String,

        /// semantic, keyword (bm25), hybrid or hyde
        #[arg(short, long, default_value = "hybrid")]
        strategy: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(short, long)]
        temperature: Option<f32>,

        /// Skip the query cache
        #[arg(long)]
        no_cache: bool,

        /// Include the answer with citations rendered as HTML spans
        #[arg(long)]
        highlight: bool,
    },

    /// Run several strategies on the same question
    Compare {
        question: String,

        /// Comma-separated strategies; all of them when omitted
        #[arg(short, long, value_delimiter = ',')]
        strategies: Vec<String>,

        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Stream an answer as JSON lines; Ctrl+C cancels
    Stream {
        question: String,

        #[arg(short, long, default_value = "hybrid")]
        strategy: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(short, long)]
        temperature: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&ObservabilityConfig::default());
            error!(error = %e, "Failed to load configuration");
            return Err(e);
        }
    };
    init_tracing(&config.observability);
    config.validate()?;

    info!("Starting RagForge v{}", ragforge_common::VERSION);
    metrics::register_metrics();

    let default_temperature = config.generation.temperature;
    let app = RagApp::from_config(config).await?;

    match &cli.corpus {
        Some(path) => {
            let documents = load_corpus(path).await?;
            let report = app.ingestor.ingest(documents).await?;
            info!(
                path = %path.display(),
                documents = report.corpus_size,
                embedded = report.embedded,
                "Corpus loaded"
            );
        }
        None => warn!("No corpus given, answers will have no sources"),
    }

    match cli.command {
        Commands::Query {
            question,
            strategy,
            top_k,
            temperature,
            no_cache,
            highlight,
        } => {
            let request = build_request(question, strategy, top_k, temperature.unwrap_or(default_temperature))
                .use_cache(!no_cache);
            let response = app.pipeline.query(request).await?;

            if highlight {
                let highlighted = highlight_citations(&response.answer, &response.sources);
                print_json(&serde_json::json!({
                    "response": response,
                    "highlighted_answer": highlighted,
                }))?;
            } else {
                print_json(&response)?;
            }
        }

        Commands::Compare {
            question,
            strategies,
            top_k,
        } => {
            let strategies = if strategies.is_empty() {
                Strategy::ALL.iter().map(|s| s.as_str().to_string()).collect()
            } else {
                strategies
            };
            let comparison = app.pipeline.compare_strategies(&question, &strategies, top_k).await;
            print_json(&comparison)?;
        }

        Commands::Stream {
            question,
            strategy,
            top_k,
            temperature,
        } => {
            let request = build_request(question, strategy, top_k, temperature.unwrap_or(default_temperature));

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling");
                    on_interrupt.cancel();
                }
            });

            let mut events = Box::pin(app.pipeline.stream_query(request, cancel));
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    let session = app.tracker.session_metrics();
    info!(
        total_queries = session.total_queries,
        cache_hits = session.cache_hits,
        total_tokens = session.total_tokens,
        total_cost = session.total_cost,
        "Session summary"
    );

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    };
    config.context("invalid configuration")
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_request(question: String, strategy: String, top_k: Option<usize>, temperature: f32) -> QueryRequest {
    let request = QueryRequest::new(question)
        .strategy(strategy)
        .temperature(temperature);
    match top_k {
        Some(top_k) => request.top_k(top_k),
        None => request,
    }
}

async fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read corpus {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Document>(line)
                .with_context(|| format!("{}:{}: invalid document", path.display(), i + 1))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
