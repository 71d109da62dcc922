//! Vector Indexer
//!
//! Command line entry point: starts batch runs, reports and cancels runs,
//! streams datapoints into the index and runs searches.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vector_indexer::{AppConfig, Dependencies, IndexingError};
use vector_indexer_pipeline::{IngestOutcome, SearchRequest};
use vector_indexer_repository::shards::parse_lines;
use vector_indexer_repository::NamespaceFilter;
use vector_indexer_shared::{Datapoint, RunRequest};

#[derive(Parser)]
#[command(name = "vector-indexer")]
#[command(about = "Batch and streaming updates for a vector search index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run from a JSON request file and wait for it to finish
    Run {
        /// Path to the run request
        #[arg(long)]
        request: PathBuf,
    },
    /// Show the latest recorded state of a run
    Status { run_id: String },
    /// Cancel a run
    Cancel { run_id: String },
    /// Upsert pre-embedded datapoints from a JSON lines file
    StreamUpsert {
        #[arg(long)]
        file: PathBuf,
    },
    /// Remove datapoints by id
    StreamDelete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Find the nearest neighbors of a text or vector query
    Search {
        /// Query text
        #[arg(long, conflicts_with = "vector", required_unless_present = "vector")]
        text: Option<String>,
        /// Query vector as a JSON array
        #[arg(long)]
        vector: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        /// Namespace filter, `namespace=token1,token2`
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Add a sparse query vector
        #[arg(long)]
        hybrid: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), IndexingError> {
    let config = AppConfig::from_env()?;
    let deps = Dependencies::new(&config).await?;
    let orchestrator = &deps.orchestrator;

    match cli.command {
        Commands::Run { request } => {
            let request: RunRequest = serde_json::from_slice(&tokio::fs::read(&request).await?)?;
            let run_id = orchestrator.start_run(request).await?;
            info!(run_id = %run_id, "Run started, press Ctrl-C to cancel");

            let run = tokio::select! {
                run = orchestrator.wait(&run_id) => run?,
                _ = tokio::signal::ctrl_c() => {
                    warn!(run_id = %run_id, "Interrupted, cancelling run");
                    orchestrator.cancel(&run_id).await?;
                    orchestrator.wait(&run_id).await?
                }
            };
            print_json(&serde_json::to_value(&run)?);
        }
        Commands::Status { run_id } => {
            let run = orchestrator.get_status(&run_id).await?;
            print_json(&serde_json::to_value(&run)?);
        }
        Commands::Cancel { run_id } => {
            let run = orchestrator.cancel(&run_id).await?;
            print_json(&serde_json::to_value(&run)?);
        }
        Commands::StreamUpsert { file } => {
            let datapoints: Vec<Datapoint> = parse_lines(&tokio::fs::read(&file).await?)?;
            let outcome = orchestrator.stream_upsert(datapoints).await?;
            print_outcome(&outcome);
        }
        Commands::StreamDelete { ids } => {
            let outcome = orchestrator.stream_delete(ids).await?;
            print_outcome(&outcome);
        }
        Commands::Search {
            text,
            vector,
            top_k,
            filters,
            hybrid,
        } => {
            let mut request = match (text, vector) {
                (Some(text), _) => SearchRequest::text(text),
                (None, Some(vector)) => SearchRequest::vector(serde_json::from_str(&vector)?),
                (None, None) => return Err(IndexingError::config("search needs --text or --vector")),
            };
            request.top_k = top_k;
            request.hybrid = hybrid.then_some(true);
            for filter in &filters {
                request = request.with_filter(parse_filter(filter)?);
            }
            let neighbors = deps.search.search(&request).await?;
            print_json(&serde_json::to_value(&neighbors)?);
        }
    }
    Ok(())
}

/// Parse `namespace=token1,token2`; tokens prefixed with `!` are denied.
fn parse_filter(value: &str) -> Result<NamespaceFilter, IndexingError> {
    let (namespace, tokens) = value
        .split_once('=')
        .ok_or_else(|| IndexingError::config(format!("filter must be namespace=tokens: {}", value)))?;
    let mut filter = NamespaceFilter {
        namespace: namespace.trim().to_string(),
        ..Default::default()
    };
    for token in tokens.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.strip_prefix('!') {
            Some(denied) => filter.deny.push(denied.to_string()),
            None => filter.allow.push(token.to_string()),
        }
    }
    if filter.namespace.is_empty() {
        return Err(IndexingError::config(format!("filter has no namespace: {}", value)));
    }
    Ok(filter)
}

fn print_outcome(outcome: &IngestOutcome) {
    let rejected: Vec<_> = outcome
        .rejected
        .iter()
        .map(|(id, reason)| json!({"id": id, "reason": reason.code(), "detail": reason.to_string()}))
        .collect();
    print_json(&json!({
        "ingested": outcome.ingested.len(),
        "rejected": rejected,
    }));
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "Failed to render output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter("color=red, !blue").unwrap();
        assert_eq!(filter.namespace, "color");
        assert_eq!(filter.allow, vec!["red".to_string()]);
        assert_eq!(filter.deny, vec!["blue".to_string()]);

        assert!(parse_filter("color").is_err());
        assert!(parse_filter("=red").is_err());
    }

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "vector-indexer",
            "search",
            "--text",
            "rust courses",
            "--top-k",
            "3",
            "--filter",
            "level=Beginner",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { text, top_k, filters, .. } => {
                assert_eq!(text.as_deref(), Some("rust courses"));
                assert_eq!(top_k, Some(3));
                assert_eq!(filters, vec!["level=Beginner".to_string()]);
            }
            _ => panic!("expected search"),
        }
    }
}
