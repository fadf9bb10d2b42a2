//! Dowse CLI - binary entry point.
//!
//! Loads configuration, initializes tracing, runs one pipeline query, and
//! prints the result. Ctrl-C cancels the run cooperatively; every in-flight
//! LLM call and page fetch is torn down before the process exits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dowse_config::Config;
use dowse_pipeline::Pipeline;
use dowse_types::{FinalResult, Query};

#[derive(Parser)]
#[command(
    name = "dowse",
    version,
    about = "Answer a question by searching, reading, and synthesizing the public web"
)]
struct Args {
    /// The question to answer.
    query: String,

    /// Path to a TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_tracing(config.log_level());

    let pipeline = Pipeline::new(config)?;
    let query = Query::new(&args.query).context("query must not be empty")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            signal_cancel.cancel();
        }
    });

    let result = pipeline.run(&query, &cancel).await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text(&result),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            Ok(Config::from_toml_str(&text)?)
        }
        None => Ok(Config::default()),
    }
}

/// `RUST_LOG` wins over the configured level; logs go to stderr so stdout
/// stays clean for the result.
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_text(result: &FinalResult) {
    println!("{}", result.final_answer);

    if result.docs.is_empty() {
        return;
    }

    println!("\nSources:");
    for (i, doc) in result.docs.iter().enumerate() {
        println!("  {}. [{}] {} ({})", i + 1, doc.relevance, doc.title, doc.url);
    }
}
