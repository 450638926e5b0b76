//! # askdata CLI
//!
//! ## Usage
//!
//! ```bash
//! askdata --config ./config/askdata.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdata serve` | Start the HTTP server |
//! | `askdata ask "<question>"` | Answer one question end to end |
//! | `askdata check "<query>"` | Run a query through the safety gate only |
//! | `askdata catalog` | Print the schema catalog as the translator sees it |
//! | `askdata sources` | List data sources and their backends |
//! | `askdata completions <shell>` | Generate shell completions |
//!
//! `check`, `catalog` and `completions` work without a config file.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use askdata::config::{load_config, Config};
use askdata::core::prompt::AUTO_SOURCE;
use askdata::core::QueryValidator;
use askdata::dispatch::BackendRegistry;
use askdata::pipeline::{check_query, load_catalog, ChatRequest, Pipeline, PipelineOutcome};
use askdata::{server, sources};

/// askdata: ask questions of your data in plain English.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdata.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdata",
    about = "Ask questions of your data in plain English",
    version,
    long_about = "askdata translates questions into read-only queries with an external model, \
    rejects anything that is not a plain read, runs the query on the matching backend \
    (SQLite, a remote query service, ...) and summarizes the rows."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Answer a single question and print the response.
    Ask {
        question: String,

        /// Data source id, or `auto` to let the translator choose.
        #[arg(long, default_value = AUTO_SOURCE)]
        source: String,
    },

    /// Sanitize and validate a query without executing it.
    ///
    /// Exits with status 2 when the query is rejected.
    Check { query: String },

    /// Print the rendered schema catalog.
    Catalog {
        /// Only this source (all sources if unknown).
        #[arg(long)]
        source: Option<String>,
    },

    /// List catalog sources and configured backends.
    Sources,

    /// Generate shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "askdata", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Check { query } => {
            let check = check_query(&QueryValidator::new(), query);
            println!("sanitized: {}", check.sanitized);
            match &check.reason {
                None => println!("verdict:   SAFE"),
                Some(reason) => {
                    println!("verdict:   REJECTED ({})", reason);
                    std::process::exit(2);
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let cfg = config_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask { question, source } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let request = ChatRequest::new(question).with_source(source);
            let outcome = pipeline.answer(&request).await?;
            print_outcome(&outcome);
        }
        Commands::Catalog { source } => {
            let catalog = load_catalog(&cfg)?;
            let opts = cfg.prompt.limits().render;
            print!("{}", catalog.render_with(source.as_deref(), &opts));
        }
        Commands::Sources => {
            let catalog = load_catalog(&cfg)?;
            let backends = BackendRegistry::from_config(
                &cfg,
                catalog.describe().iter().map(|s| s.id.clone()),
            )?;
            sources::print_sources(&catalog, &backends);
        }
        Commands::Completions { .. } | Commands::Check { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

/// Load `path` if it exists, otherwise fall back to all defaults.
fn config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    println!("{}", outcome.response());
    match outcome {
        PipelineOutcome::Answered(a) => {
            println!();
            println!("source:     {}", a.data_source);
            println!("query:      {}", a.query);
            if let Some(c) = a.confidence {
                println!("confidence: {:.2}", c);
            }
        }
        PipelineOutcome::Rejected(r) => {
            println!();
            println!("error:      {}", r.error);
            if let Some(q) = &r.query {
                println!("query:      {}", q);
            }
        }
    }
}
