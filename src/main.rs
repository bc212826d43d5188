//! # Listing Harvester CLI (`harvest`)
//!
//! Harvests listing records from a paginated search API or a server-rendered
//! search page, normalizes them into flat rows and writes CSV files.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest plan` | Print the partition plan and the filter each band sends |
//! | `harvest run api` | Harvest every partition from the search API |
//! | `harvest run page` | Harvest the rendered search page as one partition |
//! | `harvest consolidate` | Merge the latest day's partition files on disk |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr so
//! the summary on stdout stays parseable.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use listing_harvester::commands::{self, SourceKind};
use listing_harvester::config;

/// Listing Harvester: partitioned, rate-limited listing collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harvest.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "harvest", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the partition plan.
    ///
    /// Shows each price band with its bounds and the filter expression the
    /// search API receives for it.
    Plan,

    /// Harvest listings from a configured source.
    Run {
        #[command(subcommand)]
        source: RunSource,

        /// Stop each partition after this many pages (overrides config).
        #[arg(long, global = true)]
        max_pages: Option<u32>,
    },

    /// Merge partition files already written to the output directory.
    Consolidate {
        /// Merge units captured on this date (YYYY-MM-DD). Defaults to the
        /// latest capture date found in the output directory.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Merge every unit on disk regardless of capture date.
        #[arg(long, conflicts_with = "date")]
        all: bool,
    },
}

#[derive(Subcommand)]
enum RunSource {
    /// The structured search API (`[api]`), one query per partition.
    Api,
    /// The server-rendered search page (`[page]`).
    Page,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Plan => {
            commands::show_plan(&cfg)?;
        }
        Commands::Run { source, max_pages } => {
            let kind = match source {
                RunSource::Api => SourceKind::Api,
                RunSource::Page => SourceKind::Page,
            };
            commands::run_harvest(&cfg, kind, max_pages).await?;
        }
        Commands::Consolidate { date, all } => {
            commands::run_consolidate(&cfg, date, all)?;
        }
    }

    Ok(())
}
