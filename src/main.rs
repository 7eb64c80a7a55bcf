mod config;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, StorageBackend};
use crate::pipeline::{BarObserver, LogObserver, Pipeline, ProgressObserver, RunSummary};
use crate::storage::DuckDbSink;

#[derive(Parser)]
#[command(name = "storefront-scraper", about = "Ranked product price scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape all listing pages, rank products and append them to the table (default)
    Scrape {
        /// Number of listing pages to scrape
        #[arg(long, env = "STOREFRONT_PAGES")]
        pages: Option<u32>,

        /// Concurrent browser sessions
        #[arg(long, env = "STOREFRONT_WORKERS")]
        workers: Option<usize>,

        /// Scrape and rank without writing to the database
        #[arg(long)]
        no_persist: bool,

        /// Log each page instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Create the destination table without scraping
    Migrate,

    /// Show stored row statistics (DuckDB backend)
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "storefront_scraper=info,warn",
        1 => "storefront_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    let command = cli.command.unwrap_or(Command::Scrape {
        pages: None,
        workers: None,
        no_persist: false,
        no_progress: false,
    });

    match command {
        Command::Scrape { pages, workers, no_persist, no_progress } => {
            if let Some(pages) = pages {
                config.pipeline.max_pages = pages;
            }
            if let Some(workers) = workers {
                config.pipeline.concurrency = workers;
            }

            let _t = utils::Timer::start("Scrape run");
            let sink = if no_persist {
                None
            } else {
                storage::open_sink(&config.storage).await?
            };

            let mut observer: Box<dyn ProgressObserver> = if no_progress {
                Box::new(LogObserver)
            } else {
                Box::new(BarObserver::new())
            };

            let summary = Pipeline::new(config)
                .run(sink.as_deref(), observer.as_mut())
                .await?;
            print_summary(&summary);
        }

        Command::Migrate => match storage::open_sink(&config.storage).await? {
            Some(sink) => {
                sink.ensure_schema().await?;
                println!("Table ready: {}", sink.describe());
            }
            None => println!("Persistence is disabled; check database settings."),
        },

        Command::Stats => {
            anyhow::ensure!(
                config.storage.backend == StorageBackend::Duckdb,
                "stats reads the local DuckDB store; query Postgres directly"
            );
            let sink = DuckDbSink::open(&config.storage.db_path, &config.storage)
                .context("Failed to open DuckDB")?;
            sink.run_migrations()?;
            let rows = sink.row_count()?;
            let (runs, latest) = sink.extraction_range()?;
            println!("─────────────────────────────────");
            println!("  Storefront Scraper · Database");
            println!("─────────────────────────────────");
            println!("  Rows     : {}", utils::fmt_number(rows));
            println!("  Runs     : {}", utils::fmt_number(runs));
            println!("  Latest   : {}", latest.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}

fn print_summary(s: &RunSummary) {
    let count = |n: usize| utils::fmt_number(n as i64);
    info!("Run finished in {:.2?}", s.elapsed);
    println!("─────────────────────────────────");
    println!("  Storefront Scraper · Run Summary");
    println!("─────────────────────────────────");
    println!("  Pages attempted  : {}", count(s.pages_attempted));
    println!("  Pages with data  : {}", count(s.pages_with_data));
    println!("  Pages with error : {}", count(s.pages_with_error));
    println!("  Products         : {}", count(s.products_extracted));
    println!("  Rows inserted    : {}", count(s.rows_persisted));
    println!("  Elapsed          : {}", utils::fmt_elapsed(s.elapsed));
    println!("─────────────────────────────────");
}
