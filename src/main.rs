mod config;
mod error;
mod models;
mod pipeline;
mod quandl;
mod scraper;
mod storage;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::scraper::http_client::HttpClient;
use crate::scraper::{HkexScraper, PageFetcher};
use crate::storage::{Repository, Table};

#[derive(Parser)]
#[command(name = "hkex-etl", about = "HKEX market data collection", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CollectTarget {
    /// Per-stock industry overview rows (AASTOCKS tab 1)
    Industry,
    /// Per-stock trailing-return rows (AASTOCKS tab 3)
    Performance,
    /// Sector roll-up rows
    Sector,
    /// Historical prices for every listed code (CSV API)
    Prices,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape one target for one date and bulk-load it
    Collect {
        #[arg(value_enum)]
        target: CollectTarget,

        /// Trading date, e.g. 2021-02-26
        #[arg(short, long)]
        date: NaiveDate,
    },

    /// Fetch and load the full price history for one code
    Backfill { code: u32 },

    /// Show recent closes for one code with day-over-day change
    Quote {
        code: u32,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Look up a company's listing name by code
    Lookup { code: u32 },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without collecting
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "hkex_etl=info,warn",
        1 => "hkex_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Collect { target, date } => {
            let _t = utils::Timer::start(format!("collect {:?} {}", target, date));
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }

            let pipeline = Pipeline::new(config)?;
            let stats = match target {
                CollectTarget::Industry => pipeline.collect_industry_overview(&repo, date).await?,
                CollectTarget::Performance => {
                    pipeline.collect_industry_performance(&repo, date).await?
                }
                CollectTarget::Sector => pipeline.collect_sector_overview(&repo, date).await?,
                CollectTarget::Prices => pipeline.collect_prices(&repo, date).await?,
            };

            if stats.skipped {
                info!("{}: already collected for {}", stats.target, date);
            } else {
                info!(
                    "Done: {} pages, {} records, {} errors",
                    stats.pages, stats.records, stats.errors
                );
            }
        }

        Command::Backfill { code } => {
            let _t = utils::Timer::start(format!("backfill {code}"));
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }
            let pipeline = Pipeline::new(config)?;
            let stats = pipeline.backfill_code(&repo, code).await?;
            info!("Done: {} records", stats.records);
        }

        Command::Quote { code, limit } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let quotes = repo.recent_closes(code, limit)?;
            if quotes.is_empty() {
                println!("No stored prices for {code} — run `hkex-etl collect prices` first.");
            } else {
                for q in &quotes {
                    println!("{}  {}  {:>10.3}  {:>8}", q.code, q.date, q.close, q.change_fmt);
                }
            }
        }

        Command::Lookup { code } => {
            let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpClient::new(&config.scraper)?);
            let hkex = HkexScraper::new(fetcher, &config.scraper);
            match hkex.company_name(code).await? {
                Some(listing) => println!("{}", serde_json::to_string_pretty(&listing)?),
                None => println!("No listing found for {code}."),
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let (min, max) = repo.stock_date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  HKEX ETL — Database Stats");
            println!("─────────────────────────────────");
            for table in [
                Table::Stock,
                Table::Industry,
                Table::IndustryPerformance,
                Table::Sector,
            ] {
                let count = repo.row_count(table).unwrap_or(0);
                println!("  {:<20} : {}", table.as_str(), utils::fmt_number(count));
            }
            println!("  Prices from          : {}", min.unwrap_or("—".into()));
            println!("  Prices to            : {}", max.unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
