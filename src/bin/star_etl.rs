//! star_etl - warehouse loader CLI
//!
//! Usage:
//!   cargo run --bin star_etl -- init-schema
//!   cargo run --bin star_etl -- load --data-dir data
//!   cargo run --bin star_etl -- load --data-dir data --dry-run --json
//!   cargo run --bin star_etl -- report top-customers --limit 5
//!
//! Connection settings come from DATABASE_URL or the POSTGRES_* variables,
//! optionally via a .env file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use star_etl::analytics::{AnalyticQuery, AnalyticsService};
use star_etl::database::{DatabaseConfig, Warehouse};
use star_etl::etl::{validate_sources, LoadOptions, LoadReport, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "star_etl")]
#[command(about = "Load e-commerce CSV files into a star-schema warehouse")]
struct Cli {
    /// Database URL (overrides DATABASE_URL and POSTGRES_*)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the warehouse tables if they do not exist
    InitSchema,

    /// Truncate the warehouse and reload it from the CSV files
    Load {
        /// Directory holding dim_*.csv and fact_orders.csv
        #[arg(long, short = 'd', env = "ETL_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Halt and roll back on the first rejected record
        #[arg(long)]
        strict: bool,

        /// Validate the source files without writing to the warehouse
        #[arg(long, short = 'n')]
        dry_run: bool,

        /// Output the load report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one of the analytic queries
    Report {
        /// revenue-by-category, monthly-revenue, payment-mix, top-customers, quarterly-brand
        #[arg(value_parser = parse_query)]
        query: AnalyticQuery,

        /// Row limit for top-customers
        #[arg(long, short = 'l')]
        limit: Option<i64>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_query(s: &str) -> Result<AnalyticQuery, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = cli.database_url;

    match cli.command {
        Command::InitSchema => {
            let warehouse = connect(database_url).await?;
            warehouse
                .apply_schema()
                .await
                .context("Failed to apply warehouse schema")?;
            println!("{} warehouse schema ready", "OK".green().bold());
            warehouse.close().await;
        }
        Command::Load {
            data_dir,
            strict,
            dry_run,
            json,
        } => {
            if !data_dir.is_dir() {
                bail!(star_etl::ConfigError::DataDirNotFound { path: data_dir });
            }
            let report = if dry_run {
                validate_sources(&data_dir, strict).context("Source validation failed")?
            } else {
                let warehouse = connect(database_url).await?;
                let options = LoadOptions { strict, dry_run };
                let result = Pipeline::new(&warehouse, options).run(&data_dir).await;
                warehouse.close().await;
                result.context("ETL failed")?
            };
            print_load_report(&report, json)?;
        }
        Command::Report { query, limit, json } => {
            let warehouse = connect(database_url).await?;
            let service = AnalyticsService::new(warehouse.pool().clone());
            let table = service.run(query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                print!("{}", table);
            }
            warehouse.close().await;
        }
    }

    Ok(())
}

/// Configuration is only read by commands that need the warehouse
async fn connect(database_url: Option<String>) -> Result<Warehouse> {
    let config = DatabaseConfig::from_env_with_url(database_url)
        .context("Invalid database configuration")?;
    Warehouse::connect(&config)
        .await
        .context("Failed to connect to the warehouse")
}

fn print_load_report(report: &LoadReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    print!("{}", report);

    if report.is_clean() {
        println!("\n{} no records rejected", "OK".green().bold());
    } else {
        println!(
            "\n{} {} records rejected:",
            "WARNING:".yellow().bold(),
            report.total_rejected()
        );
        for rejection in &report.rejections {
            println!("  {}", rejection);
        }
    }
    println!("{} {}ms", "Duration:".cyan(), report.duration_ms);
    Ok(())
}
