// src/bin/gsheet_tool.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gradetools::{
    config::{GradingConfig, DEFAULT_CONFIG_FILE},
    logging,
    sheets::{
        a1::SheetRange,
        auth::authorize,
        cache::{load_or_fetch, FetchMode},
        client::SheetsClient,
        commands::{describe_plan, fetch_data, metadata_json, plan_update},
    },
};
use reqwest::Client;
use std::path::PathBuf;
use tracing::info;

/// Fetch gradebook rows from Google Sheets and set individual cells.
#[derive(Parser)]
#[command(name = "gsheet-tool", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate against the Google API and save the token
    Auth,
    /// Fetch & cache all ranges from the spreadsheet
    #[command(alias = "fetch_data")]
    FetchData {
        /// Read from the cache only
        #[arg(long)]
        cached: bool,
        /// Only print the row at this A1 reference
        #[arg(long)]
        filter_range: Option<String>,
    },
    /// Print the spreadsheet's detected metadata
    #[command(alias = "get_metadata")]
    GetMetadata,
    /// Set cell values on one row
    Update {
        /// A1 identifier of the row/cell to change (including sheet name)
        #[arg(long)]
        a1: String,
        /// '[column=]value' to set; may be given multiple times
        #[arg(long = "value", alias = "val", required = true)]
        values: Vec<String>,
        /// Print what would be set without touching the sheet
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

async fn connect(cfg: &GradingConfig, http: &Client) -> Result<SheetsClient> {
    let token = authorize(&cfg.google_auth, http).await?;
    Ok(SheetsClient::new(
        http.clone(),
        token,
        cfg.google_sheets.id.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::directives(cli.verbose));

    let cfg = GradingConfig::load(&cli.config)?;
    let sheets = &cfg.google_sheets;
    let http = Client::new();

    match cli.cmd {
        Command::Auth => {
            authorize(&cfg.google_auth, &http).await?;
            println!("Authentication successful (token saved)!");
        }
        Command::FetchData {
            cached,
            filter_range,
        } => {
            let client = if cached {
                None
            } else {
                Some(connect(&cfg, &http).await?)
            };
            for line in fetch_data(sheets, client.as_ref(), cached, filter_range.as_deref()).await? {
                println!("{}", line);
            }
        }
        Command::GetMetadata => {
            let data = load_or_fetch::<SheetsClient>(sheets, None, FetchMode::CacheOnly).await?;
            println!("{}", metadata_json(&data)?);
        }
        Command::Update {
            a1,
            values,
            dry_run,
        } => {
            let data = load_or_fetch::<SheetsClient>(sheets, None, FetchMode::CacheOnly).await?;
            let target =
                SheetRange::parse(&a1).with_context(|| format!("parsing --a1 {:?}", a1))?;
            let plan = plan_update(&data, &target, &values)?;
            println!("{}", describe_plan(&plan)?);
            if dry_run {
                info!(ranges = plan.len(), "dry run; sheet not updated");
            } else {
                let client = connect(&cfg, &http).await?;
                client.batch_update(&plan).await?;
            }
        }
    }
    Ok(())
}
