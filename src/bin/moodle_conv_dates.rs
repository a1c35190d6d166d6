// src/bin/moodle_conv_dates.rs

use anyhow::Result;
use clap::Parser;
use gradetools::{
    logging,
    moodle::dates::{convert_csv_file, DEFAULT_DATE_COLUMN, DEFAULT_DATE_FORMAT},
};
use std::path::PathBuf;
use tracing::info;

/// Converts the date column of a Moodle grading worksheet to a parseable
/// 'YYYY-MM-DD HH:MM' format.
#[derive(Parser)]
#[command(name = "moodle-conv-dates", version, about)]
struct Cli {
    /// Path to the grading worksheet to read
    input_csv: PathBuf,

    /// Path to the output csv file
    output_csv: PathBuf,

    /// Column which contains the date to be converted
    #[arg(long, default_value = DEFAULT_DATE_COLUMN)]
    column: String,

    /// Current date format to parse (strftime syntax)
    #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
    format: String,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::directives(cli.verbose));

    let lines = convert_csv_file(
        &cli.input_csv,
        Some(&cli.output_csv),
        &cli.column,
        &cli.format,
    )?;
    info!(rows = lines.len().saturating_sub(1), "converted");
    Ok(())
}
