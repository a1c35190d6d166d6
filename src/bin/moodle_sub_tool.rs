// src/bin/moodle_sub_tool.rs

use anyhow::Result;
use clap::Parser;
use gradetools::{
    logging,
    moodle::{
        submissions::{organize, OrganizeOptions, RenamePolicy},
        worksheet::read_grading_worksheet,
    },
};
use std::{io, path::PathBuf};
use tracing::info;

/// Renames Moodle submission directories to the student's name, email or
/// username, and optionally extracts the archive inside each one.
///
/// Directories must be named '<Last Name> <FIRST NAME>_<ID>_<suffix>'. Email
/// based renames need the assignment's offline grading worksheet (csv).
#[derive(Parser)]
#[command(name = "moodle-sub-tool", version, about)]
struct Cli {
    /// The submissions directory
    directory: PathBuf,

    /// Grading worksheet to use for renaming (csv format)
    #[arg(short = 'w', long)]
    sheet: Option<PathBuf>,

    /// Extract archives
    #[arg(short = 'x', long)]
    extract: bool,

    /// Rename method (default 'fname', or 'email' when --sheet is given)
    #[arg(short, long, value_enum)]
    rename: Option<RenamePolicy>,

    /// Do a dry run (take no disk actions)
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(logging::directives(cli.verbose));

    let students = match &cli.sheet {
        Some(path) => {
            let map = read_grading_worksheet(path)?;
            info!(students = map.len(), "loaded grading worksheet");
            Some(map)
        }
        None => None,
    };
    let opts = OrganizeOptions {
        students,
        rename: cli.rename,
        extract: cli.extract,
        dry_run: cli.dry_run,
    };

    let report = organize(&cli.directory, &opts, &mut io::stdout().lock())?;
    info!(
        renamed = report.renamed,
        extracted = report.extracted,
        failed = report.failed,
        "finished"
    );
    Ok(())
}
