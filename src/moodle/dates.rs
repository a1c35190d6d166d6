// src/moodle/dates.rs

use anyhow::{bail, Context, Result};
use chrono::{format::ParseError, NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, WriterBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fs::File, io::Read, path::Path};
use tracing::{info, instrument};

/// Moodle's worksheet format, e.g. `Friday, 26 May 2023, 12:44 PM`.
pub const DEFAULT_DATE_FORMAT: &str = "%A, %d %B %Y, %I:%M %p";
pub const DEFAULT_DATE_COLUMN: &str = "Last modified (submission)";
pub const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tue|wed|thu|fri|sat|sun)\b",
    )
    .expect("weekday regex should compile")
});

fn parse_naive(s: &str, format: &str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(s, format).or_else(|e| {
        // date-only formats leave the time at midnight
        NaiveDate::parse_from_str(s, format)
            .map(|d| d.and_time(NaiveTime::default()))
            .map_err(|_| e)
    })
}

/// Reformat one cell. Empty cells and Moodle's `-` placeholder become empty.
pub fn convert_date(raw: &str, format: &str) -> Result<String> {
    let s = raw.trim();
    if s.is_empty() || s == "-" {
        return Ok(String::new());
    }
    let parsed = parse_naive(s, format).or_else(|e| {
        // the weekday name is not checked against the date
        if !format.contains("%A") && !format.contains("%a") {
            return Err(e);
        }
        let without_weekday = WEEKDAY_RE.replace_all(s, "");
        let format = format.replace("%A", "").replace("%a", "");
        parse_naive(&without_weekday, &format).map_err(|_| e)
    });
    match parsed {
        Ok(dt) => Ok(dt.format(OUTPUT_DATE_FORMAT).to_string()),
        Err(e) => bail!("cannot parse {:?} with format {:?}: {}", s, format, e),
    }
}

/// Read a worksheet and rewrite the `column` dates. The header row is kept;
/// data rows with fewer than two fields are dropped.
pub fn convert_dates<R: Read>(reader: R, column: &str, format: &str) -> Result<Vec<Vec<String>>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = rdr.records();

    let header: Vec<String> = match records.next() {
        Some(record) => record
            .context("reading header row")?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect(),
        None => bail!("input csv is empty"),
    };
    let idx = header
        .iter()
        .position(|h| h == column)
        .with_context(|| format!("Cannot find column named '{}' in input csv", column))?;

    let mut lines = vec![header];
    for (n, record) in records.enumerate() {
        let line_no = n + 2;
        let record = record.with_context(|| format!("reading row {}", line_no))?;
        if record.len() < 2 {
            continue;
        }
        let mut line: Vec<String> = record.iter().map(String::from).collect();
        if let Some(cell) = line.get_mut(idx) {
            *cell = convert_date(cell, format).with_context(|| format!("row {}", line_no))?;
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Convert `input`; when `output` is given the rows are also written there.
#[instrument(level = "info", skip(input, output), fields(input = %input.display()))]
pub fn convert_csv_file(
    input: &Path,
    output: Option<&Path>,
    column: &str,
    format: &str,
) -> Result<Vec<Vec<String>>> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let lines = convert_dates(file, column, format)
        .with_context(|| format!("converting {}", input.display()))?;

    if let Some(output) = output {
        let mut wtr = WriterBuilder::new()
            .flexible(true)
            .from_path(output)
            .with_context(|| format!("creating {}", output.display()))?;
        for line in &lines {
            wtr.write_record(line)?;
        }
        wtr.flush()?;
        info!(rows = lines.len() - 1, output = %output.display(), "wrote converted csv");
    }
    Ok(lines)
}
