// src/sheets/cache.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::{debug, info, instrument};

use super::{
    a1::SheetRange,
    client::ValueSource,
    columns::{ColumnMap, ColumnPatterns},
};
use crate::config::SheetsConfig;

/// One data row as fetched, with its absolute position on the sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub row: Vec<String>,
    pub row_num: u32,
    pub parent_sheet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetInfo {
    pub range: SheetRange,
    pub column_map: ColumnMap,
}

/// Everything fetched from the configured ranges; this is also the cache file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetData {
    pub values: Vec<RowRecord>,
    pub meta: BTreeMap<String, SheetInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Always go to the API and rewrite the cache.
    Refresh,
    /// Use the cache when present.
    PreferCache,
    /// Never touch the API.
    CacheOnly,
}

impl SheetData {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading cache {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing cache {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json).with_context(|| format!("writing cache {}", path.display()))
    }

    /// Pull every configured range through `source`. The first row of each
    /// range is its header.
    #[instrument(level = "info", skip_all, fields(ranges = cfg.sheet_ranges.len()))]
    pub async fn fetch<S: ValueSource>(cfg: &SheetsConfig, source: &S) -> Result<Self> {
        if cfg.sheet_ranges.is_empty() {
            bail!("no sheetRanges configured");
        }
        let patterns = ColumnPatterns::compile(&cfg.column_patterns)?;
        let mut data = SheetData::default();

        for range_str in &cfg.sheet_ranges {
            let range = SheetRange::parse(range_str)
                .with_context(|| format!("parsing configured range {:?}", range_str))?;
            let rows = source
                .get_values(range_str)
                .await
                .with_context(|| format!("fetching range {}", range_str))?;

            let sheet = range.sheet_key().to_string();
            let mut rows = rows.into_iter();
            let Some(header) = rows.next() else {
                debug!(range = %range_str, "range is empty");
                continue;
            };
            let column_map = patterns
                .build_column_map(&header)
                .with_context(|| format!("mapping header of {}", range_str))?;

            let header_row = range.first_row().unwrap_or(1);
            let before = data.values.len();
            for (offset, row) in rows.enumerate() {
                if row.first().map_or(true, |c| c.is_empty()) {
                    continue;
                }
                data.values.push(RowRecord {
                    row,
                    row_num: header_row + 1 + offset as u32,
                    parent_sheet: sheet.clone(),
                });
            }
            info!(
                range = %range_str,
                columns = column_map.len(),
                rows = data.values.len() - before,
                "fetched range"
            );
            data.meta.insert(sheet, SheetInfo { range, column_map });
        }
        Ok(data)
    }

    /// The record on the sheet and first row of `target`.
    pub fn find(&self, target: &SheetRange) -> Option<(&RowRecord, &SheetInfo)> {
        let sheet = target.sheet_key();
        let row_num = target.first_row()?;
        self.values
            .iter()
            .find(|r| r.parent_sheet == sheet && r.row_num == row_num)
            .and_then(|r| self.meta.get(&r.parent_sheet).map(|info| (r, info)))
    }

    pub fn info(&self, sheet: &str) -> Option<&SheetInfo> {
        self.meta.get(sheet)
    }

    /// A1 address of the record's first cell.
    pub fn a1_of(&self, record: &RowRecord) -> String {
        let (sheet, column) = match self.meta.get(&record.parent_sheet) {
            Some(info) => (info.range.sheet.as_deref(), info.range.first_column()),
            None => (Some(record.parent_sheet.as_str()).filter(|s| !s.is_empty()), None),
        };
        SheetRange::cell(sheet, column, Some(record.row_num)).to_a1()
    }
}

/// Load the cache or fetch through `source`, per `mode`. Fresh data is
/// written back to the cache.
pub async fn load_or_fetch<S: ValueSource>(
    cfg: &SheetsConfig,
    source: Option<&S>,
    mode: FetchMode,
) -> Result<SheetData> {
    let cache_path = cfg.cache_path();
    let cached = cache_path.exists();
    match mode {
        FetchMode::CacheOnly if !cached => {
            bail!("Cached data not found: {}", cache_path.display())
        }
        FetchMode::CacheOnly | FetchMode::PreferCache if cached => {
            debug!(path = %cache_path.display(), "using cached data");
            return SheetData::load(&cache_path);
        }
        _ => {}
    }

    let source = source.context("no spreadsheet connection available to fetch data")?;
    let data = SheetData::fetch(cfg, source).await?;
    data.save(&cache_path)?;
    info!(path = %cache_path.display(), rows = data.values.len(), "cached data");
    Ok(data)
}
