// src/sheets/commands.rs

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

use super::{
    a1::{column_index_to_letter, column_letter_to_index, SheetRange},
    cache::{load_or_fetch, FetchMode, RowRecord, SheetData, SheetInfo},
    client::ValueSource,
    columns::remap_row,
    template,
};
use crate::config::SheetsConfig;

/// Range -> single-cell value grid, as sent to `values:batchUpdate`.
pub type UpdatePlan = BTreeMap<String, Vec<Vec<String>>>;

/// Template variables for one row: every mapped column plus `row_num`,
/// `a1_str` and `obj_str`.
pub fn row_vars(data: &SheetData, record: &RowRecord, info: &SheetInfo) -> Result<HashMap<String, String>> {
    let obj = remap_row(&record.row, &info.column_map);
    let mut vars: HashMap<String, String> =
        obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.insert("obj_str".into(), serde_json::to_string(&obj)?);
    vars.insert("a1_str".into(), data.a1_of(record));
    vars.insert("row_num".into(), record.row_num.to_string());
    Ok(vars)
}

/// Every row rendered with `template`.
pub fn list_lines(data: &SheetData, template_str: &str) -> Result<Vec<String>> {
    data.values
        .iter()
        .map(|record| {
            let info = data
                .meta
                .get(&record.parent_sheet)
                .with_context(|| format!("no metadata for sheet {:?}", record.parent_sheet))?;
            template::render(template_str, &row_vars(data, record, info)?)
        })
        .collect()
}

/// The row addressed by `target` rendered with `template`, if present.
pub fn info_line(data: &SheetData, target: &SheetRange, template_str: &str) -> Result<Option<String>> {
    match data.find(target) {
        Some((record, info)) => Ok(Some(template::render(
            template_str,
            &row_vars(data, record, info)?,
        )?)),
        None => Ok(None),
    }
}

/// `fetch-data`: refresh (or read the cache when `cached`) and render the
/// listing, or just the `filter` row.
#[instrument(level = "info", skip(cfg, source))]
pub async fn fetch_data<S: ValueSource>(
    cfg: &SheetsConfig,
    source: Option<&S>,
    cached: bool,
    filter: Option<&str>,
) -> Result<Vec<String>> {
    let mode = if cached {
        FetchMode::CacheOnly
    } else {
        FetchMode::Refresh
    };
    let data = load_or_fetch(cfg, source, mode).await?;

    if let Some(filter) = filter {
        let target = SheetRange::parse(filter)
            .with_context(|| format!("parsing filter range {:?}", filter))?;
        let line = info_line(&data, &target, &cfg.info_format)?
            .unwrap_or_else(|| "Object not found!".to_string());
        return Ok(vec![line]);
    }
    list_lines(&data, &cfg.list_format)
}

/// `get-metadata`: the detected sheet metadata as pretty JSON.
pub fn metadata_json(data: &SheetData) -> Result<String> {
    Ok(serde_json::to_string_pretty(&data.meta)?)
}

/// Resolve `[column=]value` assignments relative to `target`. A named
/// column is offset from the A1's column by its position in the sheet's
/// range; a bare value goes to `target` itself.
pub fn plan_update(data: &SheetData, target: &SheetRange, values: &[String]) -> Result<UpdatePlan> {
    let mut plan = UpdatePlan::new();
    for value in values {
        let (range, cell_value) = match value.split_once('=') {
            // a leading '=' is a formula, not an assignment
            Some((column, cell_value)) if !column.is_empty() => {
                (column_cell(data, target, column)?, cell_value)
            }
            _ => (target.clone(), value.as_str()),
        };
        plan.insert(range.to_a1(), vec![vec![cell_value.to_string()]]);
    }
    Ok(plan)
}

fn column_cell(data: &SheetData, target: &SheetRange, column: &str) -> Result<SheetRange> {
    let sheet = target.sheet_key();
    let info = data
        .info(sheet)
        .with_context(|| format!("no metadata for sheet {:?}", sheet))?;
    let offset = *info
        .column_map
        .get(column)
        .with_context(|| format!("unknown column {:?} on sheet {:?}", column, sheet))?;
    let Some(base_letters) = target.first_column() else {
        bail!("{} names no column to offset {:?} from", target, column);
    };
    let base = column_letter_to_index(base_letters)?;
    let index = u32::try_from(offset)
        .ok()
        .and_then(|o| base.checked_add(o))
        .with_context(|| format!("column {:?} is out of range", column))?;
    Ok(SheetRange::cell(
        target.sheet.as_deref(),
        Some(&column_index_to_letter(index)),
        target.first_row(),
    ))
}

/// The `set {...}` line printed before an update is applied.
pub fn describe_plan(plan: &UpdatePlan) -> Result<String> {
    Ok(format!("set {}", serde_json::to_string(plan)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::cache::tests::{config, gradebook, FakeSource};
    use tempfile::tempdir;

    async fn data() -> Result<SheetData> {
        let dir = tempdir()?;
        let cfg = config(&dir.path().join("cache.json"));
        SheetData::fetch(&cfg, &gradebook()).await
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn plans_column_offsets() -> Result<()> {
        let data = data().await?;
        let target = SheetRange::parse("'Lab Grades'!B6")?;
        let plan = plan_update(&data, &target, &strings(&["Lab2=10", "note", "=SUM(D6:E6)"]))?;

        let entries: Vec<(&str, &str)> = plan
            .iter()
            .map(|(k, v)| (k.as_str(), v[0][0].as_str()))
            .collect();
        // bare values share the target cell; the later one wins
        assert_eq!(
            entries,
            [("'Lab Grades'!B6", "=SUM(D6:E6)"), ("'Lab Grades'!E6", "10")]
        );
        assert_eq!(
            describe_plan(&plan)?,
            r#"set {"'Lab Grades'!B6":[["=SUM(D6:E6)"]],"'Lab Grades'!E6":[["10"]]}"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn plan_rejects_unknown_targets() -> Result<()> {
        let data = data().await?;
        let on_lab = SheetRange::parse("'Lab Grades'!B6")?;
        assert!(plan_update(&data, &on_lab, &strings(&["Lab9=1"])).is_err());
        let other = SheetRange::parse("Other!B6")?;
        assert!(plan_update(&data, &other, &strings(&["Lab2=1"])).is_err());
        let no_col = SheetRange::parse("'Lab Grades'!6")?;
        assert!(plan_update(&data, &no_col, &strings(&["Lab2=1"])).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn renders_listing_and_lookup() -> Result<()> {
        let data = data().await?;
        let lines = list_lines(&data, "{a1_str} | {obj_str}")?;
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            r#"'Lab Grades'!B4 | {"username":"jdoe","email":"jdoe@uni.edu","Lab1":"9","Lab2":"10"}"#
        );
        assert_eq!(lines[2], r#"Exam!A2 | {"username":"jdoe","email":"jdoe@uni.edu","Grade":"8"}"#);

        let target = SheetRange::parse("'Lab Grades'!6")?;
        let line = info_line(&data, &target, "{row_num}: {username} {Lab1}")?;
        assert_eq!(line.as_deref(), Some("6: asmith 7"));

        // asmith has no Lab2 cell, so the placeholder is unknown
        assert!(info_line(&data, &target, "{Lab2}").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn fetch_data_filters_from_cache() -> Result<()> {
        let dir = tempdir()?;
        let cfg = config(&dir.path().join("cache.json"));
        let source = gradebook();

        let lines = fetch_data(&cfg, Some(&source), false, None).await?;
        assert_eq!(lines.len(), 3);

        let found = fetch_data::<FakeSource>(&cfg, None, true, Some("Exam!2")).await?;
        assert_eq!(found, ["Exam!A2: jdoe: {\"username\":\"jdoe\",\"email\":\"jdoe@uni.edu\",\"Grade\":\"8\"}"]);
        let missing = fetch_data::<FakeSource>(&cfg, None, true, Some("Exam!9")).await?;
        assert_eq!(missing, ["Object not found!"]);
        assert!(metadata_json(&data().await?)?.contains("\"Lab Grades\""));
        Ok(())
    }
}
