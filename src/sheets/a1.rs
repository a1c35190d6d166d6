// src/sheets/a1.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)?([0-9]+)?$").expect("cell regex should compile"));

static PLAIN_SHEET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("sheet name regex should compile")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum A1Error {
    #[error("unable to parse range '{0}'")]
    InvalidRange(String),
    #[error("unable to parse A1 notation '{0}'")]
    InvalidCell(String),
    #[error("unterminated quoted sheet name in '{0}'")]
    UnterminatedSheet(String),
    #[error("row numbers start at 1 in '{0}'")]
    ZeroRow(String),
    #[error("column '{0}' is out of range")]
    ColumnOverflow(String),
}

/// One endpoint of a range: `B`, `7`, `B7`, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellRef {
    /// Uppercase column letters.
    pub column: Option<String>,
    /// 1-based row number.
    pub row: Option<u32>,
}

impl CellRef {
    pub fn new(column: Option<&str>, row: Option<u32>) -> Self {
        Self {
            column: column.map(str::to_ascii_uppercase),
            row,
        }
    }

    fn parse(component: &str, whole: &str) -> Result<Self, A1Error> {
        let caps = CELL_RE
            .captures(component)
            .ok_or_else(|| A1Error::InvalidCell(component.to_string()))?;
        let column = caps.get(1).map(|m| m.as_str().to_ascii_uppercase());
        let row = match caps.get(2) {
            Some(m) => {
                let row: u32 = m
                    .as_str()
                    .parse()
                    .map_err(|_| A1Error::InvalidCell(component.to_string()))?;
                if row == 0 {
                    return Err(A1Error::ZeroRow(whole.to_string()));
                }
                Some(row)
            }
            None => None,
        };
        Ok(Self { column, row })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(column) = &self.column {
            f.write_str(column)?;
        }
        if let Some(row) = self.row {
            write!(f, "{}", row)?;
        }
        Ok(())
    }
}

/// A parsed A1 reference such as `'Lab Grades'!B2:K40`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SheetRange {
    pub sheet: Option<String>,
    /// Always holds at least one endpoint.
    pub cells: Vec<CellRef>,
}

impl SheetRange {
    /// Single-cell reference on `sheet`.
    pub fn cell(sheet: Option<&str>, column: Option<&str>, row: Option<u32>) -> Self {
        Self {
            sheet: sheet.map(str::to_string),
            cells: vec![CellRef::new(column, row)],
        }
    }

    pub fn parse(input: &str) -> Result<Self, A1Error> {
        let input = input.trim();
        let (sheet, rest) = split_sheet(input)?;
        if rest.is_empty() {
            return Err(A1Error::InvalidRange(input.to_string()));
        }
        let cells = rest
            .split(':')
            .map(|component| CellRef::parse(component, input))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sheet, cells })
    }

    pub fn start(&self) -> &CellRef {
        // `parse` and `cell` never build an empty range
        &self.cells[0]
    }

    pub fn first_row(&self) -> Option<u32> {
        self.start().row
    }

    pub fn first_column(&self) -> Option<&str> {
        self.start().column.as_deref()
    }

    /// Sheet name used as the metadata key; unnamed ranges map to `""`.
    pub fn sheet_key(&self) -> &str {
        self.sheet.as_deref().unwrap_or("")
    }

    pub fn to_a1(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SheetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            if PLAIN_SHEET_RE.is_match(sheet) {
                write!(f, "{}!", sheet)?;
            } else {
                write!(f, "'{}'!", sheet.replace('\'', "''"))?;
            }
        }
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{}", cell)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SheetRange {
    type Err = A1Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SheetRange {
    type Error = A1Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SheetRange> for String {
    fn from(range: SheetRange) -> Self {
        range.to_a1()
    }
}

/// Split off an optional `sheet!` prefix. Quoted names may contain `!`, and
/// `''` inside quotes is a literal quote.
fn split_sheet(input: &str) -> Result<(Option<String>, &str), A1Error> {
    if let Some(quoted) = input.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '\'' {
                name.push(c);
                continue;
            }
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                name.push('\'');
                continue;
            }
            return match quoted[i + 1..].strip_prefix('!') {
                Some(rest) => Ok((Some(name), rest)),
                None => Err(A1Error::InvalidRange(input.to_string())),
            };
        }
        return Err(A1Error::UnterminatedSheet(input.to_string()));
    }

    match input.split_once('!') {
        Some(("", _)) => Err(A1Error::InvalidRange(input.to_string())),
        Some((sheet, rest)) => Ok((Some(sheet.to_string()), rest)),
        None => Ok((None, input)),
    }
}

/// Bijective base-26: `A` = 1, `Z` = 26, `AA` = 27. The empty string is 0.
pub fn column_letter_to_index(letters: &str) -> Result<u32, A1Error> {
    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return Err(A1Error::InvalidCell(letters.to_string()));
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        acc.checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| A1Error::ColumnOverflow(letters.to_string()))
    })
}

/// Inverse of [`column_letter_to_index`].
pub fn column_index_to_letter(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_sheet_and_range() {
        let r = SheetRange::parse("'Lab Grades'!B2:K").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Lab Grades"));
        assert_eq!(
            r.cells,
            vec![CellRef::new(Some("B"), Some(2)), CellRef::new(Some("K"), None)]
        );
        assert_eq!(r.first_row(), Some(2));
        assert_eq!(r.first_column(), Some("B"));
    }

    #[test]
    fn parses_bare_forms() {
        let r = SheetRange::parse("Sheet1!A1").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Sheet1"));
        assert_eq!(r.cells, vec![CellRef::new(Some("A"), Some(1))]);

        let r = SheetRange::parse("C:E").unwrap();
        assert_eq!(r.sheet, None);
        assert_eq!(r.first_row(), None);

        let r = SheetRange::parse("Grades!5:9").unwrap();
        assert_eq!(r.first_column(), None);
        assert_eq!(r.first_row(), Some(5));
    }

    #[test]
    fn normalizes_case_and_quotes() {
        assert_eq!(SheetRange::parse("'Sheet1'!b3").unwrap().to_a1(), "Sheet1!B3");
        assert_eq!(
            SheetRange::parse("Bob's marks!a1:c2").unwrap().to_a1(),
            "'Bob''s marks'!A1:C2"
        );
        let r = SheetRange::parse("'it''s!here'!A1").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("it's!here"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            SheetRange::parse("Sheet1!"),
            Err(A1Error::InvalidRange(_))
        ));
        assert!(matches!(
            SheetRange::parse("Sheet1!1A"),
            Err(A1Error::InvalidCell(_))
        ));
        assert!(matches!(
            SheetRange::parse("'open!A1"),
            Err(A1Error::UnterminatedSheet(_))
        ));
        assert!(matches!(
            SheetRange::parse("'Sheet'A1"),
            Err(A1Error::InvalidRange(_))
        ));
        assert!(matches!(SheetRange::parse("A0"), Err(A1Error::ZeroRow(_))));
        assert!(SheetRange::parse("!A1").is_err());
        assert!(SheetRange::parse("").is_err());
    }

    #[test]
    fn column_conversions() {
        assert_eq!(column_letter_to_index("A").unwrap(), 1);
        assert_eq!(column_letter_to_index("Z").unwrap(), 26);
        assert_eq!(column_letter_to_index("AA").unwrap(), 27);
        assert_eq!(column_letter_to_index("az").unwrap(), 52);
        assert_eq!(column_letter_to_index("ZZZ").unwrap(), 18278);
        assert_eq!(column_letter_to_index("").unwrap(), 0);
        assert_eq!(column_index_to_letter(0), "");
        assert_eq!(column_index_to_letter(28), "AB");
        assert_eq!(column_index_to_letter(702), "ZZ");
        assert_eq!(column_index_to_letter(703), "AAA");
        assert!(column_letter_to_index("A1").is_err());
        assert!(matches!(
            column_letter_to_index("ZZZZZZZZ"),
            Err(A1Error::ColumnOverflow(_))
        ));
        assert_eq!(
            column_letter_to_index(&column_index_to_letter(u32::MAX)).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn serde_uses_a1_string() {
        let r = SheetRange::parse("'My Sheet'!A2:K").unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#""'My Sheet'!A2:K""#);
        let back: SheetRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    fn cell_strategy() -> impl Strategy<Value = CellRef> {
        (
            proptest::option::of(1u32..=20_000),
            proptest::option::of(1u32..=1_000_000),
        )
            .prop_filter("endpoint needs a column or a row", |(c, r)| {
                c.is_some() || r.is_some()
            })
            .prop_map(|(c, r)| CellRef {
                column: c.map(column_index_to_letter),
                row: r,
            })
    }

    fn range_strategy() -> impl Strategy<Value = SheetRange> {
        (
            proptest::option::of("[A-Za-z0-9 '!_]{1,12}"),
            proptest::collection::vec(cell_strategy(), 1..=2),
        )
            .prop_map(|(sheet, cells)| SheetRange { sheet, cells })
    }

    proptest! {
        #[test]
        fn column_index_round_trips(index in 1u32..=u32::MAX) {
            let letters = column_index_to_letter(index);
            prop_assert_eq!(column_letter_to_index(&letters).unwrap(), index);
        }

        #[test]
        fn parse_inverts_format(range in range_strategy()) {
            let text = range.to_a1();
            prop_assert_eq!(SheetRange::parse(&text).unwrap(), range);
        }

        #[test]
        fn format_normalizes_input(
            sheet in "[A-Za-z][A-Za-z0-9]{0,6}",
            col in "[a-zA-Z]{1,3}",
            row in 1u32..100_000,
        ) {
            let input = format!("'{}'!{}{}", sheet, col, row);
            let normalized = SheetRange::parse(&input).unwrap().to_a1();
            prop_assert_eq!(&normalized, &format!("{}!{}{}", sheet, col.to_ascii_uppercase(), row));
            prop_assert_eq!(SheetRange::parse(&normalized).unwrap().to_a1(), normalized);
        }
    }
}
