// src/sheets/columns.rs

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, trace};

use crate::config::PatternSpec;

/// Column name -> 0-based offset from the first column of the range.
pub type ColumnMap = IndexMap<String, usize>;

/// `\N`, `\g<name>` and bare `$N`; `$$` is matched so it stays an escape.
static GROUP_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$|\\(?:(\d+)|g<(\w+)>)|\$(\d+)").expect("group reference regex should compile")
});

/// Prefix for patterns that name matched columns themselves rather than
/// being looked up under their own key.
const DYNAMIC_PREFIX: char = '_';

struct CompiledPattern {
    name: String,
    source: PatternSpec,
    regexes: Vec<Regex>,
}

/// Header-cell matchers, in configuration order.
pub struct ColumnPatterns {
    patterns: Vec<CompiledPattern>,
}

impl ColumnPatterns {
    pub fn compile(specs: &IndexMap<String, PatternSpec>) -> Result<Self> {
        let mut patterns = Vec::with_capacity(specs.len());
        for (name, spec) in specs {
            let regexes = spec
                .patterns()
                .iter()
                .map(|p| {
                    // anchored at the start only, like a prefix match
                    RegexBuilder::new(&format!("^(?:{})", p))
                        .case_insensitive(true)
                        .dot_matches_new_line(true)
                        .build()
                        .with_context(|| format!("compiling column pattern {}: {:?}", name, p))
                })
                .collect::<Result<Vec<_>>>()?;
            patterns.push(CompiledPattern {
                name: name.clone(),
                source: spec.clone(),
                regexes,
            });
        }
        Ok(Self { patterns })
    }

    /// Resolve the column name for one (already trimmed) header cell.
    pub fn column_name(&self, header: &str) -> Option<String> {
        for pattern in &self.patterns {
            let Some(caps) = pattern.regexes.iter().find_map(|re| re.captures(header)) else {
                continue;
            };
            let name = if pattern.name == "_" {
                if caps.len() > 1 {
                    caps.get(1).map(|m| m.as_str().to_string())
                } else {
                    Some(header.to_string())
                }
            } else if let Some(template) = pattern.name.strip_prefix(DYNAMIC_PREFIX) {
                Some(expand_template(&caps, template))
            } else {
                Some(pattern.name.clone())
            };
            match name {
                Some(name) if !name.is_empty() => return Some(name),
                _ => trace!(header, pattern = %pattern.name, "matched without a usable name"),
            }
        }
        None
    }

    /// Build the column map from a header row. Fails when a fixed-name
    /// pattern matched no header.
    pub fn build_column_map(&self, header_row: &[String]) -> Result<ColumnMap> {
        let mut map = ColumnMap::new();
        for (idx, cell) in header_row.iter().enumerate() {
            let header = cell.trim();
            if header.is_empty() {
                continue;
            }
            if let Some(name) = self.column_name(header) {
                debug!(column = idx, header, name = %name, "mapped header");
                map.insert(name, idx);
            }
        }

        for pattern in &self.patterns {
            if pattern.name.starts_with(DYNAMIC_PREFIX) || pattern.name.is_empty() {
                continue;
            }
            if !map.contains_key(&pattern.name) {
                let shown = match &pattern.source {
                    PatternSpec::One(p) => p.clone(),
                    PatternSpec::Many(ps) => format!(
                        "[{}]",
                        ps.iter()
                            .map(|p| format!("'{}'", p))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                };
                bail!("Column not found: {{{}: {}}}", pattern.name, shown);
            }
        }
        Ok(map)
    }
}

/// Expand `$1` / `${name}` as well as `\1` / `\g<name>` references. A
/// numbered reference ends at its last digit, so `$1_score` is group 1
/// followed by `_score`.
fn expand_template(caps: &Captures<'_>, template: &str) -> String {
    let template = GROUP_REF_RE.replace_all(template, |c: &Captures<'_>| {
        match c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)) {
            Some(group) => format!("${{{}}}", group.as_str()),
            None => "$$".to_string(),
        }
    });
    let mut out = String::new();
    caps.expand(&template, &mut out);
    out
}

/// Pick the named cells out of a raw row, trimmed and ordered by column.
pub fn remap_row(row: &[String], column_map: &ColumnMap) -> IndexMap<String, String> {
    let mut cells: Vec<(&String, usize)> = column_map
        .iter()
        .filter(|(_, idx)| **idx < row.len())
        .map(|(name, &idx)| (name, idx))
        .collect();
    cells.sort_by_key(|&(_, idx)| idx);
    cells
        .into_iter()
        .map(|(name, idx)| (name.clone(), row[idx].trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(entries: &[(&str, PatternSpec)]) -> ColumnPatterns {
        let specs: IndexMap<String, PatternSpec> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ColumnPatterns::compile(&specs).unwrap()
    }

    fn one(p: &str) -> PatternSpec {
        PatternSpec::One(p.to_string())
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn maps_fixed_and_dynamic_names() {
        let pats = patterns(&[
            ("username", one("user")),
            (
                "email",
                PatternSpec::Many(vec!["e-?mail".into(), "address".into()]),
            ),
            ("_", one(r"(lab\d+)")),
            (r"_hw\1", one(r"homework (\d+)")),
        ]);
        let map = pats
            .build_column_map(&row(&[
                " Username ",
                "",
                "Address",
                "LAB1 score",
                "Homework 3",
                "notes",
            ]))
            .unwrap();

        assert_eq!(map["username"], 0);
        assert_eq!(map["email"], 2);
        assert_eq!(map["LAB1"], 3);
        assert_eq!(map["hw3"], 4);
        assert!(!map.contains_key("notes"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn catch_all_without_group_uses_header() {
        let pats = patterns(&[("_", one("bonus"))]);
        assert_eq!(
            pats.column_name("Bonus points"),
            Some("Bonus points".to_string())
        );
        assert_eq!(pats.column_name("Total"), None);
    }

    #[test]
    fn patterns_match_from_the_start_only() {
        let pats = patterns(&[("email", one("mail"))]);
        assert_eq!(pats.column_name("Mail"), Some("email".to_string()));
        assert_eq!(pats.column_name("E-mail"), None);
    }

    #[test]
    fn dollar_templates_expand() {
        let pats = patterns(&[("_q${n}", one(r"quiz (?P<n>\d+)"))]);
        assert_eq!(pats.column_name("Quiz 12"), Some("q12".to_string()));
    }

    #[test]
    fn numbered_references_end_at_their_digits() {
        let pats = patterns(&[("_lab$1_score", one(r"lab (\d+)"))]);
        assert_eq!(pats.column_name("Lab 4"), Some("lab4_score".to_string()));

        let pats = patterns(&[(r"_lab\1_x", one(r"lab (\d+)"))]);
        assert_eq!(pats.column_name("Lab 4"), Some("lab4_x".to_string()));

        let pats = patterns(&[("_cost$$1", one(r"cost (\d+)"))]);
        assert_eq!(pats.column_name("Cost 9"), Some("cost$1".to_string()));
    }

    #[test]
    fn missing_required_column_fails() {
        let pats = patterns(&[("username", one("user")), ("email", one("mail"))]);
        let err = pats
            .build_column_map(&row(&["Username", "Name"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Column not found: {email: mail}");

        let pats = patterns(&[(
            "email",
            PatternSpec::Many(vec!["mail".into(), "e-mail".into()]),
        )]);
        let err = pats.build_column_map(&row(&["Name"])).unwrap_err();
        assert_eq!(err.to_string(), "Column not found: {email: ['mail', 'e-mail']}");
    }

    #[test]
    fn remap_skips_short_rows_and_trims() {
        let mut map = ColumnMap::new();
        map.insert("b".into(), 1);
        map.insert("a".into(), 0);
        map.insert("z".into(), 9);
        let obj = remap_row(&row(&[" alice ", "a@x.org "]), &map);
        let pairs: Vec<(&str, &str)> = obj.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(pairs, [("a", "alice"), ("b", "a@x.org")]);
    }
}
