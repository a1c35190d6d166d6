// src/moodle/worksheet.rs

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::HashMap, fs::File, io::Read, path::Path};
use tracing::debug;

static EMAIL_DOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\S+$").expect("email domain regex should compile"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub fullname: String,
    pub email: String,
}

impl Student {
    /// The email's local part.
    pub fn username(&self) -> String {
        EMAIL_DOMAIN_RE.replace(&self.email, "").into_owned()
    }
}

/// Students from a grading worksheet, keyed by numeric participant id.
#[derive(Debug, Clone, Default)]
pub struct StudentMap {
    students: HashMap<String, Student>,
}

impl StudentMap {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let mut students = HashMap::new();
        for record in rdr.records() {
            let record = record.context("reading grading worksheet row")?;
            if record.len() < 3 {
                continue;
            }
            // the id column carries a text prefix ("Participant 123")
            let id: String = record[0].chars().filter(char::is_ascii_digit).collect();
            if id.is_empty() {
                debug!(row = ?record.position().map(|p| p.line()), "row without participant id");
                continue;
            }
            students.insert(
                id.clone(),
                Student {
                    id,
                    fullname: record[1].trim().to_string(),
                    email: record[2].trim().to_string(),
                },
            );
        }
        Ok(Self { students })
    }

    pub fn find(&self, id: &str) -> Option<&Student> {
        self.students.get(id)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

pub fn read_grading_worksheet(path: &Path) -> Result<StudentMap> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    StudentMap::from_reader(file).with_context(|| format!("reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_students() -> Result<()> {
        let csv = "Identifier,Full name,Email address,Status\n\
Participant 4021, Jane Doe ,jdoe@stud.uni.edu ,Submitted\n\
Participant 4022,Bob\n\
No id,Nobody,nobody@uni.edu\n\
Participant 4023,Ana Pop,apop@uni.edu\n";
        let map = StudentMap::from_reader(csv.as_bytes())?;
        assert_eq!(map.len(), 2);

        let jane = map.find("4021").expect("jane should be present");
        assert_eq!(jane.fullname, "Jane Doe");
        assert_eq!(jane.email, "jdoe@stud.uni.edu");
        assert_eq!(jane.username(), "jdoe");
        assert!(map.find("4022").is_none());
        assert_eq!(map.find("4023").map(|s| s.fullname.as_str()), Some("Ana Pop"));
        Ok(())
    }

    #[test]
    fn username_without_domain_is_unchanged() {
        let s = Student {
            id: "1".into(),
            fullname: "X".into(),
            email: "plainname".into(),
        };
        assert_eq!(s.username(), "plainname");
    }
}
