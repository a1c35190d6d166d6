// src/moodle/submissions.rs

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use super::{
    archive::extract_archive,
    worksheet::{Student, StudentMap},
};

/// `<Last Name> <FIRST NAME>_<id>_<suffix>`, as Moodle names downloads.
static SUBMISSION_DIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<lname>[a-zA-Z0-9 -]+)\s+(?P<fname>[A-Z0-9-]+)_(?P<id>[0-9]+)_")
        .expect("submission dir regex should compile")
});

/// Drop diacritics: NFD, then remove combining marks.
pub fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionName {
    pub lname: String,
    pub fname: String,
    pub id: String,
}

impl SubmissionName {
    pub fn parse(dir_name: &str) -> Option<Self> {
        let normalized = strip_accents(dir_name);
        let caps = SUBMISSION_DIR_RE.captures(&normalized)?;
        Some(Self {
            lname: caps["lname"].to_string(),
            fname: caps["fname"].to_string(),
            id: caps["id"].to_string(),
        })
    }

    fn display_name(&self) -> String {
        format!("{} {}", self.fname, self.lname)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenamePolicy {
    /// Leave names alone.
    None,
    /// `<FIRST> <Last>`.
    Fname,
    /// The student's email.
    Email,
    /// The email without its domain.
    Username,
    /// `<FIRST> <Last> (<username>)`.
    #[value(name = "fname_user")]
    FnameUser,
}

impl RenamePolicy {
    fn needs_worksheet(self) -> bool {
        matches!(self, RenamePolicy::Email | RenamePolicy::Username)
    }

    /// Target directory name, or `None` when this policy cannot name it.
    pub fn new_name(self, sub: &SubmissionName, student: Option<&Student>) -> Option<String> {
        match self {
            RenamePolicy::None => None,
            RenamePolicy::Fname => Some(sub.display_name()),
            RenamePolicy::Email => student.map(|s| s.email.clone()).filter(|e| !e.is_empty()),
            RenamePolicy::Username => student.map(Student::username).filter(|u| !u.is_empty()),
            RenamePolicy::FnameUser => Some(match student.map(Student::username) {
                Some(user) if !user.is_empty() => format!("{} ({})", sub.display_name(), user),
                _ => sub.display_name(),
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct OrganizeOptions {
    pub students: Option<StudentMap>,
    /// Defaults to `Email` with a worksheet, `Fname` without.
    pub rename: Option<RenamePolicy>,
    pub extract: bool,
    pub dry_run: bool,
}

impl OrganizeOptions {
    pub fn policy(&self) -> Result<RenamePolicy> {
        let policy = self.rename.unwrap_or(if self.students.is_some() {
            RenamePolicy::Email
        } else {
            RenamePolicy::Fname
        });
        if policy.needs_worksheet() && self.students.is_none() {
            bail!("Cannot rename with emails without a grading worksheet!");
        }
        Ok(policy)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub renamed: usize,
    pub not_renamed: usize,
    pub extracted: usize,
    pub ignored: usize,
    pub failed: usize,
}

/// Rename (and optionally unpack) every submission directory under `dir`.
/// Progress lines go to `out`.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub fn organize<W: Write>(dir: &Path, opts: &OrganizeOptions, out: &mut W) -> Result<Report> {
    if !dir.is_dir() {
        bail!("Invalid directory: '{}'", dir.display());
    }
    let policy = opts.policy()?;
    info!(?policy, extract = opts.extract, dry_run = opts.dry_run, "organizing submissions");

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();

    let mut report = Report::default();
    for path in entries {
        if !path.is_dir() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let target = SubmissionName::parse(&name).and_then(|sub| {
            let student = opts.students.as_ref().and_then(|m| m.find(&sub.id));
            policy.new_name(&sub, student)
        });

        let mut current = path.clone();
        match target.filter(|new_name| rename_allowed(dir, new_name)) {
            Some(new_name) => {
                writeln!(out, "Renaming '{}' to '{}'", name, new_name)?;
                if !opts.dry_run {
                    let new_path = dir.join(&new_name);
                    fs::rename(&path, &new_path).with_context(|| {
                        format!("renaming {} to {}", path.display(), new_path.display())
                    })?;
                    current = new_path;
                }
                report.renamed += 1;
            }
            None => {
                writeln!(out, "NOT renaming '{}'", name)?;
                report.not_renamed += 1;
            }
        }

        if opts.extract {
            extract_submission(&current, &name, opts.dry_run, out, &mut report)?;
        }
    }
    info!(?report, "done");
    Ok(report)
}

/// A rename goes ahead only for a plain name that does not already exist.
fn rename_allowed(dir: &Path, new_name: &str) -> bool {
    if new_name.contains(std::path::is_separator) {
        warn!(to = %new_name, "target name contains a path separator; skipped");
        return false;
    }
    let new_path = dir.join(new_name);
    if new_path.exists() {
        warn!(to = %new_path.display(), "target exists; skipped");
        return false;
    }
    true
}

fn extract_submission<W: Write>(
    dir: &Path,
    name: &str,
    dry_run: bool,
    out: &mut W,
    report: &mut Report,
) -> Result<()> {
    let files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    let [archive] = files.as_slice() else {
        let why = if files.is_empty() {
            "no files found"
        } else {
            "multiple files found"
        };
        writeln!(out, "unzip: IGNORE '{}' ({})", name, why)?;
        report.ignored += 1;
        return Ok(());
    };
    if !archive.is_file() || archive.extension().is_none() {
        writeln!(out, "unzip: IGNORE '{}' (not an archive)", archive.display())?;
        report.ignored += 1;
        return Ok(());
    }

    writeln!(out, "unzip: '{}'", archive.display())?;
    if dry_run {
        return Ok(());
    }
    match extract_archive(archive, dir) {
        Ok(()) => report.extracted += 1,
        Err(e) => {
            error!(archive = %archive.display(), "extraction failed: {:#}", e);
            report.failed += 1;
        }
    }
    Ok(())
}
