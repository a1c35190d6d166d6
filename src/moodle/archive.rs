// src/moodle/archive.rs

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::Read,
    path::Path,
};
use tracing::{debug, info, instrument};
use xz2::read::XzDecoder;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveKind {
    /// Detect by file-name suffix, case-insensitively.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        const SUFFIXES: &[(&str, ArchiveKind)] = &[
            (".zip", ArchiveKind::Zip),
            (".tar.gz", ArchiveKind::TarGz),
            (".tgz", ArchiveKind::TarGz),
            (".tar.bz2", ArchiveKind::TarBz2),
            (".tar.bz", ArchiveKind::TarBz2),
            (".tbz2", ArchiveKind::TarBz2),
            (".tar.xz", ArchiveKind::TarXz),
            (".txz", ArchiveKind::TarXz),
            (".tar", ArchiveKind::Tar),
        ];
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|&(_, kind)| kind)
    }
}

/// Unpack `archive` into `dest`, delete it, and hoist the contents of a lone
/// top-level directory into `dest`.
#[instrument(level = "info", skip_all, fields(archive = %archive.display()))]
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let kind = ArchiveKind::detect(archive)
        .with_context(|| format!("unsupported archive format: {}", archive.display()))?;
    {
        let file =
            File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
        match kind {
            ArchiveKind::Zip => {
                ZipArchive::new(file)
                    .with_context(|| format!("reading zip {}", archive.display()))?
                    .extract(dest)
                    .with_context(|| format!("extracting {}", archive.display()))?;
            }
            ArchiveKind::Tar => unpack_tar(file, dest)?,
            ArchiveKind::TarGz => unpack_tar(GzDecoder::new(file), dest)?,
            ArchiveKind::TarBz2 => unpack_tar(BzDecoder::new(file), dest)?,
            ArchiveKind::TarXz => unpack_tar(XzDecoder::new(file), dest)?,
        }
    }
    fs::remove_file(archive).with_context(|| format!("removing {}", archive.display()))?;
    info!(?kind, dest = %dest.display(), "extracted");
    flatten_single_dir(dest)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    tar::Archive::new(reader)
        .unpack(dest)
        .with_context(|| format!("unpacking tar into {}", dest.display()))
}

/// If `dir` holds exactly one entry and it is a directory, move its children
/// up into `dir` and remove it.
pub fn flatten_single_dir(dir: &Path) -> Result<()> {
    let entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .collect::<Result<_, _>>()?;
    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.file_type()?.is_dir() {
        return Ok(());
    }

    // the child may contain an entry with its own name, so step it aside first
    let staging = dir.join(format!(".flatten-{}", only.file_name().to_string_lossy()));
    fs::rename(only.path(), &staging)
        .with_context(|| format!("moving {} aside", only.path().display()))?;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        let target = dir.join(entry.file_name());
        fs::rename(entry.path(), &target)
            .with_context(|| format!("moving {} to {}", entry.path().display(), target.display()))?;
    }
    fs::remove_dir(&staging).with_context(|| format!("removing {}", staging.display()))?;
    debug!(dir = %dir.display(), "flattened single top-level directory");
    Ok(())
}
