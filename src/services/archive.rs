//! Year-end archival of monthly detail stores.

use crate::db::stores::MONTHLY_STORE_SUFFIX;
use core::fmt;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::ZipWriter;

#[derive(Debug)]
pub enum ArchiveError {
    Scan(PathBuf, io::Error),
    ReadSource(PathBuf, io::Error),
    Write(PathBuf, io::Error),
    Zip(ZipError),
}

impl Display for ArchiveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Scan(p, e) => write!(f, "unable to scan {}: {}", p.display(), e),
            ArchiveError::ReadSource(p, e) => write!(f, "reading {} failed: {}", p.display(), e),
            ArchiveError::Write(p, e) => write!(f, "writing {} failed: {}", p.display(), e),
            ArchiveError::Zip(e) => write!(f, "zip error: {}", e),
        }
    }
}

impl Error for ArchiveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArchiveError::Scan(_, e) | ArchiveError::ReadSource(_, e) | ArchiveError::Write(_, e) => Some(e),
            ArchiveError::Zip(e) => Some(e),
        }
    }
}

impl From<ZipError> for ArchiveError {
    fn from(value: ZipError) -> Self {
        ArchiveError::Zip(value)
    }
}

#[derive(Debug)]
pub struct ArchiveSummary {
    pub destination: PathBuf,
    /// Base names of the bundled monthly stores, sorted.
    pub files: Vec<String>,
}

/// Bundle every monthly store of `year` found directly in `dir` into
/// `<dir>/<relative_path>/<year>.zip`, creating the destination directory as
/// needed. An existing archive for the same year is replaced. The zip is
/// staged under a `.tmp` name and renamed into place, so an interrupted
/// write never leaves a plausible-looking archive behind.
pub fn archive_year(dir: &Path, relative_path: &str, year: i32) -> Result<ArchiveSummary, ArchiveError> {
    let out_dir = dir.join(relative_path);
    fs::create_dir_all(&out_dir).map_err(|e| ArchiveError::Write(out_dir.clone(), e))?;

    let destination = out_dir.join(format!("{}.zip", year));
    let staging = out_dir.join(format!("{}.zip.tmp", year));

    let mut files = monthly_files(dir, year)?;
    files.sort();

    if let Err(e) = write_archive(dir, &staging, &files) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    fs::rename(&staging, &destination).map_err(|e| ArchiveError::Write(destination.clone(), e))?;

    info!("Zip created: {} ({} file(s))", destination.display(), files.len());
    Ok(ArchiveSummary { destination, files })
}

/// Names of regular files in `dir` matching `<year>-<MM>-monthly.sqlite`.
fn monthly_files(dir: &Path, year: i32) -> Result<Vec<String>, ArchiveError> {
    let entries = fs::read_dir(dir).map_err(|e| ArchiveError::Scan(dir.to_path_buf(), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::Scan(dir.to_path_buf(), e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_monthly_store(name, year) {
            continue;
        }
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.push(name.to_string());
        }
    }
    Ok(files)
}

/// `<year>-<MM>-monthly.sqlite` with a two-digit month.
fn is_monthly_store(name: &str, year: i32) -> bool {
    let Some(rest) = name.strip_prefix(&format!("{:04}-", year)) else {
        return false;
    };
    let Some(month) = rest.strip_suffix(MONTHLY_STORE_SUFFIX) else {
        return false;
    };
    month.len() == 2 && month.bytes().all(|b| b.is_ascii_digit())
}

/// Member names are the source base names; no directory structure is kept.
fn write_archive(dir: &Path, staging: &Path, files: &[String]) -> Result<(), ArchiveError> {
    let out = File::create(staging).map_err(|e| ArchiveError::Write(staging.to_path_buf(), e))?;
    let mut writer = ZipWriter::new(out);
    let options = FileOptions::default();

    for name in files {
        let source = dir.join(name);
        let mut contents = Vec::new();
        File::open(&source)
            .and_then(|mut f| f.read_to_end(&mut contents))
            .map_err(|e| ArchiveError::ReadSource(source.clone(), e))?;
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(&contents)
            .map_err(|e| ArchiveError::Write(staging.to_path_buf(), e))?;
        debug!("added file to zip: {}", name);
    }

    writer.finish()?;
    Ok(())
}
