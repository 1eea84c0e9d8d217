//! File validation
//!
//! Scans the input directory once and splits its entries into files the
//! loader can decode and ids that get the fallback prediction.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::format::{detect_format, HEADER_LEN};
use crate::utils::error::{PredictError, Result};
use crate::utils::logging::stage_progress;

/// A usable input file and the id it is reported under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Path to the image file
    pub path: PathBuf,
    /// File name up to its first `.`
    pub id: String,
}

impl InputRecord {
    /// Create a record from a path, deriving the id from the file name
    pub fn from_path(path: PathBuf) -> Self {
        let id = record_id(&path);
        Self { path, id }
    }
}

/// Partition of every directory entry into usable and corrupted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Files that passed validation, in scan order
    pub usable: Vec<InputRecord>,
    /// Ids of entries that failed validation, in scan order
    pub corrupted: Vec<String>,
}

impl ValidationResult {
    /// Number of entries seen by the scan
    pub fn total(&self) -> usize {
        self.usable.len() + self.corrupted.len()
    }

    /// Ids of the usable records, in scan order
    pub fn usable_ids(&self) -> Vec<&str> {
        self.usable.iter().map(|r| r.id.as_str()).collect()
    }
}

/// Id reported for a path: the file name up to its first `.`
///
/// `a.b.png` is reported as `a`, and a dot-file such as `.hidden` as the
/// empty string.
pub fn record_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Decide whether a path is a decodable image candidate.
///
/// A path is usable iff it is a regular file (links are followed), its
/// size is non-zero and its header sniffs as JPEG, PNG or GIF. Any I/O
/// failure while checking makes the path unusable; it never surfaces as an
/// error.
pub fn is_usable(path: &Path) -> bool {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!("Cannot stat {:?}: {}", path, e);
            return false;
        }
    };

    if !metadata.is_file() {
        debug!("Not a regular file: {:?}", path);
        return false;
    }
    if metadata.len() == 0 {
        debug!("Zero-byte file: {:?}", path);
        return false;
    }

    match read_header(path) {
        Ok(header) => match detect_format(&header) {
            Some(kind) => {
                debug!("{:?} sniffed as {}", path, kind);
                true
            }
            None => {
                debug!("Unrecognised image header: {:?}", path);
                false
            }
        },
        Err(e) => {
            debug!("Cannot read header of {:?}: {}", path, e);
            false
        }
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    File::open(path)?
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Scan the direct entries of `dir` (no recursion) and validate each.
///
/// Entries are visited in file-name order. A missing or unreadable
/// directory is fatal; per-entry problems only route the entry to
/// `corrupted`.
pub fn scan_directory(dir: &Path, show_progress: bool) -> Result<ValidationResult> {
    if !dir.exists() {
        return Err(PredictError::DataDirNotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(PredictError::NotADirectory(dir.to_path_buf()));
    }

    info!("Scanning input directory: {:?}", dir);

    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => entries.push(entry.into_path()),
            // An entry that cannot even be listed still belongs to the partition
            Err(e) if e.depth() > 0 => match e.path() {
                Some(path) => entries.push(path.to_path_buf()),
                None => return Err(walk_error(e)),
            },
            Err(e) => return Err(walk_error(e)),
        }
    }

    let pb = stage_progress("Data Loading", entries.len(), show_progress);
    let mut result = ValidationResult::default();

    for path in entries {
        if is_usable(&path) {
            result.usable.push(InputRecord::from_path(path));
        } else {
            result.corrupted.push(record_id(&path));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Found {} entries: {} usable, {} corrupted",
        result.total(),
        result.usable.len(),
        result.corrupted.len()
    );

    Ok(result)
}

fn walk_error(e: walkdir::Error) -> PredictError {
    match e.into_io_error() {
        Some(io) => PredictError::Io(io),
        None => PredictError::Config("filesystem loop while listing input directory".into()),
    }
}
