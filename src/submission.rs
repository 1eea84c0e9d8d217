//! Result Writer
//!
//! Renders predictions as `id,c1 c2 c3` rows under an `id,predicted`
//! header. The file only appears under its final name once the run has
//! finished; until then rows go to a hidden staging file in the same
//! directory, which is removed if the writer is dropped unfinished.

use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::inference::Prediction;
use crate::model::Net;
use crate::utils::error::{PredictError, Result};
use crate::TOP_K;

/// Header line of every submission file
pub const HEADER: &str = "id,predicted";

/// Classes reported for entries that could not be scored
pub const FALLBACK_CLASSES: [usize; TOP_K] = [93, 83, 2];

/// One line of the submission table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub id: String,
    pub ranked_classes: [usize; TOP_K],
}

impl OutputRow {
    /// Row for an entry the validator rejected
    pub fn fallback(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ranked_classes: FALLBACK_CLASSES,
        }
    }
}

impl From<&Prediction> for OutputRow {
    fn from(prediction: &Prediction) -> Self {
        Self {
            id: prediction.id.clone(),
            ranked_classes: prediction.top3,
        }
    }
}

impl fmt::Display for OutputRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [c1, c2, c3] = self.ranked_classes;
        write!(f, "{},{} {} {}", self.id, c1, c2, c3)
    }
}

/// Write a complete table: header, predictions in order, then one
/// fallback row per corrupted id.
pub fn write_rows<W: Write>(
    writer: &mut W,
    predictions: &[Prediction],
    corrupted: &[String],
) -> io::Result<()> {
    writeln!(writer, "{HEADER}")?;
    for prediction in predictions {
        writeln!(writer, "{}", OutputRow::from(prediction))?;
    }
    for id in corrupted {
        writeln!(writer, "{}", OutputRow::fallback(id.as_str()))?;
    }
    Ok(())
}

/// Number of visible entries already in `dir`.
///
/// Dot-files are skipped so the staging file never shifts the count.
fn count_entries(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if !entry?.file_name().to_string_lossy().starts_with('.') {
            count += 1;
        }
    }
    Ok(count)
}

/// File name for the `n`-th submission of `net`
pub fn submission_file_name(n: usize, net: Net) -> String {
    format!("{n}_submission_{net}.csv")
}

/// Streams rows into a staged file and publishes it on `finish`
pub struct SubmissionWriter {
    output_dir: PathBuf,
    net: Net,
    sequence: usize,
    staged: BufWriter<NamedTempFile>,
    rows: usize,
}

impl SubmissionWriter {
    /// Create `output_dir` if needed, pick the sequence number and write
    /// the header to the staging file.
    pub fn create(output_dir: &Path, net: Net) -> Result<Self> {
        fs::create_dir_all(output_dir).map_err(|e| {
            PredictError::Output(format!("Cannot create {}: {e}", output_dir.display()))
        })?;

        let sequence = count_entries(output_dir)?;
        let staged = NamedTempFile::new_in(output_dir).map_err(|e| {
            PredictError::Output(format!("Cannot stage output in {}: {e}", output_dir.display()))
        })?;
        debug!("Staging submission at {:?}", staged.path());

        let mut staged = BufWriter::new(staged);
        writeln!(staged, "{HEADER}")?;

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            net,
            sequence,
            staged,
            rows: 0,
        })
    }

    /// Final path the file will get if no other file claims it first
    pub fn target_path(&self) -> PathBuf {
        self.output_dir
            .join(submission_file_name(self.sequence, self.net))
    }

    /// Rows written so far, header excluded
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn write_row(&mut self, row: &OutputRow) -> Result<()> {
        writeln!(self.staged, "{row}")?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_predictions(&mut self, predictions: &[Prediction]) -> Result<()> {
        for prediction in predictions {
            self.write_row(&OutputRow::from(prediction))?;
        }
        Ok(())
    }

    pub fn write_fallbacks(&mut self, corrupted: &[String]) -> Result<()> {
        for id in corrupted {
            self.write_row(&OutputRow::fallback(id.as_str()))?;
        }
        Ok(())
    }

    /// Flush and move the staged file to its final name.
    ///
    /// Existing files are never replaced; if the chosen name is taken the
    /// sequence number is bumped until a free one is found.
    pub fn finish(self) -> Result<PathBuf> {
        let Self {
            output_dir,
            net,
            mut sequence,
            staged,
            rows,
        } = self;

        let mut file = staged
            .into_inner()
            .map_err(|e| PredictError::Output(format!("Failed to flush submission: {}", e.error())))?;
        file.as_file().sync_all()?;

        loop {
            let path = output_dir.join(submission_file_name(sequence, net));
            match file.persist_noclobber(&path) {
                Ok(_) => {
                    info!("Wrote {} rows to {:?}", rows, path);
                    return Ok(path);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{:?} already exists, trying next sequence number", path);
                    file = e.file;
                    sequence += 1;
                }
                Err(e) => {
                    return Err(PredictError::Output(format!(
                        "Failed to publish {}: {}",
                        path.display(),
                        e.error
                    )));
                }
            }
        }
    }
}
