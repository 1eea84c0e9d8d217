//! Error Handling Module
//!
//! Defines the error type shared by every stage of the prediction run.
//! Uses thiserror for ergonomic error definitions.
//!
//! Only the file validator recovers from per-file problems (it routes them
//! to the corrupted list). Every variant here is fatal for the run.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for submission inference
#[derive(Error, Debug)]
pub enum PredictError {
    /// The input directory is missing
    #[error("Data directory does not exist: {0}")]
    DataDirNotFound(PathBuf),

    /// The input path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// No restorable checkpoint under the checkpoint directory
    #[error("No checkpoint found in {0}")]
    CheckpointNotFound(PathBuf),

    /// A checkpoint was found but could not be restored
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A file that passed validation failed to decode
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Scoring precondition violated (shape, row count, class count)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output artifact could not be written
    #[error("Output error: {0}")]
    Output(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for submission inference
pub type Result<T> = std::result::Result<T, PredictError>;
