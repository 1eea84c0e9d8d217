//! # Submission Inference
//!
//! Batched top-3 image classification over a directory of images, written
//! as a ranked-prediction submission file. Built on the Burn framework.
//!
//! ## Pipeline
//!
//! 1. `dataset::validate` splits the directory into usable images and
//!    corrupted entries by sniffing file headers
//! 2. `dataset::loader` decodes usable images on a worker pool and streams
//!    them in fixed-size batches, one batch ahead of the consumer
//! 3. `inference` scores each batch with the restored network and keeps
//!    the three best classes per image
//! 4. `submission` writes `id,c1 c2 c3` rows, corrupted entries last with
//!    a fixed fallback prediction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use submission_infer::{pipeline, PredictConfig};
//!
//! let config = PredictConfig::default();
//! let summary = pipeline::run(&config, true)?;
//! println!("wrote {:?}", summary.output_path);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod submission;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PredictConfig;
pub use dataset::{Batch, BatchLoader, ImagePreprocessor, ImageTransform, InputRecord, ValidationResult};
pub use inference::{BurnScorer, InferenceEngine, Prediction, ScoreModel};
pub use model::{ClassifierConfig, Net, Network};
pub use pipeline::{run, run_with, RunSummary};
pub use submission::{OutputRow, SubmissionWriter, FALLBACK_CLASSES};
pub use utils::error::{PredictError, Result};

/// Default number of images per inference call
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default square resolution images are resized to
pub const DEFAULT_IMAGE_SIZE: usize = 299;

/// Default number of classes scored by the network
pub const DEFAULT_NUM_CLASSES: usize = 128;

/// Number of ranked classes reported per image
pub const TOP_K: usize = 3;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
