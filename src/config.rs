//! Run configuration
//!
//! A single immutable struct built once at startup (defaults, then an
//! optional TOML file, then command-line overrides) and handed by
//! reference to every stage.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Net;
use crate::utils::error::{PredictError, Result};
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_IMAGE_SIZE, DEFAULT_NUM_CLASSES, TOP_K};

/// Configuration for one prediction run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictConfig {
    /// Directory holding the images to classify (direct entries only)
    pub data_dir: PathBuf,
    /// Directory holding the trained weights
    pub checkpoint_dir: PathBuf,
    /// Directory receiving the submission file
    pub output_dir: PathBuf,
    /// Images per inference call
    pub batch_size: usize,
    /// Thread hint kept for compatibility; logged only
    pub num_threads: usize,
    /// Square resolution images are resized to
    pub image_size: usize,
    /// Network identifier (`cnn` or `cnn_lite`)
    pub net: String,
    /// Number of classes the network scores
    pub num_classes: usize,
    /// Batches decoded ahead of the inference stage
    pub prefetch_batches: usize,
    /// Decode pool size; `None` uses the available parallelism
    pub decode_workers: Option<usize>,
    /// Device placement leniency; accepted and logged, no effect
    pub allow_soft_placement: bool,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/Public"),
            checkpoint_dir: PathBuf::from("models/0_cnn"),
            output_dir: PathBuf::from("submissions"),
            batch_size: DEFAULT_BATCH_SIZE,
            num_threads: 8,
            image_size: DEFAULT_IMAGE_SIZE,
            net: Net::Cnn.to_string(),
            num_classes: DEFAULT_NUM_CLASSES,
            prefetch_batches: 1,
            decode_workers: None,
            allow_soft_placement: true,
        }
    }
}

impl PredictConfig {
    /// Load a configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PredictError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            PredictError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })
    }

    /// Check the values every stage relies on
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PredictError::Config("batch_size must be greater than 0".into()));
        }
        if self.image_size == 0 {
            return Err(PredictError::Config("image_size must be greater than 0".into()));
        }
        if self.num_classes < TOP_K {
            return Err(PredictError::Config(format!(
                "num_classes must be at least {TOP_K}, got {}",
                self.num_classes
            )));
        }
        if self.decode_workers == Some(0) {
            return Err(PredictError::Config("decode_workers must be greater than 0".into()));
        }
        self.network()?;
        Ok(())
    }

    /// Parsed network identifier
    pub fn network(&self) -> Result<Net> {
        self.net.parse()
    }

    /// Effective size of the decode worker pool
    pub fn decode_parallelism(&self) -> usize {
        self.decode_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
