//! Checkpoint discovery and restoration
//!
//! A checkpoint directory holds one or more `CompactRecorder` records
//! (`*.mpk`) and optionally the `config.json` the network was trained with.
//! The newest record wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use burn::{config::Config, module::Module, record::CompactRecorder, tensor::backend::Backend};
use tracing::{debug, info, warn};

use super::cnn::{ClassifierConfig, CnnClassifier, CnnLiteClassifier, Network};
use super::Net;
use crate::config::PredictConfig;
use crate::utils::error::{PredictError, Result};
use crate::TOP_K;

/// Extension written by `CompactRecorder`
pub const RECORD_EXTENSION: &str = "mpk";

/// Optional architecture description stored next to the records
pub const MODEL_CONFIG_FILE: &str = "config.json";

/// Find the most recent record in `dir`.
///
/// Records are ordered by modification time; equal times fall back to the
/// file name so the choice is stable.
pub fn latest_checkpoint(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(PredictError::CheckpointNotFound(dir.to_path_buf()));
    }

    let mut latest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }

        let modified = fs::metadata(&path)?.modified()?;
        debug!("Checkpoint candidate {:?}", path);

        let newer = match &latest {
            None => true,
            Some((time, best)) => (modified, &path) > (*time, best),
        };
        if newer {
            latest = Some((modified, path));
        }
    }

    latest
        .map(|(_, path)| path)
        .ok_or_else(|| PredictError::CheckpointNotFound(dir.to_path_buf()))
}

/// Architecture for the network about to be restored.
///
/// `config.json` in the checkpoint directory takes precedence; without it
/// the run configuration decides.
pub fn model_config(config: &PredictConfig) -> Result<ClassifierConfig> {
    let path = config.checkpoint_dir.join(MODEL_CONFIG_FILE);

    let model_config = if path.is_file() {
        let loaded = ClassifierConfig::load(&path).map_err(|e| {
            PredictError::Checkpoint(format!("Failed to read {:?}: {:?}", path, e))
        })?;
        if loaded.num_classes != config.num_classes {
            warn!(
                "{:?} declares {} classes, run configuration says {}; using the checkpoint's",
                path, loaded.num_classes, config.num_classes
            );
        }
        loaded
    } else {
        ClassifierConfig::new()
            .with_num_classes(config.num_classes)
            .with_input_size(config.image_size)
    };

    if model_config.num_classes < TOP_K {
        return Err(PredictError::Checkpoint(format!(
            "Network has {} classes, at least {} are required",
            model_config.num_classes, TOP_K
        )));
    }

    Ok(model_config)
}

/// Restore the configured network from its latest checkpoint.
///
/// Fails with `CheckpointNotFound` when the directory holds no record and
/// with `Checkpoint` when a record exists but does not match the network.
pub fn load_network<B: Backend>(config: &PredictConfig, device: &B::Device) -> Result<Network<B>> {
    let net = config.network()?;
    let path = latest_checkpoint(&config.checkpoint_dir)?;
    let model_config = model_config(config)?;

    info!("Restoring {} from {:?}", net, path);

    let recorder = CompactRecorder::new();
    let network = match net {
        Net::Cnn => Network::Cnn(
            CnnClassifier::<B>::new(&model_config, device)
                .load_file(&path, &recorder, device)
                .map_err(|e| restore_error(&path, e))?,
        ),
        Net::CnnLite => Network::CnnLite(
            CnnLiteClassifier::<B>::new(&model_config, device)
                .load_file(&path, &recorder, device)
                .map_err(|e| restore_error(&path, e))?,
        ),
    };

    info!("Checkpoint restored ({} classes)", network.num_classes());
    Ok(network)
}

fn restore_error(path: &Path, e: burn::record::RecorderError) -> PredictError {
    PredictError::Checkpoint(format!("Failed to load model from {:?}: {:?}", path, e))
}
