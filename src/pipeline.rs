//! Prediction run: validate, batch, score, write.
//!
//! The stages run strictly one after another on the calling thread; the
//! only parallelism is the decode pool inside the batch loader.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::backend::{backend_name, default_device, DefaultBackend};
use crate::config::PredictConfig;
use crate::dataset::{scan_directory, BatchLoader, ImagePreprocessor, ImageTransform};
use crate::inference::{BurnScorer, InferenceEngine, ScoreModel};
use crate::model::load_network;
use crate::submission::SubmissionWriter;
use crate::utils::error::{PredictError, Result};
use crate::utils::logging::stage_progress;

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Published submission file
    pub output_path: PathBuf,
    /// Images scored by the network
    pub usable: usize,
    /// Entries given the fallback prediction
    pub corrupted: usize,
    /// Inference calls made
    pub batches: usize,
}

/// Run the pipeline with an already restored scorer.
///
/// Nothing is published unless every batch is scored; on error the staged
/// output is discarded.
pub fn run_with<S, T>(
    config: &PredictConfig,
    scorer: S,
    transform: Arc<T>,
    show_progress: bool,
) -> Result<RunSummary>
where
    S: ScoreModel,
    T: ImageTransform + 'static,
{
    let net = config.network()?;
    let validation = scan_directory(&config.data_dir, show_progress)?;

    let mut writer = SubmissionWriter::create(&config.output_dir, net)?;
    info!("Submission will be written to {:?}", writer.target_path());

    let loader = BatchLoader::new(validation.usable.clone(), config.batch_size, transform)?
        .with_prefetch(config.prefetch_batches)
        .with_workers(config.decode_parallelism());
    let stream = loader.into_stream()?;

    let engine = InferenceEngine::new(scorer);
    let pb = stage_progress("Inference", stream.num_batches(), show_progress);
    let mut batches = 0;

    for batch in stream {
        let batch = batch?;
        let predictions = engine.predict(&batch)?;
        writer.write_predictions(&predictions)?;
        batches += 1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    writer.write_fallbacks(&validation.corrupted)?;
    let output_path = writer.finish()?;

    Ok(RunSummary {
        output_path,
        usable: validation.usable.len(),
        corrupted: validation.corrupted.len(),
        batches,
    })
}

/// Run the pipeline end to end on the default backend.
///
/// The input directory and the checkpoint are checked before any output
/// is created.
pub fn run(config: &PredictConfig, show_progress: bool) -> Result<RunSummary> {
    config.validate()?;

    if !config.data_dir.exists() {
        return Err(PredictError::DataDirNotFound(config.data_dir.clone()));
    }
    if !config.data_dir.is_dir() {
        return Err(PredictError::NotADirectory(config.data_dir.clone()));
    }

    info!(
        "Backend: {} (num_threads hint {}, allow_soft_placement {})",
        backend_name(),
        config.num_threads,
        config.allow_soft_placement
    );

    let start = Instant::now();
    let device = default_device();
    let network = load_network::<DefaultBackend>(config, &device)?;
    let scorer = BurnScorer::new(network, device);
    info!(
        "Model ready in {:.2}s, scoring {} classes",
        start.elapsed().as_secs_f64(),
        scorer.num_classes()
    );

    let transform = Arc::new(ImagePreprocessor::new(config.image_size));

    run_with(config, scorer, transform, show_progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Batch;
    use crate::inference::ScoreMatrix;
    use crate::model::{ClassifierConfig, CnnClassifier, Net};
    use burn::config::Config;
    use burn::module::Module;
    use burn::record::CompactRecorder;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::fs::{self, File};
    use std::path::Path;

    const NUM_CLASSES: usize = 10;

    /// Reduces each image to its first pixel so scores depend only on
    /// the file content.
    struct ColorTransform;

    impl ImageTransform for ColorTransform {
        fn transform(&self, path: &Path) -> Result<Vec<f32>> {
            let image = image::ImageReader::open(path)
                .and_then(|reader| reader.with_guessed_format())
                .map_err(|e| PredictError::ImageLoad(path.to_path_buf(), e.to_string()))?
                .decode()
                .map_err(|e| PredictError::ImageLoad(path.to_path_buf(), e.to_string()))?
                .to_rgb8();
            let pixel = image.get_pixel(0, 0);
            Ok(vec![pixel[0] as f32, pixel[1] as f32, pixel[2] as f32])
        }

        fn image_size(&self) -> usize {
            1
        }
    }

    /// Scores class `i` by its distance to the image's red value
    struct DistanceScorer;

    impl ScoreModel for DistanceScorer {
        fn score(&self, batch: &Batch) -> Result<ScoreMatrix> {
            Ok(batch
                .images
                .iter()
                .map(|image| {
                    let bucket = (image[0] / 25.6).floor();
                    (0..NUM_CLASSES)
                        .map(|c| -((c as f32 - bucket).abs()))
                        .collect()
                })
                .collect())
        }
    }

    /// Fails on the second call
    struct FailingScorer(std::cell::Cell<usize>);

    impl ScoreModel for FailingScorer {
        fn score(&self, batch: &Batch) -> Result<ScoreMatrix> {
            let calls = self.0.get() + 1;
            self.0.set(calls);
            if calls == 2 {
                return Err(PredictError::Inference("device lost".into()));
            }
            Ok(vec![vec![0.0; NUM_CLASSES]; batch.len()])
        }
    }

    fn write_image(path: &Path, red: u8, format: ImageFormat) {
        RgbImage::from_pixel(4, 4, Rgb([red, 0, 0]))
            .save_with_format(path, format)
            .unwrap();
    }

    fn config(data_dir: &Path, output_dir: &Path, batch_size: usize) -> PredictConfig {
        PredictConfig {
            data_dir: data_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            batch_size,
            num_classes: NUM_CLASSES,
            decode_workers: Some(3),
            ..PredictConfig::default()
        }
    }

    fn rows(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_valid_and_corrupted_entries() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();

        write_image(&data.path().join("a.jpg"), 200, ImageFormat::Png);
        fs::write(data.path().join("b.jpg"), "plain text, not an image").unwrap();
        File::create(data.path().join("c.png")).unwrap();

        let summary = run_with(
            &config(data.path(), out.path(), 16),
            DistanceScorer,
            Arc::new(ColorTransform),
            false,
        )
        .unwrap();

        assert_eq!(summary.usable, 1);
        assert_eq!(summary.corrupted, 2);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.output_path, out.path().join("0_submission_cnn.csv"));
        assert_eq!(
            rows(&summary.output_path),
            vec!["id,predicted", "a,7 6 8", "b,93 83 2", "c,93 83 2"]
        );
    }

    #[test]
    fn test_batch_size_does_not_change_output() {
        let data = tempfile::tempdir().unwrap();
        for i in 0..11u8 {
            write_image(&data.path().join(format!("img_{i:02}.png")), i * 23, ImageFormat::Png);
        }
        fs::write(data.path().join("broken.gif"), "GIF? no").unwrap();

        let mut outputs = Vec::new();
        for batch_size in [1, 2, 4, 11, 32] {
            let out = tempfile::tempdir().unwrap();
            let summary = run_with(
                &config(data.path(), out.path(), batch_size),
                DistanceScorer,
                Arc::new(ColorTransform),
                false,
            )
            .unwrap();
            assert_eq!(summary.batches, 11usize.div_ceil(batch_size));
            outputs.push(rows(&summary.output_path));
        }

        assert_eq!(outputs[0].len(), 13);
        assert_eq!(outputs[0].last().unwrap(), "broken,93 83 2");
        assert!(outputs.iter().all(|rows| rows == &outputs[0]));
    }

    #[test]
    fn test_rerun_creates_new_equivalent_file() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(&data.path().join("x.png"), 90, ImageFormat::Png);
        write_image(&data.path().join("y.jpg"), 10, ImageFormat::Jpeg);

        let config = config(data.path(), out.path(), 4);
        let first = run_with(&config, DistanceScorer, Arc::new(ColorTransform), false).unwrap();
        let second = run_with(&config, DistanceScorer, Arc::new(ColorTransform), false).unwrap();

        assert_eq!(first.output_path, out.path().join("0_submission_cnn.csv"));
        assert_eq!(second.output_path, out.path().join("1_submission_cnn.csv"));
        assert_eq!(rows(&first.output_path), rows(&second.output_path));
    }

    #[test]
    fn test_scoring_failure_leaves_no_artifact() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for i in 0..5u8 {
            write_image(&data.path().join(format!("{i}.png")), i, ImageFormat::Png);
        }

        let result = run_with(
            &config(data.path(), out.path(), 2),
            FailingScorer(std::cell::Cell::new(0)),
            Arc::new(ColorTransform),
            false,
        );

        assert!(matches!(result, Err(PredictError::Inference(_))));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_decode_failure_after_validation_leaves_no_artifact() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(&data.path().join("a.png"), 40, ImageFormat::Png);
        // Valid PNG signature, truncated body: passes the header check only
        fs::write(
            data.path().join("b.png"),
            b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR\x00\x00",
        )
        .unwrap();
        write_image(&data.path().join("c.png"), 80, ImageFormat::Png);

        let result = run_with(
            &config(data.path(), out.path(), 1),
            DistanceScorer,
            Arc::new(ColorTransform),
            false,
        );

        match result {
            Err(PredictError::ImageLoad(path, _)) => {
                assert_eq!(path, data.path().join("b.png"))
            }
            other => panic!("expected a decode error, got {:?}", other),
        }
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_data_dir_creates_no_output() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("submissions");

        let result = run_with(
            &config(&root.path().join("missing"), &out, 4),
            DistanceScorer,
            Arc::new(ColorTransform),
            false,
        );

        assert!(matches!(result, Err(PredictError::DataDirNotFound(_))));
        assert!(!out.exists());
    }

    #[test]
    fn test_run_requires_checkpoint_before_output() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        fs::create_dir(&data).unwrap();
        write_image(&data.join("a.png"), 1, ImageFormat::Png);

        let config = PredictConfig {
            checkpoint_dir: root.path().join("models"),
            ..config(&data, &root.path().join("out"), 4)
        };

        assert!(matches!(
            run(&config, false),
            Err(PredictError::CheckpointNotFound(_))
        ));
        assert!(!root.path().join("out").exists());
    }

    #[test]
    fn test_run_with_restored_network() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        let models = root.path().join("models");
        fs::create_dir_all(&data).unwrap();
        fs::create_dir_all(&models).unwrap();

        write_image(&data.join("leaf.png"), 120, ImageFormat::Png);
        write_image(&data.join("stem.jpg"), 30, ImageFormat::Jpeg);
        fs::write(data.join("note.jpg"), "").unwrap();

        let model_config = ClassifierConfig::new()
            .with_num_classes(NUM_CLASSES)
            .with_input_size(16)
            .with_base_filters(2);
        CnnClassifier::<DefaultBackend>::new(&model_config, &default_device())
            .save_file(models.join("model"), &CompactRecorder::new())
            .unwrap();
        model_config.save(models.join("config.json")).unwrap();

        let config = PredictConfig {
            checkpoint_dir: models,
            image_size: 16,
            net: Net::Cnn.to_string(),
            ..config(&data, &root.path().join("out"), 2)
        };

        let first = run(&config, false).unwrap();
        let second = run(&config, false).unwrap();

        let lines = rows(&first.output_path);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "id,predicted");
        assert!(lines[1].starts_with("leaf,"));
        assert!(lines[2].starts_with("stem,"));
        assert_eq!(lines[3], "note,93 83 2");
        assert_eq!(lines, rows(&second.output_path));
    }
}
