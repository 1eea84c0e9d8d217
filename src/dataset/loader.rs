//! Batch Loader
//!
//! Turns the usable records into a lazy, single-pass stream of batches.
//! A producer thread decodes each batch on a rayon pool and hands it to
//! the consumer through a bounded channel, so decoding of the next batch
//! overlaps with inference on the current one. Decoding runs in parallel
//! but batch contents always follow the record order.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rayon::prelude::*;
use tracing::{debug, warn};

use super::validate::InputRecord;
use crate::utils::error::{PredictError, Result};

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Converts an image file into a fixed-size normalized tensor.
///
/// Implementations must be pure with respect to the file contents: the
/// same bytes always produce the same tensor.
pub trait ImageTransform: Send + Sync {
    /// Decode `path` into a CHW tensor of `3 * size * size` floats
    fn transform(&self, path: &Path) -> Result<Vec<f32>>;

    /// Side length of the square output
    fn image_size(&self) -> usize;
}

/// Decode, resize and normalize images with the `image` crate
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Target square resolution
    pub image_size: usize,
}

impl ImagePreprocessor {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    /// Resize and normalize an already decoded image
    pub fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        let size = self.image_size as u32;
        let resized = image.resize_exact(size, size, FilterType::Triangle);
        normalize_image(&resized)
    }
}

impl ImageTransform for ImagePreprocessor {
    fn transform(&self, path: &Path) -> Result<Vec<f32>> {
        // Format comes from the content; validation already ignored the extension
        let image = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| PredictError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| PredictError::ImageLoad(path.to_path_buf(), e.to_string()))?;

        Ok(self.preprocess(&image))
    }

    fn image_size(&self) -> usize {
        self.image_size
    }
}

/// Normalize an image to a flat vector with ImageNet normalization
/// Returns CHW layout: [C, H, W] flattened
fn normalize_image(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let num_pixels = (width * height) as usize;

    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            normalized[c * num_pixels + i] =
                (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    normalized
}

/// A group of decoded images handed to the classifier in one call
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// CHW tensors, one per image
    pub images: Vec<Vec<f32>>,
    /// Ids, parallel to `images`
    pub ids: Vec<String>,
    /// Side length of every image
    pub image_size: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All images concatenated, ready for a `[n, 3, s, s]` tensor
    pub fn flattened(&self) -> Vec<f32> {
        let mut data = Vec::with_capacity(self.len() * 3 * self.image_size * self.image_size);
        for image in &self.images {
            data.extend_from_slice(image);
        }
        data
    }
}

/// Builder for a batch stream over the usable records
pub struct BatchLoader<T: ImageTransform + 'static> {
    records: Vec<InputRecord>,
    batch_size: usize,
    transform: Arc<T>,
    prefetch_batches: usize,
    workers: usize,
}

impl<T: ImageTransform + 'static> BatchLoader<T> {
    /// Create a loader; `batch_size` must be positive
    pub fn new(records: Vec<InputRecord>, batch_size: usize, transform: Arc<T>) -> Result<Self> {
        if batch_size == 0 {
            return Err(PredictError::Config("batch_size must be greater than 0".into()));
        }

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(Self {
            records,
            batch_size,
            transform,
            prefetch_batches: 1,
            workers,
        })
    }

    /// Number of decoded batches buffered ahead of the consumer
    pub fn with_prefetch(mut self, prefetch_batches: usize) -> Self {
        self.prefetch_batches = prefetch_batches;
        self
    }

    /// Size of the decode pool
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Number of batches the stream will yield
    pub fn num_batches(&self) -> usize {
        self.records.len().div_ceil(self.batch_size)
    }

    /// Start the producer and return the consuming end.
    ///
    /// The stream cannot be restarted; build a new loader for a new run.
    pub fn into_stream(self) -> Result<BatchStream> {
        let num_batches = self.num_batches();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("decode-{i}"))
            .build()
            .map_err(|e| PredictError::Config(format!("Failed to build decode pool: {e}")))?;

        debug!(
            "Starting batch loader: {} batches, {} workers, prefetch {}",
            num_batches, self.workers, self.prefetch_batches
        );

        let (tx, rx) = mpsc::sync_channel(self.prefetch_batches);
        let Self {
            records,
            batch_size,
            transform,
            ..
        } = self;

        let handle = thread::Builder::new()
            .name("batch-loader".into())
            .spawn(move || produce(records, batch_size, transform, pool, tx))?;

        Ok(BatchStream {
            rx: Some(rx),
            handle: Some(handle),
            num_batches,
            finished: false,
        })
    }
}

fn produce<T: ImageTransform>(
    records: Vec<InputRecord>,
    batch_size: usize,
    transform: Arc<T>,
    pool: rayon::ThreadPool,
    tx: SyncSender<Result<Batch>>,
) {
    let image_size = transform.image_size();

    for chunk in records.chunks(batch_size) {
        // `collect` keeps input order regardless of which worker finishes first
        let decoded: Result<Vec<Vec<f32>>> = pool.install(|| {
            chunk
                .par_iter()
                .map(|record| transform.transform(&record.path))
                .collect()
        });

        let failed = decoded.is_err();
        let message = decoded.map(|images| Batch {
            images,
            ids: chunk.iter().map(|r| r.id.clone()).collect(),
            image_size,
        });

        if tx.send(message).is_err() {
            debug!("Batch consumer dropped, stopping loader");
            return;
        }
        if failed {
            return;
        }
    }
}

/// Consuming end of the batch pipeline
pub struct BatchStream {
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
    num_batches: usize,
    finished: bool,
}

impl BatchStream {
    /// Number of batches the stream yields when nothing fails
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let rx = self.rx.as_ref()?;

        match rx.recv() {
            Ok(Ok(batch)) => Some(Ok(batch)),
            Ok(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Err(_) => {
                self.finished = true;
                match self.handle.take().map(JoinHandle::join) {
                    Some(Err(_)) => Some(Err(PredictError::Io(std::io::Error::other(
                        "batch loader thread panicked",
                    )))),
                    _ => None,
                }
            }
        }
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        // Hang up first so a blocked producer sees the closed channel
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Batch loader thread panicked");
            }
        }
    }
}
