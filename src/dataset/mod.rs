//! Dataset module: input discovery and batched image delivery
//!
//! This module provides:
//! - Header sniffing for the accepted image formats
//! - Validation of the input directory into usable and corrupted entries
//! - A prefetching batch loader that decodes images on a worker pool
//!
//! ## Ordering
//!
//! Usable records keep the scan order from validation through to the
//! batches the loader yields, whatever the decode parallelism.

pub mod format;
pub mod loader;
pub mod validate;

// Re-export main types for convenience
pub use format::{detect_format, ImageKind};
pub use loader::{Batch, BatchLoader, BatchStream, ImagePreprocessor, ImageTransform};
pub use validate::{is_usable, scan_directory, InputRecord, ValidationResult};
