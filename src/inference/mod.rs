//! Inference module: batch scoring and top-3 ranking
//!
//! `ScoreModel` is the seam between the pipeline and the network. The
//! production implementation is `BurnScorer`; tests plug in deterministic
//! fakes.

pub mod engine;
pub mod scorer;

// Re-export main types for convenience
pub use engine::{top_k, InferenceEngine, Prediction, ScoreMatrix, ScoreModel};
pub use scorer::BurnScorer;
