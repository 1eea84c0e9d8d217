//! Inference Engine
//!
//! Applies a scoring model to each batch and reduces every row of scores
//! to the three best class indices.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Batch;
use crate::utils::error::{PredictError, Result};
use crate::TOP_K;

/// One row of class scores per image in the batch
pub type ScoreMatrix = Vec<Vec<f32>>;

/// Anything that can score a batch of decoded images.
///
/// Implementations must return exactly one row per image, in batch order,
/// and every row must cover the same number of classes.
pub trait ScoreModel {
    fn score(&self, batch: &Batch) -> Result<ScoreMatrix>;
}

/// Ranked classes for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Id of the scored image
    pub id: String,
    /// Best class first
    pub top3: [usize; TOP_K],
}

/// Indices of the `k` highest scores.
///
/// Higher scores come first; equal scores are ordered by ascending index.
/// `f32::total_cmp` gives NaN a fixed place so the ranking never depends
/// on sort internals.
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    indices.truncate(k);
    indices
}

/// Runs a scoring model over batches
pub struct InferenceEngine<S: ScoreModel> {
    scorer: S,
}

impl<S: ScoreModel> InferenceEngine<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }

    /// Score a batch and rank each image's classes.
    ///
    /// The result is parallel to `batch.ids`.
    pub fn predict(&self, batch: &Batch) -> Result<Vec<Prediction>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.scorer.score(batch)?;
        if scores.len() != batch.len() {
            return Err(PredictError::Inference(format!(
                "Scorer returned {} rows for a batch of {}",
                scores.len(),
                batch.len()
            )));
        }

        debug!("Scored batch of {}", batch.len());

        batch
            .ids
            .iter()
            .zip(&scores)
            .map(|(id, row)| {
                if row.len() < TOP_K {
                    return Err(PredictError::Inference(format!(
                        "Score row for '{}' has {} classes, need at least {}",
                        id,
                        row.len(),
                        TOP_K
                    )));
                }
                let ranked = top_k(row, TOP_K);
                Ok(Prediction {
                    id: id.clone(),
                    top3: [ranked[0], ranked[1], ranked[2]],
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a fixed matrix regardless of the batch
    struct FixedScorer(ScoreMatrix);

    impl ScoreModel for FixedScorer {
        fn score(&self, _batch: &Batch) -> Result<ScoreMatrix> {
            Ok(self.0.clone())
        }
    }

    fn batch(ids: &[&str]) -> Batch {
        Batch {
            images: ids.iter().map(|_| vec![0.0; 3]).collect(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
            image_size: 1,
        }
    }

    #[test]
    fn test_top_k_orders_by_score() {
        assert_eq!(top_k(&[0.1, 0.9, 0.5, 0.7], 3), vec![1, 3, 2]);
    }

    #[test]
    fn test_top_k_ties_prefer_lower_index() {
        assert_eq!(top_k(&[0.5, 0.2, 0.5, 0.5], 3), vec![0, 2, 3]);
        assert_eq!(top_k(&[1.0; 6], 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_top_k_with_nan_is_stable() {
        let scores = [0.3, f32::NAN, 0.9, 0.1];
        assert_eq!(top_k(&scores, 3), top_k(&scores, 3));
        assert_eq!(top_k(&scores, 3).len(), 3);
    }

    #[test]
    fn test_predict_pairs_ids_with_rows() {
        let engine = InferenceEngine::new(FixedScorer(vec![
            vec![0.0, 0.1, 0.2, 0.3],
            vec![0.9, 0.8, 0.7, 0.6],
        ]));

        let predictions = engine.predict(&batch(&["x", "y"])).unwrap();
        assert_eq!(
            predictions,
            vec![
                Prediction {
                    id: "x".into(),
                    top3: [3, 2, 1]
                },
                Prediction {
                    id: "y".into(),
                    top3: [0, 1, 2]
                },
            ]
        );
    }

    #[test]
    fn test_row_count_mismatch_is_error() {
        let engine = InferenceEngine::new(FixedScorer(vec![vec![0.0; 5]]));
        assert!(matches!(
            engine.predict(&batch(&["x", "y"])),
            Err(PredictError::Inference(_))
        ));
    }

    #[test]
    fn test_too_few_classes_is_error() {
        let engine = InferenceEngine::new(FixedScorer(vec![vec![0.2, 0.1]]));
        assert!(matches!(
            engine.predict(&batch(&["x"])),
            Err(PredictError::Inference(_))
        ));
    }

    #[test]
    fn test_empty_batch_skips_scorer() {
        let engine = InferenceEngine::new(FixedScorer(vec![vec![0.0; 5]]));
        assert!(engine.predict(&batch(&[])).unwrap().is_empty());
    }
}
