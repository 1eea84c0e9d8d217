//! Burn-backed scoring model

use burn::tensor::{backend::Backend, Tensor, TensorData};

use super::engine::{ScoreMatrix, ScoreModel};
use crate::dataset::Batch;
use crate::model::Network;
use crate::utils::error::{PredictError, Result};

/// Scores batches with a restored network.
///
/// Meant for a non-autodiff backend: dropout is then a no-op and batch
/// norm uses its running statistics.
pub struct BurnScorer<B: Backend> {
    network: Network<B>,
    device: B::Device,
}

impl<B: Backend> BurnScorer<B> {
    pub fn new(network: Network<B>, device: B::Device) -> Self {
        Self { network, device }
    }

    pub fn num_classes(&self) -> usize {
        self.network.num_classes()
    }
}

impl<B: Backend> ScoreModel for BurnScorer<B> {
    fn score(&self, batch: &Batch) -> Result<ScoreMatrix> {
        let n = batch.len();
        let size = batch.image_size;
        let expected = 3 * size * size;

        if let Some((id, image)) = batch
            .ids
            .iter()
            .zip(&batch.images)
            .find(|(_, image)| image.len() != expected)
        {
            return Err(PredictError::Inference(format!(
                "Image '{}' has {} values, expected {} for {}x{} RGB",
                id,
                image.len(),
                expected,
                size,
                size
            )));
        }

        let input = Tensor::<B, 4>::from_data(
            TensorData::new(batch.flattened(), [n, 3, size, size]),
            &self.device,
        );

        let logits = self.network.forward(input);
        let [rows, classes] = logits.dims();

        let values: Vec<f32> = logits
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| PredictError::Inference(format!("Failed to read scores: {:?}", e)))?;

        if rows != n || classes == 0 {
            return Err(PredictError::Inference(format!(
                "Network produced a {rows}x{classes} score matrix for {n} images"
            )));
        }

        Ok(values.chunks(classes).map(<[f32]>::to_vec).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceEngine;
    use crate::model::{ClassifierConfig, CnnLiteClassifier};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn scorer() -> BurnScorer<TestBackend> {
        let device = Default::default();
        let config = ClassifierConfig::new()
            .with_num_classes(6)
            .with_input_size(8)
            .with_base_filters(2);
        let network = Network::CnnLite(CnnLiteClassifier::new(&config, &device));
        BurnScorer::new(network, device)
    }

    fn batch(n: usize, size: usize) -> Batch {
        Batch {
            images: (0..n).map(|i| vec![i as f32 * 0.1; 3 * size * size]).collect(),
            ids: (0..n).map(|i| format!("img{i}")).collect(),
            image_size: size,
        }
    }

    #[test]
    fn test_one_row_per_image() {
        let scores = scorer().score(&batch(3, 8)).unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|row| row.len() == 6));
    }

    #[test]
    fn test_scores_do_not_depend_on_batch_neighbours() {
        let scorer = scorer();
        let together = scorer.score(&batch(4, 8)).unwrap();

        let mut single = batch(4, 8);
        single.images.drain(..3);
        single.ids.drain(..3);
        let alone = scorer.score(&single).unwrap();

        for (a, b) in together[3].iter().zip(&alone[0]) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_wrong_image_length_is_rejected() {
        let mut bad = batch(2, 8);
        bad.images[1].pop();
        assert!(matches!(scorer().score(&bad), Err(PredictError::Inference(_))));
    }

    #[test]
    fn test_engine_over_burn_scorer() {
        let engine = InferenceEngine::new(scorer());
        let predictions = engine.predict(&batch(2, 8)).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[1].id, "img1");
        assert!(predictions.iter().all(|p| p.top3.iter().all(|&c| c < 6)));
    }
}
