use std::path::Path;

use anyhow::{anyhow, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use timbre_core::dataset::argmax;
use timbre_core::model::{features_tensor, recorder, targets_tensor, tensor_rows, Network};
use timbre_core::FeatureDataset;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Trailing fraction of the dataset held out for validation.
    pub validation_split: f64,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            validation_split: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_accuracy: Option<f64>,
}

/// The epoch whose checkpoint was kept: the first with the highest validation
/// accuracy, or the last epoch when nothing was validated.
pub fn kept_epoch(history: &[EpochStats]) -> Option<&EpochStats> {
    let mut kept: Option<&EpochStats> = None;
    for stats in history {
        let better = match (kept.and_then(|k| k.valid_accuracy), stats.valid_accuracy) {
            (_, None) => true,
            (None, Some(_)) => true,
            (Some(prev), Some(acc)) => acc > prev,
        };
        if better {
            kept = Some(stats);
        }
    }
    kept
}

/// `n / (k * count)` per class; classes absent from `labels` keep weight 1.
pub fn balanced_class_weights(labels: &[usize], num_classes: usize) -> Vec<f32> {
    let mut counts = vec![0usize; num_classes];
    for &l in labels {
        counts[l] += 1;
    }
    let present = counts.iter().filter(|&&c| c > 0).count().max(1);
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                1.0
            } else {
                labels.len() as f32 / (present * c) as f32
            }
        })
        .collect()
}

/// Split `0..n` into leading training and trailing validation indices.
pub fn split_indices(n: usize, validation_split: f64) -> (Vec<usize>, Vec<usize>) {
    let valid = ((n as f64) * validation_split.clamp(0.0, 1.0)).floor() as usize;
    let pivot = n - valid;
    ((0..pivot).collect(), (pivot..n).collect())
}

/// Train `model` on `dataset`, checkpointing the best validation accuracy to
/// `model_path`. Without a validation split every epoch overwrites the checkpoint.
pub fn train<B, M, const D: usize>(
    mut model: M,
    dataset: &FeatureDataset,
    options: &TrainOptions,
    model_path: &Path,
    device: &B::Device,
) -> Result<Vec<EpochStats>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Network<B, D>,
    M::InnerModule: Network<B::InnerBackend, D>,
{
    let labels = dataset.class_indices();
    let (mut train_idx, valid_idx) = split_indices(labels.len(), options.validation_split);
    anyhow::ensure!(!train_idx.is_empty(), "no training samples after the validation split");
    info!(
        "Training on {} samples, validating on {}",
        train_idx.len(),
        valid_idx.len()
    );

    let train_labels: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();
    let weights = balanced_class_weights(&train_labels, dataset.class_count());
    info!("Class weights: {weights:?}");

    let loss_fn = CrossEntropyLossConfig::new()
        .with_weights(Some(weights))
        .init(device);
    let mut optim = AdamConfig::new().init();
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut history = Vec::with_capacity(options.epochs);
    let mut best: Option<f64> = None;

    for epoch in 1..=options.epochs {
        train_idx.shuffle(&mut rng);

        let mut loss_sum = 0.0;
        let mut batches = 0usize;
        for batch in train_idx.chunks(options.batch_size.max(1)) {
            let x = features_tensor::<B, D>(&dataset.features, batch, device)?;
            let targets: Vec<usize> = batch.iter().map(|&i| labels[i]).collect();
            let y = targets_tensor::<B>(&targets, device);

            let loss = loss_fn.forward(model.logits(x), y);
            loss_sum += loss.clone().into_scalar().elem::<f64>();
            batches += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(options.learning_rate, model, grads);
        }

        let train_loss = loss_sum / batches.max(1) as f64;
        let valid_accuracy = if valid_idx.is_empty() {
            None
        } else {
            Some(accuracy::<B::InnerBackend, M::InnerModule, D>(
                &model.valid(),
                dataset,
                &valid_idx,
                &labels,
                options.batch_size,
                device,
            )?)
        };

        match valid_accuracy {
            Some(acc) => info!("epoch {epoch}: loss {train_loss:.4}, val_acc {acc:.4}"),
            None => info!("epoch {epoch}: loss {train_loss:.4}"),
        }

        let improved = match (valid_accuracy, best) {
            (None, _) => true,
            (Some(acc), Some(prev)) => acc > prev,
            (Some(_), None) => true,
        };
        if improved {
            if let Some(acc) = valid_accuracy {
                best = Some(acc);
            }
            model
                .valid()
                .save_file(model_path, &recorder())
                .map_err(|e| anyhow!("failed to save {}: {e:?}", model_path.display()))?;
            info!("Saved checkpoint to {}", model_path.display());
        }

        history.push(EpochStats {
            epoch,
            train_loss,
            valid_accuracy,
        });
    }

    if history.is_empty() {
        warn!("Zero epochs requested, nothing was saved");
    }
    Ok(history)
}

fn accuracy<B: Backend, M: Network<B, D>, const D: usize>(
    model: &M,
    dataset: &FeatureDataset,
    indices: &[usize],
    labels: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> Result<f64> {
    let mut hits = 0usize;
    for batch in indices.chunks(batch_size.max(1)) {
        let x = features_tensor::<B, D>(&dataset.features, batch, device)?;
        let rows = tensor_rows(model.logits(x))?;
        hits += rows
            .iter()
            .zip(batch)
            .filter(|(row, i)| argmax(row.iter().copied()) == labels[**i])
            .count();
    }
    Ok(hits as f64 / indices.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use ndarray::Array;
    use timbre_core::dataset::one_hot;
    use timbre_core::model::RecurrentNetConfig;

    #[test]
    fn balanced_weights_match_inverse_frequency() {
        let w = balanced_class_weights(&[0, 0, 0, 1], 3);
        assert!((w[0] - 4.0 / 6.0).abs() < 1e-6);
        assert!((w[1] - 2.0).abs() < 1e-6);
        assert_eq!(w[2], 1.0);
    }

    #[test]
    fn validation_takes_the_tail() {
        let (train, valid) = split_indices(25, 0.1);
        assert_eq!(train.len(), 23);
        assert_eq!(valid, vec![23, 24]);
        assert_eq!(split_indices(5, 0.1).1.len(), 0);
    }

    fn stats(epoch: usize, valid_accuracy: Option<f64>) -> EpochStats {
        EpochStats {
            epoch,
            train_loss: 1.0,
            valid_accuracy,
        }
    }

    #[test]
    fn first_best_accuracy_is_kept() {
        let history = [
            stats(1, Some(0.5)),
            stats(2, Some(0.75)),
            stats(3, Some(0.75)),
            stats(4, Some(0.25)),
        ];
        assert_eq!(kept_epoch(&history).unwrap().epoch, 2);

        let unvalidated = [stats(1, None), stats(2, None)];
        assert_eq!(kept_epoch(&unvalidated).unwrap().epoch, 2);
        assert!(kept_epoch(&[]).is_none());
    }

    #[test]
    fn short_run_writes_a_checkpoint() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time.model");

        let n = 20;
        let features = Array::from_shape_fn((n, 4, 3), |(i, t, k)| {
            ((i % 2) as f32 * 0.5 + t as f32 * 0.1 + k as f32 * 0.01).min(1.0)
        })
        .into_dyn();
        let indices: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let dataset = FeatureDataset {
            features,
            labels: one_hot(&indices, 2).unwrap(),
        };

        let model = RecurrentNetConfig::new(4, 3, 2)
            .with_hidden_size(8)
            .init::<B>(&device);
        let options = TrainOptions {
            epochs: 2,
            batch_size: 8,
            ..TrainOptions::default()
        };
        let history = train::<B, _, 3>(model, &dataset, &options, &path, &device).unwrap();

        assert_eq!(history.iter().map(|h| h.epoch).collect::<Vec<_>>(), vec![1, 2]);
        assert!(history.iter().all(|h| h.train_loss.is_finite()));
        assert!(history[0].valid_accuracy.is_some());
        assert!(dir.path().join("time.mpk").is_file());
    }
}
