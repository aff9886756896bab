//! Burn networks for both tensor layouts and the glue that turns a trained network
//! into a [`Classifier`].

pub mod conv;
pub mod recurrent;

use std::path::Path;

use burn::backend::NdArray;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::activation::softmax;
use ndarray::{ArrayD, ArrayViewD, Axis};

pub use conv::{ConvNet, ConvNetConfig};
pub use recurrent::{RecurrentNet, RecurrentNetConfig};

use crate::cache::CacheArtifact;
use crate::config::Mode;
use crate::error::{Error, Result};
use crate::inference::Classifier;

/// Backend used for inference on the CPU.
pub type InferenceBackend = NdArray;

/// A network taking a rank-`D` batch and returning `[batch, classes]` logits.
pub trait Network<B: Backend, const D: usize> {
    fn logits(&self, input: Tensor<B, D>) -> Tensor<B, 2>;
}

pub fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// `(steps, coeffs)` of one sample in the cached dataset.
fn input_dims(artifact: &CacheArtifact) -> Result<(usize, usize)> {
    match artifact.dataset.sample_shape() {
        [steps, coeffs, ..] => Ok((*steps, *coeffs)),
        other => Err(Error::Model(format!("unexpected sample shape {other:?}"))),
    }
}

pub fn conv_config(artifact: &CacheArtifact) -> Result<ConvNetConfig> {
    let (steps, coeffs) = input_dims(artifact)?;
    if steps < 2 || coeffs < 2 {
        return Err(Error::Model(format!(
            "conv input {steps}x{coeffs} is too small to pool"
        )));
    }
    Ok(ConvNetConfig::new(steps, coeffs, artifact.classes.len()))
}

pub fn recurrent_config(artifact: &CacheArtifact) -> Result<RecurrentNetConfig> {
    let (steps, coeffs) = input_dims(artifact)?;
    Ok(RecurrentNetConfig::new(steps, coeffs, artifact.classes.len()))
}

/// Rows `indices` of `features` as a burn tensor.
pub fn features_tensor<B: Backend, const D: usize>(
    features: &ArrayD<f32>,
    indices: &[usize],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let batch = features.select(Axis(0), indices);
    array_tensor(batch.view(), device)
}

/// Class indices as an integer tensor for the loss.
pub fn targets_tensor<B: Backend>(classes: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = classes.iter().map(|&c| c as i64).collect();
    Tensor::from_data(TensorData::new(data, [classes.len()]), device)
}

fn array_tensor<B: Backend, const D: usize>(
    array: ArrayViewD<'_, f32>,
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    if array.ndim() != D {
        return Err(Error::Model(format!(
            "expected a rank {D} input, got shape {:?}",
            array.shape()
        )));
    }
    let shape = array.shape().to_vec();
    let data: Vec<f32> = array.iter().copied().collect();
    Ok(Tensor::from_data(TensorData::new(data, shape), device))
}

/// Row-major `[batch, classes]` tensor to one vector per row.
pub fn tensor_rows<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, width] = tensor.dims();
    let flat = tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Model(format!("{e:?}")))?;
    Ok(flat.chunks(width.max(1)).map(<[f32]>::to_vec).collect())
}

/// A trained rank-`D` network plus the device it lives on.
pub struct BurnClassifier<B: Backend, M, const D: usize> {
    model: M,
    device: B::Device,
}

impl<B: Backend, M, const D: usize> BurnClassifier<B, M, D> {
    pub fn new(model: M, device: B::Device) -> Self {
        Self { model, device }
    }
}

impl<B: Backend, M: Module<B>, const D: usize> BurnClassifier<B, M, D> {
    /// Load weights saved by training into a freshly initialized `model`.
    pub fn load(model: M, path: &Path, device: B::Device) -> Result<Self> {
        let model = model
            .load_file(path, &recorder(), &device)
            .map_err(|e| Error::Model(format!("failed to load {}: {e:?}", path.display())))?;
        Ok(Self::new(model, device))
    }
}

impl<B: Backend, M: Network<B, D>, const D: usize> Classifier for BurnClassifier<B, M, D> {
    fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<Vec<f32>> {
        let x = array_tensor::<B, D>(input, &self.device)?;
        let probs = softmax(self.model.logits(x), 1);
        tensor_rows(probs)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Model("empty prediction batch".into()))
    }
}

/// Rebuild the network for `artifact.config.mode` and load its trained weights.
pub fn load_classifier(artifact: &CacheArtifact, path: &Path) -> Result<Box<dyn Classifier>> {
    let device = Default::default();
    Ok(match artifact.config.mode {
        Mode::Conv => {
            let model = conv_config(artifact)?.init::<InferenceBackend>(&device);
            Box::new(BurnClassifier::<InferenceBackend, _, 4>::load(model, path, device)?)
        }
        Mode::Time => {
            let model = recurrent_config(artifact)?.init::<InferenceBackend>(&device);
            Box::new(BurnClassifier::<InferenceBackend, _, 3>::load(model, path, device)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FeatureParams};
    use crate::dataset::{FeatureDataset, Normalization};
    use ndarray::{Array, Array2};

    type B = InferenceBackend;

    fn artifact(mode: Mode) -> CacheArtifact {
        let features = match mode {
            Mode::Conv => Array::zeros((3, 9, 13, 1)).into_dyn(),
            Mode::Time => Array::zeros((3, 9, 13)).into_dyn(),
        };
        CacheArtifact {
            config: Config::with_params(mode, FeatureParams::default(), "."),
            normalization: Normalization::new(0.0, 1.0).unwrap(),
            classes: vec!["a".into(), "b".into(), "c".into()],
            dataset: FeatureDataset {
                features,
                labels: Array2::zeros((3, 3)),
            },
        }
    }

    #[test]
    fn conv_classifier_outputs_a_distribution() {
        let device = Default::default();
        let model = conv_config(&artifact(Mode::Conv)).unwrap().init::<B>(&device);
        let classifier = BurnClassifier::<B, _, 4>::new(model, device);

        let input = Array::from_elem((1, 9, 13, 1), 0.5f32).into_dyn();
        let probs = classifier.predict(input.view()).unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn recurrent_classifier_outputs_a_distribution() {
        let device = Default::default();
        let model = recurrent_config(&artifact(Mode::Time)).unwrap().init::<B>(&device);
        let classifier = BurnClassifier::<B, _, 3>::new(model, device);

        let input = Array::from_elem((1, 9, 13), 0.5f32).into_dyn();
        let probs = classifier.predict(input.view()).unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn rank_mismatch_is_reported() {
        let device = Default::default();
        let model = recurrent_config(&artifact(Mode::Time)).unwrap().init::<B>(&device);
        let classifier = BurnClassifier::<B, _, 3>::new(model, device);

        let input = Array::from_elem((1, 9, 13, 1), 0.5f32).into_dyn();
        assert!(matches!(classifier.predict(input.view()), Err(Error::Model(_))));
    }

    #[test]
    fn weights_roundtrip_through_the_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time.model");
        let device = Default::default();
        let art = artifact(Mode::Time);

        let model = recurrent_config(&art).unwrap().init::<B>(&device);
        let input = Array::from_elem((1, 9, 13), 0.25f32).into_dyn();
        let before = BurnClassifier::<B, _, 3>::new(model.clone(), device)
            .predict(input.view())
            .unwrap();
        model.save_file(&path, &recorder()).unwrap();

        let loaded = load_classifier(&art, &path).unwrap();
        let after = loaded.predict(input.view()).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
