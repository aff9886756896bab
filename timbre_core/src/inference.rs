use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, ArrayViewD, Axis};

use crate::audio::{AudioSource, DirSource, FeatureExtractor};
use crate::cache::CacheArtifact;
use crate::dataset::{argmax, shape_window};
use crate::error::{Error, Result};

/// A trained model seen from the outside: one batch-of-one input in, class
/// probabilities out.
pub trait Classifier {
    fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<Vec<f32>>;
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<Vec<f32>> {
        (**self).predict(input)
    }
}

/// Window-level truth and predictions plus the mean probability vector per file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
    pub true_labels: Vec<usize>,
    pub predicted_labels: Vec<usize>,
    pub file_probabilities: BTreeMap<String, Vec<f32>>,
}

impl Predictions {
    /// Fraction of windows whose arg-max matches the ground truth.
    pub fn accuracy(&self) -> f64 {
        if self.true_labels.is_empty() {
            return 0.0;
        }
        let hits = self
            .true_labels
            .iter()
            .zip(&self.predicted_labels)
            .filter(|(t, p)| t == p)
            .count();
        hits as f64 / self.true_labels.len() as f64
    }

    /// Class index with the highest mean probability for `file`.
    pub fn predicted_class(&self, file: &str) -> Option<usize> {
        self.file_probabilities
            .get(file)
            .map(|p| argmax(p.iter().copied()))
    }
}

/// Slides non-overlapping windows over whole clips and aggregates per file.
pub struct Predictor<'a, F, C> {
    artifact: &'a CacheArtifact,
    extractor: &'a F,
    model: C,
}

impl<'a, F: FeatureExtractor, C: Classifier> Predictor<'a, F, C> {
    /// `artifact` supplies the training-time window length, mode and bounds.
    pub fn new(artifact: &'a CacheArtifact, extractor: &'a F, model: C) -> Self {
        Self {
            artifact,
            extractor,
            model,
        }
    }

    /// Predict every file directly under `audio_dir`.
    pub fn predict_dir(
        &self,
        audio_dir: &Path,
        file_to_class: &HashMap<String, String>,
        classes: &[String],
    ) -> Result<Predictions> {
        let source = DirSource::new(audio_dir, self.artifact.config.features.sample_rate);
        let names = source.file_names()?;
        info!("Extracting features from {} files in {}", names.len(), audio_dir.display());
        self.predict_files(&source, &names, file_to_class, classes)
    }

    pub fn predict_files<S: AudioSource>(
        &self,
        source: &S,
        names: &[String],
        file_to_class: &HashMap<String, String>,
        classes: &[String],
    ) -> Result<Predictions> {
        let mut out = Predictions::default();

        for name in names {
            let label = file_to_class
                .get(name)
                .ok_or_else(|| Error::UnknownFile(name.clone()))?;
            let truth = classes
                .iter()
                .position(|c| c == label)
                .ok_or_else(|| Error::UnknownClass(label.clone()))?;

            let wav = source.load(name)?;
            let probabilities = self.predict_clip(name, &wav)?;

            for p in &probabilities {
                out.true_labels.push(truth);
                out.predicted_labels.push(argmax(p.iter().copied()));
            }
            let mean = mean_probabilities(&probabilities)?;
            debug!("{name}: {} windows, mean {:?}", probabilities.len(), mean);
            out.file_probabilities.insert(name.clone(), mean);
        }

        Ok(out)
    }

    /// Probability vector for every full window of `wav`.
    pub fn predict_clip(&self, name: &str, wav: &[f32]) -> Result<Vec<Vec<f32>>> {
        let config = &self.artifact.config;
        let window = config.window_length;
        if wav.len() < window {
            return Err(Error::ClipTooShort {
                name: name.to_string(),
                len: wav.len(),
                window,
            });
        }

        wav.chunks_exact(window)
            .map(|sample| {
                let mut x = self.extractor.extract(sample)?;
                self.artifact.normalization.apply(&mut x);
                let x = shape_window(x, config.mode);
                self.model.predict(x.view())
            })
            .collect()
    }
}

/// Element-wise mean of equally sized probability vectors.
pub fn mean_probabilities(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let width = vectors.first().map_or(0, Vec::len);
    let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
    let stacked = ndarray::Array2::from_shape_vec((vectors.len(), width), flat)?;
    let mean: Array1<f32> = stacked
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::Model("no probability vectors to average".into()))?;
    Ok(mean.to_vec())
}
