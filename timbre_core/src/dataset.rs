use log::{debug, info};
use ndarray::{Array2, ArrayD, Axis, Dimension};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::audio::{AudioSource, FeatureExtractor};
use crate::cache::CacheArtifact;
use crate::config::{Config, Mode};
use crate::error::{Error, Result};
use crate::labels::{ClassDistribution, LabelTable};

/// Global feature bounds seen while building, reused verbatim at inference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub min: f32,
    pub max: f32,
}

impl Normalization {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && max > min) {
            return Err(Error::DegenerateRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Rescale in place to `[0, 1]` relative to the stored bounds.
    pub fn apply<D: Dimension>(&self, x: &mut ndarray::Array<f32, D>) {
        let range = self.max - self.min;
        x.mapv_inplace(|v| (v - self.min) / range);
    }
}

/// Features and one-hot labels, parallel along axis 0.
///
/// `features` is `(n, steps, coeffs, 1)` in conv mode and `(n, steps, coeffs)` in
/// time mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDataset {
    pub features: ArrayD<f32>,
    pub labels: Array2<f32>,
}

impl FeatureDataset {
    pub fn len(&self) -> usize {
        self.labels.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.nrows() == 0
    }

    /// Shape of one sample, without the leading sample axis.
    pub fn sample_shape(&self) -> &[usize] {
        &self.features.shape()[1..]
    }

    pub fn class_count(&self) -> usize {
        self.labels.ncols()
    }

    /// Arg-max of every one-hot row.
    pub fn class_indices(&self) -> Vec<usize> {
        self.labels.outer_iter().map(|row| argmax(row.iter().copied())).collect()
    }

    pub(crate) fn check(&self) -> Result<()> {
        let n = self.features.shape().first().copied().unwrap_or(0);
        if n != self.labels.nrows() {
            return Err(Error::Config(format!(
                "dataset has {n} feature samples but {} labels",
                self.labels.nrows()
            )));
        }
        Ok(())
    }
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: impl IntoIterator<Item = f32>) -> usize {
    values
        .into_iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// One row per index with a single 1.0 in column `index`.
pub fn one_hot(indices: &[usize], width: usize) -> Result<Array2<f32>> {
    let mut out = Array2::zeros((indices.len(), width));
    for (row, &index) in indices.iter().enumerate() {
        if index >= width {
            return Err(Error::Config(format!(
                "class index {index} does not fit {width} classes"
            )));
        }
        out[[row, index]] = 1.0;
    }
    Ok(out)
}

/// Stack per-sample matrices along a new leading axis and apply the mode layout.
pub fn stack_features(matrices: &[Array2<f32>], mode: Mode) -> Result<ArrayD<f32>> {
    let views: Vec<_> = matrices.iter().map(|m| m.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)?;
    Ok(match mode {
        Mode::Conv => stacked.insert_axis(Axis(3)).into_dyn(),
        Mode::Time => stacked.into_dyn(),
    })
}

/// Lay out a single window as a batch of one, the way training data is laid out.
pub fn shape_window(matrix: Array2<f32>, mode: Mode) -> ArrayD<f32> {
    let batch = matrix.insert_axis(Axis(0));
    match mode {
        Mode::Conv => batch.insert_axis(Axis(3)).into_dyn(),
        Mode::Time => batch.into_dyn(),
    }
}

/// Draws random windows from labeled clips and turns them into a cached dataset.
pub struct DatasetBuilder<'a, S, F> {
    config: &'a Config,
    source: &'a S,
    extractor: &'a F,
}

impl<'a, S: AudioSource, F: FeatureExtractor> DatasetBuilder<'a, S, F> {
    pub fn new(config: &'a Config, source: &'a S, extractor: &'a F) -> Self {
        Self {
            config,
            source,
            extractor,
        }
    }

    /// Return the cached artifact for this mode if one exists, otherwise draw
    /// `sample_count` windows, normalize, persist and return the result.
    ///
    /// A cache hit ignores every other argument. Delete the cache file to rebuild.
    pub fn build<R: Rng>(
        &self,
        rng: &mut R,
        sample_count: usize,
        distribution: &ClassDistribution,
        probabilities: &[f64],
        table: &LabelTable,
        classes: &[String],
    ) -> Result<CacheArtifact> {
        if let Some(artifact) = CacheArtifact::load_for(self.config)? {
            info!(
                "Loading existing data for {} model ({} samples)",
                self.config.mode,
                artifact.dataset.len()
            );
            return Ok(artifact);
        }

        self.config.validate()?;
        if sample_count == 0 {
            return Err(Error::Config("sample count must be positive".into()));
        }
        let candidates: Vec<&str> = distribution.classes().collect();
        if candidates.len() != probabilities.len() {
            return Err(Error::Config(format!(
                "{} classes but {} sampling probabilities",
                candidates.len(),
                probabilities.len()
            )));
        }
        let weights = WeightedIndex::new(probabilities)
            .map_err(|e| Error::Config(format!("invalid sampling probabilities: {e}")))?;

        let files: Vec<(usize, Vec<&str>)> = candidates
            .iter()
            .map(|&class| -> Result<(usize, Vec<&str>)> {
                let index = classes
                    .iter()
                    .position(|c| c == class)
                    .ok_or_else(|| Error::UnknownClass(class.to_string()))?;
                let files = table.files_of(class);
                if files.is_empty() {
                    return Err(Error::Config(format!("class {class} has no files")));
                }
                Ok((index, files))
            })
            .collect::<Result<_>>()?;

        info!(
            "Building {sample_count} {} samples from {} classes",
            self.config.mode,
            candidates.len()
        );

        let window = self.config.window_length;
        let mut matrices = Vec::with_capacity(sample_count);
        let mut indices = Vec::with_capacity(sample_count);
        let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);

        for n in 0..sample_count {
            let (class_index, class_files) = &files[weights.sample(rng)];
            let name = *class_files
                .choose(rng)
                .ok_or_else(|| Error::Config("class without files".into()))?;

            let wav = self.source.load(name)?;
            let start = random_start(rng, wav.len(), window, name)?;
            let matrix = self.extractor.extract(&wav[start..start + window])?;

            for &v in matrix.iter() {
                min = min.min(v);
                max = max.max(v);
            }
            matrices.push(matrix);
            indices.push(*class_index);

            if (n + 1) % 1000 == 0 {
                debug!("{} / {sample_count} samples drawn", n + 1);
            }
        }

        let normalization = Normalization::new(min, max)?;
        let mut features = stack_features(&matrices, self.config.mode)?;
        normalization.apply(&mut features);
        let labels = one_hot(&indices, classes.len())?;

        let artifact = CacheArtifact {
            config: self.config.clone(),
            normalization,
            classes: classes.to_vec(),
            dataset: FeatureDataset { features, labels },
        };
        artifact.save(&self.config.cache_path)?;
        Ok(artifact)
    }
}

/// Uniform start offset in `[0, len - window)`; a clip exactly one window long
/// starts at 0.
fn random_start<R: Rng>(rng: &mut R, len: usize, window: usize, name: &str) -> Result<usize> {
    match len.checked_sub(window) {
        Some(0) => Ok(0),
        Some(slack) => Ok(rng.gen_range(0..slack)),
        None => Err(Error::ClipTooShort {
            name: name.to_string(),
            len,
            window,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn one_hot_width_follows_class_count() {
        let labels = one_hot(&[0, 2, 1], 3).unwrap();
        assert_eq!(labels, array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        assert!(one_hot(&[3], 3).is_err());
    }

    #[test]
    fn conv_layout_adds_trailing_channel() {
        let m = vec![Array2::<f32>::zeros((9, 13)); 4];
        let conv = stack_features(&m, Mode::Conv).unwrap();
        let time = stack_features(&m, Mode::Time).unwrap();
        assert_eq!(conv.shape(), &[4, 9, 13, 1]);
        assert_eq!(time.shape(), &[4, 9, 13]);
        assert_eq!(conv.ndim(), time.ndim() + 1);

        assert_eq!(shape_window(Array2::zeros((9, 13)), Mode::Conv).shape(), &[1, 9, 13, 1]);
        assert_eq!(shape_window(Array2::zeros((9, 13)), Mode::Time).shape(), &[1, 9, 13]);
    }

    #[test]
    fn mismatched_matrices_do_not_stack() {
        let m = vec![Array2::<f32>::zeros((9, 13)), Array2::zeros((8, 13))];
        assert!(matches!(stack_features(&m, Mode::Time), Err(Error::Shape(_))));
    }

    #[test]
    fn normalization_maps_bounds_to_unit_interval() {
        let norm = Normalization::new(-2.0, 6.0).unwrap();
        let mut x = array![-2.0f32, 0.0, 6.0];
        norm.apply(&mut x);
        assert_eq!(x, array![0.0, 0.25, 1.0]);
    }

    #[test]
    fn degenerate_range_is_rejected() {
        assert!(matches!(
            Normalization::new(1.5, 1.5),
            Err(Error::DegenerateRange { .. })
        ));
        assert!(Normalization::new(f32::INFINITY, f32::NEG_INFINITY).is_err());
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(argmax([0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax([0.5, 0.5]), 0);
    }

    #[test]
    fn start_offsets_stay_inside_the_clip() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let start = random_start(&mut rng, 2000, 1600, "x").unwrap();
            assert!(start < 400);
        }
        assert_eq!(random_start(&mut rng, 1600, 1600, "x").unwrap(), 0);
        assert!(matches!(
            random_start(&mut rng, 1599, 1600, "x"),
            Err(Error::ClipTooShort { len: 1599, .. })
        ));
    }
}
