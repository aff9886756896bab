//! Feature-windowed dataset construction and inference for instrument
//! classification.
//!
//! Training draws random fixed-length windows from labeled clips, turns them into
//! normalized MFCC tensors and caches the result per [`Mode`]. Inference reloads
//! that [`CacheArtifact`] so every window is normalized with the training-time
//! bounds, then averages window predictions per file.

pub mod audio;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod labels;
pub mod model;

pub use cache::CacheArtifact;
pub use config::{Config, FeatureParams, Mode};
pub use dataset::{DatasetBuilder, FeatureDataset, Normalization};
pub use error::{Error, Result};
pub use inference::{Classifier, Predictions, Predictor};
pub use labels::{ClassDistribution, LabelRow, LabelTable};
