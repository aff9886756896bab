pub mod decoder;
pub mod mfcc;
pub mod source;

pub use mfcc::{FeatureExtractor, Mfcc};
pub use source::{duration_secs, AudioSource, DirSource};
