use std::path::PathBuf;

/// Failures surfaced by the core pipeline.
///
/// `Config` and `Cache` errors are fatal before any work starts. Everything raised
/// while sampling or predicting aborts the whole run; there is no skip or retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("clip {name} has {len} samples, window needs {window}")]
    ClipTooShort {
        name: String,
        len: usize,
        window: usize,
    },

    #[error("file {0} is not in the label table")]
    UnknownFile(String),

    #[error("class {0} is not in the class list")]
    UnknownClass(String),

    #[error("degenerate feature range: min={min}, max={max}")]
    DegenerateRange { min: f32, max: f32 },

    #[error("cache {path}: {reason}")]
    Cache { path: PathBuf, reason: String },

    #[error("feature extraction failed: {0}")]
    Feature(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
