use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tensor layout and network family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single-channel 2-D image per window, `(steps, coeffs, 1)`.
    Conv,
    /// Sequence per window, `(steps, coeffs)`.
    Time,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Conv => "conv",
            Mode::Time => "time",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conv" => Ok(Mode::Conv),
            "time" => Ok(Mode::Time),
            other => Err(Error::Config(format!(
                "unknown mode '{other}', expected 'conv' or 'time'"
            ))),
        }
    }
}

/// Parameters handed to the spectral transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureParams {
    /// Number of mel filters.
    pub filter_count: usize,
    /// Number of cepstral coefficients kept per frame.
    pub cepstral_count: usize,
    pub fft_size: usize,
    pub sample_rate: u32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            filter_count: 26,
            cepstral_count: 13,
            fft_size: 512,
            sample_rate: 16_000,
        }
    }
}

impl FeatureParams {
    /// One tenth of a second of audio.
    pub fn window_length(&self) -> usize {
        (self.sample_rate / 10) as usize
    }

    /// 10 ms between spectral frames.
    pub fn hop_length(&self) -> usize {
        ((self.sample_rate / 100) as usize).max(1)
    }
}

/// Run configuration for one mode. Built fresh per run and never mutated;
/// everything the build step learns travels in the cache artifact instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    pub features: FeatureParams,
    pub window_length: usize,
    pub model_path: PathBuf,
    pub cache_path: PathBuf,
}

impl Config {
    pub fn new(mode: Mode) -> Self {
        Self::with_params(mode, FeatureParams::default(), ".")
    }

    pub fn with_params(mode: Mode, features: FeatureParams, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            mode,
            features,
            window_length: features.window_length(),
            model_path: root.join("models").join(format!("{mode}.model")),
            cache_path: root.join("cache").join(format!("{mode}.cache")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.features;
        if f.filter_count == 0 || f.cepstral_count == 0 || f.fft_size == 0 {
            return Err(Error::Config(format!("feature parameters must be non-zero: {f:?}")));
        }
        if f.cepstral_count > f.filter_count {
            return Err(Error::Config(format!(
                "cepstral_count ({}) exceeds filter_count ({})",
                f.cepstral_count, f.filter_count
            )));
        }
        if self.window_length == 0 {
            return Err(Error::Config(format!(
                "sample rate {} gives an empty window",
                f.sample_rate
            )));
        }
        Ok(())
    }

    /// Create the directories the model and cache files live in.
    pub fn ensure_dirs(&self) -> Result<()> {
        for path in [&self.model_path, &self.cache_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_window_and_paths_from_mode() {
        let config = Config::with_params(Mode::Time, FeatureParams::default(), "/work");
        assert_eq!(config.window_length, 1600);
        assert_eq!(config.model_path, PathBuf::from("/work/models/time.model"));
        assert_eq!(config.cache_path, PathBuf::from("/work/cache/time.cache"));
    }

    #[test]
    fn mode_parsing_is_closed() {
        assert_eq!("conv".parse::<Mode>().unwrap(), Mode::Conv);
        assert_eq!(" TIME ".parse::<Mode>().unwrap(), Mode::Time);
        assert!(matches!("lstm".parse::<Mode>(), Err(Error::Config(_))));
        assert!("../../etc".parse::<Mode>().is_err());
    }

    #[test]
    fn rejects_more_cepstra_than_filters() {
        let params = FeatureParams {
            cepstral_count: 40,
            ..FeatureParams::default()
        };
        let config = Config::with_params(Mode::Conv, params, ".");
        assert!(config.validate().is_err());
        assert!(Config::new(Mode::Conv).validate().is_ok());
    }
}
