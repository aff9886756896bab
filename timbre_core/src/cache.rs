use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dataset::{FeatureDataset, Normalization};
use crate::error::{Error, Result};

const CACHE_MAGIC: &[u8; 4] = b"TMBR";

/// Cache file format version - increment when the artifact layout changes
pub const CACHE_VERSION: u32 = 1;

/// Everything a dataset build produces: the configuration it ran with, the
/// normalization bounds, the class list and the dataset itself. Training writes
/// it once per mode; inference reads it back to normalize exactly the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheArtifact {
    pub config: Config,
    pub normalization: Normalization,
    pub classes: Vec<String>,
    pub dataset: FeatureDataset,
}

impl CacheArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        let cache_err = |reason: String| Error::Cache {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write next to the target and rename so readers never see a partial file.
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(CACHE_MAGIC)?;
            writer.write_all(&CACHE_VERSION.to_le_bytes())?;
            bincode::serialize_into(&mut writer, self).map_err(|e| cache_err(e.to_string()))?;
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)?;

        info!(
            "Cached {} samples for {} mode at {}",
            self.dataset.len(),
            self.config.mode,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let cache_err = |reason: String| Error::Cache {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| cache_err(format!("failed to read header: {e}")))?;
        if &magic != CACHE_MAGIC {
            return Err(cache_err("not a timbre cache file".into()));
        }

        let mut version_buf = [0u8; 4];
        reader
            .read_exact(&mut version_buf)
            .map_err(|e| cache_err(format!("failed to read version: {e}")))?;
        let version = u32::from_le_bytes(version_buf);
        if version != CACHE_VERSION {
            return Err(cache_err(format!(
                "version mismatch: expected {CACHE_VERSION}, got {version}"
            )));
        }

        let artifact: CacheArtifact =
            bincode::deserialize_from(reader).map_err(|e| cache_err(e.to_string()))?;
        artifact.dataset.check()?;
        Ok(artifact)
    }

    /// Load the artifact at `config.cache_path` if there is one.
    pub fn load_for(config: &Config) -> Result<Option<Self>> {
        if !config.cache_path.is_file() {
            return Ok(None);
        }
        let artifact = Self::load(&config.cache_path)?;
        if artifact.config.mode != config.mode {
            return Err(Error::Config(format!(
                "cache {} holds a {} dataset, expected {}",
                config.cache_path.display(),
                artifact.config.mode,
                config.mode
            )));
        }
        if artifact.config.features != config.features {
            warn!(
                "Cached features were built with {:?}, current run asks for {:?}; using the cache",
                artifact.config.features, config.features
            );
        }
        Ok(Some(artifact))
    }
}
