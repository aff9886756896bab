use std::path::PathBuf;

use crate::audio::decoder::decode_to_f32_mono;
use crate::error::{Error, Result};

/// Anything that can hand back mono samples for a file name.
pub trait AudioSource {
    fn load(&self, name: &str) -> Result<Vec<f32>>;
}

/// Decodes `root/<name>` from disk at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
    sample_rate: u32,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            root: root.into(),
            sample_rate,
        }
    }

    /// File names directly under the root, sorted.
    pub fn file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl AudioSource for DirSource {
    fn load(&self, name: &str) -> Result<Vec<f32>> {
        let path = self.root.join(name);
        decode_to_f32_mono(&path, self.sample_rate).map_err(|source| Error::Decode { path, source })
    }
}

pub fn duration_secs(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.wav"), b"not audio").unwrap();

        let source = DirSource::new(dir.path(), 16_000);
        match source.load("broken.wav") {
            Err(Error::Decode { path, .. }) => assert!(path.ends_with("broken.wav")),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.wav", "c.wav"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let names = DirSource::new(dir.path(), 16_000).file_names().unwrap();
        assert_eq!(names, vec!["a.wav", "b.wav", "c.wav"]);
    }

    #[test]
    fn duration_in_seconds() {
        assert_eq!(duration_secs(32_000, 16_000), 2.0);
    }
}
