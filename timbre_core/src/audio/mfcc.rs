use mel_spec::prelude::*;
use ndarray::Array2;

use crate::config::FeatureParams;
use crate::error::{Error, Result};

/// Spectral transform from one window of samples to a `(steps, coeffs)` matrix.
pub trait FeatureExtractor {
    fn extract(&self, window: &[f32]) -> Result<Array2<f32>>;
}

/// Mel-frequency cepstral coefficients: mel filterbank energies from `mel_spec`
/// followed by an orthonormal DCT-II.
#[derive(Debug, Clone)]
pub struct Mfcc {
    params: FeatureParams,
    hop_size: usize,
    dct: Array2<f64>,
}

impl Mfcc {
    pub fn new(params: FeatureParams) -> Self {
        Self {
            params,
            hop_size: params.hop_length(),
            dct: dct_matrix(params.cepstral_count, params.filter_count),
        }
    }

    fn mel_frames(&self, pcm: &[f32]) -> Vec<Vec<f64>> {
        let fft_size = self.params.fft_size;
        let hop_size = self.hop_size;

        let mut stft = Spectrogram::new(fft_size, hop_size);
        let mut mel = MelSpectrogram::new(
            fft_size,
            self.params.sample_rate as f64,
            self.params.filter_count,
        );

        let mut frames = Vec::new();
        for chunk in pcm.chunks(hop_size) {
            // pad last hop
            let mut hop = vec![0.0f32; hop_size];
            hop[..chunk.len()].copy_from_slice(chunk);

            if let Some(fft_frame) = stft.add(&hop) {
                let mel_frame = mel.add(&fft_frame);
                frames.push(mel_frame.iter().copied().collect());
            }
        }
        frames
    }
}

impl FeatureExtractor for Mfcc {
    fn extract(&self, window: &[f32]) -> Result<Array2<f32>> {
        let frames = self.mel_frames(window);
        if frames.is_empty() {
            return Err(Error::Feature(format!(
                "{} samples produced no spectral frames (fft size {})",
                window.len(),
                self.params.fft_size
            )));
        }

        let n_mels = self.params.filter_count;
        let mut out = Array2::<f32>::zeros((frames.len(), self.params.cepstral_count));
        for (t, frame) in frames.iter().enumerate() {
            if frame.len() != n_mels {
                return Err(Error::Feature(format!(
                    "expected {n_mels} mel bands, got {}",
                    frame.len()
                )));
            }
            for (k, row) in self.dct.outer_iter().enumerate() {
                let c: f64 = row.iter().zip(frame).map(|(w, x)| w * x).sum();
                out[[t, k]] = c as f32;
            }
        }
        Ok(out)
    }
}

/// Orthonormal DCT-II basis, `(n_out, n_in)`.
fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f64> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        scale * (std::f64::consts::PI / n * (i as f64 + 0.5) * k as f64).cos()
    })
}
