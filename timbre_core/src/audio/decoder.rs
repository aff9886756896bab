use anyhow::{anyhow, Context, Result};
use std::path::Path;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use audioadapter_buffers::direct::InterleavedSlice;
use log::warn;
use rubato::{Fft, FixedSync, Resampler};

/// Decode an audio file to mono f32 samples at `target_rate` Hz.
pub fn decode_to_f32_mono<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let (interleaved, sr_in, ch_in) = decode_interleaved(path)?;
    let mono = downmix(interleaved, ch_in);
    resample(mono, sr_in, target_rate)
}

/// Returns interleaved samples, source sample rate and channel count.
fn decode_interleaved(path: &Path) -> Result<(Vec<f32>, u32, usize)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("unsupported format or failed to probe container")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no supported audio tracks found"))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("failed to create decoder for selected track")?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow!("decoder reset required (chained streams)"));
            }
            Err(e) => return Err(e).context("error reading next packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) if is_corrupt_packet(&e) => {
                warn!(
                    "{}: dropping packet at ts {}: {e}",
                    path.display(),
                    packet.ts()
                );
                continue;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow!("decoder reset required mid-stream"));
            }
            Err(e) => return Err(e).context("unrecoverable decode error"),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count());

        let mut sbuf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sbuf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sbuf.samples());
    }

    let sample_rate = sample_rate.ok_or_else(|| anyhow!("could not determine input sample rate"))?;
    let channels = channels.ok_or_else(|| anyhow!("could not determine channel count"))?;

    if interleaved.is_empty() {
        return Err(anyhow!("decoded audio was empty"));
    }

    Ok((interleaved, sample_rate, channels))
}

/// Errors confined to one packet; the stream itself is still readable.
fn is_corrupt_packet(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::DecodeError(_) | SymphoniaError::IoError(_))
}

/// Average interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(mono: Vec<f32>, sr_in: u32, sr_out: u32) -> Result<Vec<f32>> {
    if sr_in == sr_out {
        return Ok(mono);
    }

    // Offline whole-clip conversion; fixed input chunking, output varies.
    let chunk_size: usize = 1024;
    let sub_chunks: usize = 1;

    let mut resampler = Fft::<f32>::new(
        sr_in as usize,
        sr_out as usize,
        chunk_size,
        sub_chunks,
        1,
        FixedSync::Input,
    )
    .context("failed to construct FFT resampler")?;

    let input_len_frames = mono.len();
    let out_len_frames = resampler.process_all_needed_output_len(input_len_frames);
    let mut out = vec![0.0f32; out_len_frames];

    let input_adapter =
        InterleavedSlice::new(&mono, 1, input_len_frames).context("bad input adapter")?;
    let mut output_adapter =
        InterleavedSlice::new_mut(&mut out, 1, out_len_frames).context("bad output adapter")?;

    let (_frames_read, frames_written) = resampler.process_all_into_buffer(
        &input_adapter,
        &mut output_adapter,
        input_len_frames,
        None,
    )?;

    out.truncate(frames_written);
    Ok(out)
}
