//! Sample rate conversion using rubato
//!
//! [`StreamResampler`] is a streaming converter carrying filter state
//! between blocks, used by the per-stream pipeline. [`resample_buffer`]
//! is a one-shot conversion for short clips such as sound effects.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use tracing::debug;

use crate::error::{Error, Result};

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Streaming resampler with a fixed input block size.
///
/// Each call to [`process`](StreamResampler::process) consumes exactly
/// `chunk_frames` interleaved frames and yields however many output frames
/// the ratio produces, carrying filter history across calls.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    chunk_frames: usize,
    ratio: f64,
    src_rate: u32,
    dst_rate: u32,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let ratio = dst_rate as f64 / src_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), chunk_frames, channels)
            .map_err(|e| Error::Resample(format!("failed to create resampler: {}", e)))?;

        debug!(
            "Resampler {}Hz -> {}Hz, {} channels, {} frame chunks",
            src_rate, dst_rate, channels, chunk_frames
        );

        Ok(Self {
            inner,
            channels,
            chunk_frames,
            ratio,
            src_rate,
            dst_rate,
        })
    }

    /// Conversion ratio, output rate over input rate.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Drop accumulated filter history, as after a buffer flush.
    pub fn reset(&mut self) -> Result<()> {
        // Rebuilding is equivalent to clearing the filter state.
        self.inner = SincFixedIn::<f32>::new(
            self.ratio,
            1.0,
            sinc_params(),
            self.chunk_frames,
            self.channels,
        )
        .map_err(|e| Error::Resample(format!("failed to reset resampler: {}", e)))?;
        Ok(())
    }

    /// Convert one input block of exactly `chunk_frames` interleaved
    /// frames. Returns interleaved output.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if interleaved.len() != self.chunk_frames * self.channels {
            return Err(Error::Resample(format!(
                "expected {} samples ({} frames), got {}",
                self.chunk_frames * self.channels,
                self.chunk_frames,
                interleaved.len()
            )));
        }

        let planar = deinterleave(interleaved, self.channels);
        let out = self
            .inner
            .process(&planar, None)
            .map_err(|e| Error::Resample(format!("{}Hz -> {}Hz: {}", self.src_rate, self.dst_rate, e)))?;
        Ok(interleave(out))
    }
}

/// One-shot conversion of a complete clip.
///
/// Returns a copy when the rates already match.
pub fn resample_buffer(
    input: &[f32],
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Vec<f32>> {
    if src_rate == dst_rate {
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let frames = input.len() / channels;
    let ratio = dst_rate as f64 / src_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), frames, channels)
        .map_err(|e| Error::Resample(format!("failed to create resampler: {}", e)))?;
    let delay = resampler.output_delay();

    let planar = deinterleave(input, channels);
    let mut out = resampler
        .process(&planar, None)
        .map_err(|e| Error::Resample(format!("{}Hz -> {}Hz: {}", src_rate, dst_rate, e)))?;

    // Push silence through until the filter has emitted the whole clip,
    // then drop the leading delay and trim to the expected length.
    let silence = vec![vec![0.0f32; frames]; channels];
    while out[0].len() < delay + expected {
        let more = resampler
            .process(&silence, None)
            .map_err(|e| Error::Resample(format!("{}Hz -> {}Hz: {}", src_rate, dst_rate, e)))?;
        if more[0].is_empty() {
            break;
        }
        for (ch, extra) in out.iter_mut().zip(more) {
            ch.extend(extra);
        }
    }
    for ch in out.iter_mut() {
        let cut = delay.min(ch.len());
        ch.drain(..cut);
        ch.truncate(expected);
    }

    debug!(
        "Resampled clip: {} frames at {}Hz -> {} frames at {}Hz",
        frames,
        src_rate,
        out.first().map(|c| c.len()).unwrap_or(0),
        dst_rate
    );

    Ok(interleave(out))
}

/// Convert interleaved samples to planar format.
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            planar[ch].push(sample);
        }
    }
    planar
}

/// Convert planar samples to interleaved format.
fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let channels = planar.len();
    let frames = planar[0].len();
    let mut interleaved = Vec::with_capacity(frames * channels);
    for frame in 0..frames {
        for ch in planar.iter() {
            interleaved.push(ch[frame]);
        }
    }
    interleaved
}
