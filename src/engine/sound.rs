//! Sound effects
//!
//! A [`Sound`] is a short clip held fully decoded in memory. On every sink
//! reopen the engine re-prepares each registered sound for the active mix
//! format, so playback is a straight add into the accumulator. The
//! prepared samples live behind an `Arc`: an in-flight playback keeps its
//! snapshot alive even if the sound is re-prepared or freed mid-play.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::audio::remap::ChannelRemap;
use crate::audio::resampler::resample_buffer;
use crate::audio::types::ChannelLayout;
use crate::engine::MixFormat;
use crate::error::{Error, Result};

/// A decoded sound effect clip.
pub struct Sound {
    id: Uuid,
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    channels: usize,
    volume_bits: AtomicU32,
    playable: Mutex<Arc<Vec<f32>>>,
}

impl Sound {
    /// Load a WAV file into memory.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| Error::Sound(format!("cannot open {}: {}", path.display(), e)))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Sound(format!("decode failed: {}", e)))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::Sound(format!("decode failed: {}", e)))?
            }
        };

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sound".to_string());

        debug!(
            "Loaded sound '{}': {} samples, {}Hz, {} channels",
            name,
            samples.len(),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self::from_samples(
            name,
            samples,
            spec.sample_rate,
            spec.channels as usize,
        ))
    }

    /// Build a sound from raw interleaved samples.
    pub fn from_samples(name: String, samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            samples,
            sample_rate,
            channels: channels.max(1),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            playable: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Source clip length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        let frames = self.samples.len() / self.channels;
        frames as f64 / self.sample_rate.max(1) as f64
    }

    /// Re-render the clip for a mix format. Playbacks started before this
    /// call keep their previous rendering.
    pub(crate) fn prepare(&self, mix: &MixFormat) -> Result<()> {
        let resampled =
            resample_buffer(&self.samples, self.sample_rate, mix.sample_rate, self.channels)?;

        let src_layout = ChannelLayout::default_for_count(self.channels);
        let remap = ChannelRemap::new(&src_layout, &mix.layout, true);
        let frames = resampled.len() / self.channels;

        let rendered = if remap.is_identity() {
            resampled
        } else {
            let mut out = vec![0.0f32; frames * mix.layout.count()];
            remap.remap(&resampled, &mut out, frames);
            out
        };

        *self.playable.lock().unwrap() = Arc::new(rendered);
        Ok(())
    }

    pub(crate) fn playable(&self) -> Arc<Vec<f32>> {
        Arc::clone(&self.playable.lock().unwrap())
    }
}

/// One in-flight playback of a sound.
pub(crate) struct PlayingSound {
    sound: Arc<Sound>,
    data: Arc<Vec<f32>>,
    pos: usize,
}

impl PlayingSound {
    pub(crate) fn new(sound: Arc<Sound>) -> Self {
        let data = sound.playable();
        Self {
            sound,
            data,
            pos: 0,
        }
    }

    pub(crate) fn sound_id(&self) -> Uuid {
        self.sound.id()
    }

    /// Add the next slice of the clip into the accumulator. Returns false
    /// once the clip is exhausted.
    pub(crate) fn mix_into(&mut self, accum: &mut [f32]) -> bool {
        let volume = self.sound.volume();
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(accum.len());
        for (acc, &s) in accum[..n].iter_mut().zip(self.data[self.pos..self.pos + n].iter()) {
            *acc += s * volume;
        }
        self.pos += n;
        self.pos < self.data.len()
    }
}
