//! Mixing engine: streams, sinks, sounds, and the output cycle

pub mod core;
pub mod sink;
pub mod sound;
pub mod stream;

pub use self::core::Engine;
pub use sink::{CpalSinkFactory, DeviceInfo, Sink, SinkFactory};
pub use sound::Sound;
pub use stream::{AudioStream, BlockData, Pull, StreamFlags};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::audio::types::ChannelLayout;

/// The format every stream delivers into the mix: canonical f32 frames at
/// the negotiated sink rate and layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MixFormat {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub frames: usize,
}

impl MixFormat {
    pub fn block_samples(&self) -> usize {
        self.frames * self.layout.count()
    }
}

/// State shared between the engine core and its streams: the current mix
/// format and the latest output delay estimate.
pub(crate) struct OutputShared {
    mix: Mutex<MixFormat>,
    delay_bits: AtomicU64,
}

impl OutputShared {
    pub(crate) fn new(mix: MixFormat) -> Self {
        Self {
            mix: Mutex::new(mix),
            delay_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub(crate) fn mix_format(&self) -> MixFormat {
        self.mix.lock().unwrap().clone()
    }

    pub(crate) fn set_mix_format(&self, mix: MixFormat) {
        *self.mix.lock().unwrap() = mix;
    }

    /// Engine-side output delay in seconds.
    pub(crate) fn delay_seconds(&self) -> f64 {
        f64::from_bits(self.delay_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_delay_seconds(&self, delay: f64) {
        self.delay_bits.store(delay.to_bits(), Ordering::Relaxed);
    }
}
