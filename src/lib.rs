//! softmix: a software audio mixing and output engine
//!
//! Decoders each open an [`AudioStream`] in their native format and push
//! bytes into it; the engine converts, resamples, and remaps every stream
//! to one canonical f32 mix format, sums them with per-stream gain and
//! fades, overlays short [`Sound`] effects, and drives a single output
//! sink in fixed-size blocks. Raw bitstream streams (AC3, DTS, and their
//! HD variants) bypass the mix and are forwarded verbatim to a
//! passthrough-capable sink.
//!
//! ```no_run
//! use softmix::{CpalSinkFactory, Engine, EngineConfig, StreamFlags};
//! use softmix::audio::types::{AudioFormat, ChannelLayout, SampleFormat};
//!
//! let engine = Engine::new(EngineConfig::default(), Box::new(CpalSinkFactory::new()));
//! engine.start();
//!
//! let format = AudioFormat::new(SampleFormat::s16ne(), 44100, ChannelLayout::stereo(), 1024);
//! let stream = engine.open_stream(format, StreamFlags::default())?;
//! // push decoded bytes with stream.write(..), then stream.drain()
//! # Ok::<(), softmix::Error>(())
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;

pub use config::{EngineConfig, Quality};
pub use engine::{
    AudioStream, CpalSinkFactory, DeviceInfo, Engine, MixFormat, Sink, SinkFactory, Sound,
    StreamFlags,
};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
