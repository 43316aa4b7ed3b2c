//! Audio primitives: formats, conversion, buffering, remapping, resampling

pub mod buffer;
pub mod convert;
pub mod remap;
pub mod resampler;
pub mod types;

pub use buffer::{AudioBuffer, ScratchBuffer};
pub use convert::{from_float, soft_clamp, to_float, FromFloatFn, ToFloatFn};
pub use remap::ChannelRemap;
pub use resampler::{resample_buffer, StreamResampler};
pub use types::{AudioFormat, Channel, ChannelLayout, SampleFormat, StandardLayout};
