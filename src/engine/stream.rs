//! Per-stream input pipeline
//!
//! Each [`AudioStream`] accepts producer writes in its registered source
//! format and turns them into mix-ready blocks: decode to canonical f32,
//! resample to the mix rate, remap to the mix layout, then queue fixed-size
//! packets for the output cycle to pull.
//!
//! Flow control is a frame budget: writes are rejected once the queue holds
//! a water level's worth of frames, and after an underrun the stream
//! reports itself refilling until the budget is rebuilt, so playback
//! resumes with real margin instead of stuttering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio::buffer::ScratchBuffer;
use crate::audio::convert::{to_float, ToFloatFn};
use crate::audio::remap::ChannelRemap;
use crate::audio::resampler::StreamResampler;
use crate::audio::types::AudioFormat;
use crate::engine::{MixFormat, OutputShared};

/// Frames of queued audio a stream builds up before and after underruns,
/// as a multiple of the block size.
const WATER_LEVEL_BLOCKS: usize = 8;

/// Samples per visualization callback invocation.
const VIZ_SAMPLES: usize = 512;

/// Creation options for a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamFlags {
    /// Run the resampler even when source and mix rates match
    pub force_resample: bool,

    /// Create the stream paused; it joins the mix on resume
    pub start_paused: bool,
}

/// One mix-ready packet pulled from a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockData {
    /// Canonical interleaved f32 in the mix layout
    Pcm(Vec<f32>),
    /// Verbatim bitstream bytes for passthrough
    Raw(Vec<u8>),
}

/// Result of asking a stream for its next block.
#[derive(Debug)]
pub enum Pull {
    /// A block, with volume, replay gain, and any fade already applied
    Block(BlockData),
    /// Nothing this cycle, but more is expected; mix silence and retry
    Refilling,
    /// The stream has no data and no prospect of more
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    target: f32,
    step: f32,
}

struct Inner {
    format: AudioFormat,
    mix: MixFormat,
    raw: bool,
    valid: bool,
    draining: bool,
    paused: bool,
    force_resample: bool,

    volume: f32,
    replay_gain: f32,
    fade: Option<Fade>,

    convert: Option<ToFloatFn>,
    resampler: Option<StreamResampler>,
    remap: Option<ChannelRemap>,

    viz_remap: Option<ChannelRemap>,
    viz_tap: Option<Box<dyn FnMut(&[f32]) + Send>>,
    viz_buf: Vec<f32>,

    input: ScratchBuffer,
    src_block_frames: usize,
    raw_frame_bytes: usize,
    conv_buf: Vec<f32>,
    pending: Vec<f32>,
    pending_raw: Vec<u8>,
    queue: VecDeque<BlockData>,

    frames_buffered: usize,
    water_level: usize,
    refill: usize,
    drained_reported: bool,

    slave: Option<Weak<AudioStream>>,
}

/// A single audio input to the mix.
///
/// Producers write encoded audio at their own pace; the output cycle pulls
/// finished blocks. All methods are safe to call from either side.
pub struct AudioStream {
    id: Uuid,
    raw: bool,
    destroyed: AtomicBool,
    inner: Mutex<Inner>,
    shared: Arc<OutputShared>,
}

impl AudioStream {
    pub(crate) fn new(
        format: AudioFormat,
        flags: StreamFlags,
        shared: Arc<OutputShared>,
    ) -> Arc<Self> {
        let raw = format.sample_format.is_raw();
        let mix = shared.mix_format();
        let inner = Inner {
            format,
            mix,
            raw,
            valid: false,
            draining: false,
            paused: flags.start_paused,
            force_resample: flags.force_resample,
            volume: 1.0,
            replay_gain: 1.0,
            fade: None,
            convert: None,
            resampler: None,
            remap: None,
            viz_remap: None,
            viz_tap: None,
            viz_buf: Vec::new(),
            input: ScratchBuffer::new(0),
            src_block_frames: 0,
            raw_frame_bytes: 0,
            conv_buf: Vec::new(),
            pending: Vec::new(),
            pending_raw: Vec::new(),
            queue: VecDeque::new(),
            frames_buffered: 0,
            water_level: 0,
            refill: 0,
            drained_reported: false,
            slave: None,
        };
        Arc::new(Self {
            id: Uuid::new_v4(),
            raw,
            destroyed: AtomicBool::new(false),
            inner: Mutex::new(inner),
            shared,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> AudioFormat {
        self.inner.lock().unwrap().format.clone()
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Rebuild the processing pipeline for the current mix format.
    ///
    /// Called by the engine after every sink (re)open. Queued blocks were
    /// produced for the previous mix format and are discarded.
    pub(crate) fn configure(&self, mix: &MixFormat, sink_format: Option<&AudioFormat>) {
        let mut inner = self.inner.lock().unwrap();
        let src = inner.format.clone();

        inner.mix = mix.clone();
        inner.water_level = mix.frames * WATER_LEVEL_BLOCKS;
        inner.internal_flush();
        inner.refill = 0;

        if inner.raw {
            // Passthrough frames take the sink's shape; without an open
            // raw sink the stream still buffers against its own format.
            inner.raw_frame_bytes = sink_format
                .map(|f| f.frame_bytes())
                .unwrap_or_else(|| src.frame_bytes());
            inner.src_block_frames = mix.frames;
            let capacity = inner.src_block_frames * inner.raw_frame_bytes;
            inner.input.reset(capacity);
            inner.convert = None;
            inner.resampler = None;
            inner.remap = None;
            inner.viz_remap = None;
            inner.valid = true;
            debug!("Stream {} configured raw: {} byte blocks", self.id, capacity);
            return;
        }

        let convert = to_float(src.sample_format);
        if convert.is_none() && src.sample_format != crate::audio::types::SampleFormat::F32 {
            warn!(
                "Stream {} has no decoder for {}, disabling",
                self.id, src.sample_format
            );
            inner.valid = false;
            return;
        }
        // F32 sources skip the conversion stage entirely.
        inner.convert = if src.sample_format == crate::audio::types::SampleFormat::F32 {
            None
        } else {
            convert
        };

        inner.src_block_frames = mix.frames;
        let capacity = inner.src_block_frames * src.frame_bytes();
        inner.input.reset(capacity);

        let needs_resample = src.sample_rate != mix.sample_rate || inner.force_resample;
        inner.resampler = if needs_resample {
            match StreamResampler::new(
                src.sample_rate,
                mix.sample_rate,
                src.layout.count(),
                inner.src_block_frames,
            ) {
                Ok(rs) => Some(rs),
                Err(e) => {
                    warn!("Stream {} resampler setup failed: {}", self.id, e);
                    inner.valid = false;
                    return;
                }
            }
        } else {
            None
        };

        let remap = ChannelRemap::new(&src.layout, &mix.layout, true);
        inner.remap = if remap.is_identity() { None } else { Some(remap) };

        // The tap sees post-remap blocks, so fold from the mix layout.
        let viz = ChannelRemap::new(&mix.layout, &crate::audio::types::ChannelLayout::stereo(), true);
        inner.viz_remap = Some(viz);

        inner.valid = true;
        debug!(
            "Stream {} configured: {} -> {}Hz [{}] x{}",
            self.id, src, mix.sample_rate, mix.layout, mix.frames
        );
    }

    /// Queue encoded audio for playback. Returns bytes consumed, which is
    /// less than `data.len()` when the stream is above its water level.
    pub fn write(&self, data: &[u8]) -> usize {
        if data.is_empty() || self.destroyed.load(Ordering::Relaxed) {
            return 0;
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.valid || inner.draining {
            return 0;
        }
        if inner.frames_buffered >= inner.water_level {
            return 0;
        }

        let mut consumed = 0usize;
        while consumed < data.len() {
            consumed += inner.input.fill(&data[consumed..]);
            if !inner.input.is_full() {
                break;
            }
            inner.process_block();
            if inner.frames_buffered >= inner.water_level {
                break;
            }
        }
        consumed
    }

    /// Hand the next block to the output cycle.
    pub(crate) fn pull_block(&self) -> Pull {
        if self.destroyed.load(Ordering::Relaxed) {
            return Pull::Empty;
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.valid {
            return Pull::Empty;
        }
        if inner.paused {
            return Pull::Refilling;
        }
        if inner.refill > 0 && !inner.draining {
            return Pull::Refilling;
        }

        let Some(block) = inner.queue.pop_front() else {
            if inner.draining {
                return Pull::Empty;
            }
            // Underrun: rebuild a full water level before playing again.
            inner.refill = inner.water_level;
            debug!(
                "Stream {} underrun, refilling {} frames",
                self.id, inner.refill
            );
            return Pull::Refilling;
        };

        let frames = inner.mix.frames;
        inner.frames_buffered = inner.frames_buffered.saturating_sub(frames);

        match block {
            BlockData::Raw(bytes) => Pull::Block(BlockData::Raw(bytes)),
            BlockData::Pcm(mut samples) => {
                inner.apply_gain(&mut samples);
                inner.feed_viz(&samples);
                Pull::Block(BlockData::Pcm(samples))
            }
        }
    }

    /// Mark end-of-data. Remaining partial output is padded into a final
    /// block; partial raw bursts are dropped.
    pub fn drain(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.draining {
            return;
        }
        inner.draining = true;
        if !inner.pending.is_empty() {
            let block_samples = inner.mix.block_samples();
            inner.pending.resize(block_samples, 0.0);
            let packet = std::mem::take(&mut inner.pending);
            inner.queue.push_back(BlockData::Pcm(packet));
            inner.frames_buffered += inner.mix.frames;
        }
        inner.pending_raw.clear();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().unwrap().draining
    }

    /// True once a draining stream has played everything it will ever
    /// have.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.draining && inner.queue.is_empty() && inner.pending.is_empty()
    }

    /// Discard all buffered audio. Idempotent.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.internal_flush();
        inner.refill = 0;
        inner.draining = false;
        inner.drained_reported = false;
    }

    /// Flag the stream for reclamation by the output cycle and drop its
    /// buffers. Further writes and pulls are no-ops.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner.internal_flush();
        inner.valid = false;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.inner.lock().unwrap().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }

    pub fn set_volume(&self, volume: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = volume.clamp(0.0, 1.0);
        inner.fade = None;
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    /// Pre-amplification applied together with volume, typically from
    /// replay gain tags. Not clamped to unity.
    pub fn set_replay_gain(&self, gain: f32) {
        self.inner.lock().unwrap().replay_gain = gain.max(0.0);
    }

    pub fn replay_gain(&self) -> f32 {
        self.inner.lock().unwrap().replay_gain
    }

    /// Ramp volume from `from` to `to` over `millis`, applied per frame
    /// at pull time.
    pub fn fade_volume(&self, from: f32, to: f32, millis: u32) {
        let mut inner = self.inner.lock().unwrap();
        let from = from.clamp(0.0, 1.0);
        let to = to.clamp(0.0, 1.0);
        inner.volume = from;
        if millis == 0 || from == to {
            inner.volume = to;
            inner.fade = None;
            return;
        }
        let frames = inner.mix.sample_rate as f32 / 1000.0 * millis as f32;
        inner.fade = Some(Fade {
            target: to,
            step: (to - from) / frames,
        });
    }

    pub fn is_fading(&self) -> bool {
        self.inner.lock().unwrap().fade.is_some()
    }

    /// Seconds until a sample written now reaches the speaker.
    pub fn delay(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let buffered = inner.frames_buffered as f64 / inner.mix.sample_rate.max(1) as f64;
        self.shared.delay_seconds() + buffered
    }

    /// Seconds of audio currently buffered ahead of the output.
    pub fn cache_time(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.frames_buffered as f64 / inner.mix.sample_rate.max(1) as f64
    }

    /// Seconds of audio the stream buffers when full.
    pub fn cache_total(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        inner.water_level as f64 / inner.mix.sample_rate.max(1) as f64
    }

    /// Install or remove the visualization tap. The callback receives
    /// fixed-size chunks of the stream's audio folded to stereo, after
    /// gain, and runs on the output cycle.
    pub fn set_viz_tap(&self, tap: Option<Box<dyn FnMut(&[f32]) + Send>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.viz_buf.clear();
        inner.viz_tap = tap;
    }

    /// Chain another stream to start when this one finishes draining.
    /// The slave should be created paused.
    pub fn set_slave(&self, slave: &Arc<AudioStream>) {
        self.inner.lock().unwrap().slave = Some(Arc::downgrade(slave));
    }

    /// True exactly once, the first time the stream is observed fully
    /// drained. Lets the output cycle report completion a single time.
    pub(crate) fn drain_finished_once(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let drained = inner.draining && inner.queue.is_empty() && inner.pending.is_empty();
        if drained && !inner.drained_reported {
            inner.drained_reported = true;
            true
        } else {
            false
        }
    }

    pub(crate) fn take_slave(&self) -> Option<Arc<AudioStream>> {
        self.inner
            .lock()
            .unwrap()
            .slave
            .take()
            .and_then(|weak| weak.upgrade())
    }
}

impl Inner {
    fn internal_flush(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.pending_raw.clear();
        self.input.clear();
        self.viz_buf.clear();
        self.frames_buffered = 0;
        if let Some(rs) = self.resampler.as_mut() {
            if let Err(e) = rs.reset() {
                warn!("Resampler reset failed: {}", e);
            }
        }
    }

    /// Run one full source block through the pipeline and packetize the
    /// output.
    fn process_block(&mut self) {
        if self.raw {
            self.pending_raw.extend_from_slice(self.input.contents());
            self.input.clear();
            let block_bytes = self.mix.frames * self.raw_frame_bytes;
            while self.pending_raw.len() >= block_bytes {
                let packet: Vec<u8> = self.pending_raw.drain(..block_bytes).collect();
                self.queue.push_back(BlockData::Raw(packet));
                self.frames_buffered += self.mix.frames;
                self.refill = self.refill.saturating_sub(self.mix.frames);
            }
            return;
        }

        let src_channels = self.format.layout.count();
        let src_samples = self.src_block_frames * src_channels;
        self.conv_buf.resize(src_samples, 0.0);

        match self.convert {
            Some(decode) => {
                decode(self.input.contents(), &mut self.conv_buf);
            }
            None => {
                // Source is already canonical f32
                for (c, o) in self
                    .input
                    .contents()
                    .chunks_exact(4)
                    .zip(self.conv_buf.iter_mut())
                {
                    *o = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
                }
            }
        }
        self.input.clear();

        let resampled = match self.resampler.as_mut() {
            Some(rs) => match rs.process(&self.conv_buf) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Resample failed, dropping block: {}", e);
                    return;
                }
            },
            None => None,
        };
        let stage: &[f32] = resampled.as_deref().unwrap_or(&self.conv_buf);
        let frames = stage.len() / src_channels;

        match &self.remap {
            Some(remap) => {
                let base = self.pending.len();
                self.pending
                    .resize(base + frames * self.mix.layout.count(), 0.0);
                remap.remap(stage, &mut self.pending[base..], frames);
            }
            None => self.pending.extend_from_slice(stage),
        }

        self.frames_buffered += frames;
        self.refill = self.refill.saturating_sub(frames);

        let block_samples = self.mix.block_samples();
        while self.pending.len() >= block_samples {
            let packet: Vec<f32> = self.pending.drain(..block_samples).collect();
            self.queue.push_back(BlockData::Pcm(packet));
        }
    }

    /// Apply volume, replay gain, and any active fade. Unity gain leaves
    /// samples untouched.
    fn apply_gain(&mut self, samples: &mut [f32]) {
        let channels = self.mix.layout.count().max(1);

        if let Some(fade) = self.fade {
            let mut vol = self.volume;
            let mut active = Some(fade);
            for frame in samples.chunks_exact_mut(channels) {
                let gain = vol * self.replay_gain;
                if gain != 1.0 {
                    for s in frame.iter_mut() {
                        *s *= gain;
                    }
                }
                if let Some(f) = active {
                    vol += f.step;
                    let reached = if f.step >= 0.0 {
                        vol >= f.target
                    } else {
                        vol <= f.target
                    };
                    if reached {
                        vol = f.target;
                        active = None;
                    }
                }
            }
            self.volume = vol;
            self.fade = active;
            return;
        }

        let gain = self.volume * self.replay_gain;
        if gain != 1.0 {
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }
    }

    /// Fold the finished block to stereo and feed fixed-size chunks to
    /// the visualization tap.
    fn feed_viz(&mut self, samples: &[f32]) {
        if self.viz_tap.is_none() {
            return;
        }
        let Some(viz_remap) = &self.viz_remap else {
            return;
        };

        let channels = self.mix.layout.count().max(1);
        let frames = samples.len() / channels;
        let mut buf = std::mem::take(&mut self.viz_buf);
        let base = buf.len();
        buf.resize(base + frames * 2, 0.0);

        if channels == 2 {
            buf[base..].copy_from_slice(samples);
        } else {
            // A block queued before a reconfigure can still carry the
            // old layout; skip it rather than fold with a stale matrix.
            if viz_remap.src_count() == channels {
                viz_remap.remap(samples, &mut buf[base..], frames);
            } else {
                buf.truncate(base);
            }
        }

        let mut offset = 0;
        while buf.len() - offset >= VIZ_SAMPLES {
            if let Some(tap) = self.viz_tap.as_mut() {
                tap(&buf[offset..offset + VIZ_SAMPLES]);
            }
            offset += VIZ_SAMPLES;
        }
        buf.drain(..offset);
        self.viz_buf = buf;
    }
}
