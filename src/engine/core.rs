//! Engine core: master selection, sink lifecycle, and the output cycle
//!
//! The engine owns the set of streams and one sink at a time. Each output
//! cycle reclaims destroyed streams, reopens the sink when the mix mode
//! must change, then either forwards the master's raw bitstream verbatim
//! or sums every playing stream into a float accumulator, overlays sound
//! effects, applies master volume with a soft limiter, and hands the
//! encoded block to the sink.
//!
//! The cycle runs on a dedicated thread after [`Engine::start`]; hosts
//! embedding the engine (and tests) can instead drive [`Engine::run_cycle`]
//! themselves.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::buffer::AudioBuffer;
use crate::audio::convert::{from_float, soft_clamp, to_float, FromFloatFn};
use crate::audio::types::{AudioFormat, Channel, ChannelLayout, SampleFormat};
use crate::config::{EngineConfig, Quality};
use crate::engine::sink::{DeviceInfo, Sink, SinkFactory};
use crate::engine::sound::{PlayingSound, Sound};
use crate::engine::stream::{AudioStream, BlockData, Pull, StreamFlags};
use crate::engine::{MixFormat, OutputShared};
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};

/// Transport rate required by the high-bandwidth bitstream formats.
const HD_RAW_RATE: u32 = 192_000;

struct EngineState {
    streams: Vec<Arc<AudioStream>>,
    registered: Vec<Arc<Sound>>,
    playing_sounds: Vec<PlayingSound>,

    sink: Option<Box<dyn Sink>>,
    sink_device: String,
    sink_format: Option<AudioFormat>,
    raw_passthrough: bool,
    encode: Option<FromFloatFn>,
    master: Option<Uuid>,

    accum: AudioBuffer<f32>,
    out_bytes: AudioBuffer<u8>,
}

struct Shared {
    state: Mutex<EngineState>,
    config: Mutex<EngineConfig>,
    factory: Box<dyn SinkFactory>,
    out: Arc<OutputShared>,
    events: EventBus,
    running: AtomicBool,
    reopen: AtomicBool,
    volume_bits: AtomicU32,
}

/// The mixing engine.
pub struct Engine {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Create a stopped engine. No sink is opened until the first cycle
    /// runs.
    pub fn new(config: EngineConfig, factory: Box<dyn SinkFactory>) -> Arc<Self> {
        let mix = MixFormat {
            sample_rate: config.resample_rate.unwrap_or(44100),
            layout: ChannelLayout::standard(config.layout),
            frames: config.block_frames,
        };
        let volume = config.volume.clamp(0.0, 1.0);

        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                streams: Vec::new(),
                registered: Vec::new(),
                playing_sounds: Vec::new(),
                sink: None,
                sink_device: String::new(),
                sink_format: None,
                raw_passthrough: false,
                encode: None,
                master: None,
                accum: AudioBuffer::new(),
                out_bytes: AudioBuffer::new(),
            }),
            config: Mutex::new(config),
            factory,
            out: Arc::new(OutputShared::new(mix)),
            events: EventBus::default(),
            running: AtomicBool::new(false),
            reopen: AtomicBool::new(false),
            volume_bits: AtomicU32::new(volume.to_bits()),
        });

        Arc::new(Self {
            shared,
            thread: Mutex::new(None),
        })
    }

    /// Spawn the output thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.reopen.store(true, Ordering::Relaxed);

        let engine = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("softmix-engine".to_string())
            .spawn(move || {
                info!("Output thread started");
                while engine.shared.running.load(Ordering::Relaxed) {
                    let wrote = engine.run_cycle();
                    if !wrote {
                        // Idle pacing: one block period of real time
                        let mix = engine.shared.out.mix_format();
                        let micros =
                            mix.frames as u64 * 1_000_000 / mix.sample_rate.max(1) as u64;
                        thread::sleep(Duration::from_micros(micros.min(50_000)));
                    }
                }
                info!("Output thread stopped");
            });

        match spawned {
            Ok(handle) => {
                *self.thread.lock().unwrap() = Some(handle);
            }
            Err(e) => {
                error!("Failed to spawn output thread: {}", e);
                self.shared.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop the output thread and close the sink.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(mut sink) = state.sink.take() {
            sink.drain();
        }
        state.sink_format = None;
        state.encode = None;
    }

    /// Register a new input stream with the mix.
    pub fn open_stream(&self, format: AudioFormat, flags: StreamFlags) -> Result<Arc<AudioStream>> {
        if format.sample_rate == 0 || format.layout.count() == 0 {
            return Err(Error::UnsupportedFormat(format.to_string()));
        }
        let raw = format.sample_format.is_raw();
        let quality;
        {
            let config = self.shared.config.lock().unwrap();
            if raw && !config.passthrough_enabled(format.sample_format) {
                return Err(Error::Passthrough(format!(
                    "{} passthrough is disabled",
                    format.sample_format
                )));
            }
            quality = config.quality;
        }
        if !raw && to_float(format.sample_format).is_none() {
            return Err(Error::UnsupportedFormat(format.to_string()));
        }

        let stream = AudioStream::new(format.clone(), flags, Arc::clone(&self.shared.out));

        let mut state = self.shared.state.lock().unwrap();
        let was_empty = state.streams.is_empty();
        let mix = self.shared.out.mix_format();
        stream.configure(&mix, if raw { state.sink_format.as_ref() } else { None });
        state.streams.push(Arc::clone(&stream));
        drop(state);

        if (raw || was_empty || quality == Quality::Audiophile) && !flags.start_paused {
            self.shared.reopen.store(true, Ordering::Relaxed);
        }

        info!("Stream {} added: {}", stream.id(), format);
        self.shared.events.emit_lossy(EngineEvent::StreamAdded {
            stream_id: stream.id(),
            format,
            timestamp: chrono::Utc::now(),
        });

        Ok(stream)
    }

    /// Flag a stream for removal. The output cycle reclaims it.
    pub fn destroy_stream(&self, stream: &Arc<AudioStream>) {
        stream.destroy();
        self.shared.reopen.store(true, Ordering::Relaxed);
    }

    /// Remove a stream from the mix without discarding its buffers.
    pub fn pause_stream(&self, stream: &Arc<AudioStream>) {
        stream.set_paused(true);
    }

    /// Return a paused stream to the mix.
    pub fn resume_stream(&self, stream: &Arc<AudioStream>) {
        stream.set_paused(false);
        let quality = self.shared.config.lock().unwrap().quality;
        if stream.is_raw() || quality == Quality::Audiophile {
            self.shared.reopen.store(true, Ordering::Relaxed);
        }
    }

    /// Load a WAV file and register it for playback.
    pub fn load_sound(&self, path: &std::path::Path) -> Result<Arc<Sound>> {
        let sound = Sound::load(path)?;
        Ok(self.register_sound(sound))
    }

    /// Register a sound for playback, rendering it for the current mix.
    pub fn register_sound(&self, sound: Sound) -> Arc<Sound> {
        let sound = Arc::new(sound);
        let mix = self.shared.out.mix_format();
        if let Err(e) = sound.prepare(&mix) {
            warn!("Sound '{}' prepare failed: {}", sound.name(), e);
        }
        self.shared
            .state
            .lock()
            .unwrap()
            .registered
            .push(Arc::clone(&sound));
        sound
    }

    /// Start one playback of a registered sound. Multiple playbacks of
    /// the same sound may overlap.
    pub fn play_sound(&self, sound: &Arc<Sound>) {
        let mut state = self.shared.state.lock().unwrap();
        state.playing_sounds.push(PlayingSound::new(Arc::clone(sound)));
    }

    /// Cancel all in-flight playbacks of a sound.
    pub fn stop_sound(&self, sound: &Arc<Sound>) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .playing_sounds
            .retain(|p| p.sound_id() != sound.id());
    }

    /// Stop and unregister a sound.
    pub fn free_sound(&self, sound: &Arc<Sound>) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .playing_sounds
            .retain(|p| p.sound_id() != sound.id());
        state.registered.retain(|s| s.id() != sound.id());
    }

    /// Master volume, applied to the summed mix before the limiter.
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared
            .volume_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
        debug!("Engine volume set to {:.2}", clamped);
        self.shared.events.emit_lossy(EngineEvent::VolumeChanged {
            volume: clamped,
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    /// Seconds between a sample entering the mix and reaching the
    /// speaker, from the last output cycle.
    pub fn delay(&self) -> f64 {
        self.shared.out.delay_seconds()
    }

    /// The format streams currently mix into.
    pub fn mix_format(&self) -> MixFormat {
        self.shared.out.mix_format()
    }

    /// Enumerate output devices.
    pub fn devices(&self, passthrough: bool) -> Vec<DeviceInfo> {
        self.shared.factory.enumerate(passthrough)
    }

    /// Whether a raw format could currently be played through.
    pub fn supports_raw(&self, format: SampleFormat) -> bool {
        format.is_raw()
            && self.shared.factory.supports_raw()
            && self
                .shared
                .config
                .lock()
                .unwrap()
                .passthrough_enabled(format)
    }

    /// Replace the configuration. Takes effect at the next cycle via a
    /// sink reopen.
    pub fn reconfigure(&self, config: EngineConfig) {
        self.set_volume(config.volume);
        *self.shared.config.lock().unwrap() = config;
        self.shared.reopen.store(true, Ordering::Relaxed);
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Run one output cycle. Returns true when a block was delivered to a
    /// sink, false when the cycle idled (no sink, or raw mode with no
    /// master data).
    pub fn run_cycle(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let state = &mut *state;

        // Reclaim destroyed streams.
        let prev_master = state.master;
        let mut removed: Vec<Uuid> = Vec::new();
        state.streams.retain(|s| {
            if s.is_destroyed() {
                removed.push(s.id());
                false
            } else {
                true
            }
        });
        let master_removed = prev_master.map_or(false, |id| removed.contains(&id));
        for id in removed {
            debug!("Stream {} reclaimed", id);
            self.shared.events.emit_lossy(EngineEvent::StreamRemoved {
                stream_id: id,
                timestamp: chrono::Utc::now(),
            });
        }

        // Master selection and reopen triggers.
        let quality = self.shared.config.lock().unwrap().quality;
        let master = select_master(&state.streams, quality == Quality::Audiophile);
        let master_id = master.as_ref().map(|m| m.id());
        let desired_raw = master.as_ref().map(|m| m.is_raw()).unwrap_or(false);

        let mode_change = desired_raw != state.raw_passthrough;
        let audiophile_change =
            quality == Quality::Audiophile && master_id != prev_master && master_id.is_some();
        if self.shared.reopen.swap(false, Ordering::Relaxed)
            || mode_change
            || audiophile_change
            || master_removed
        {
            self.open_sink(state, master.as_ref());
        }
        state.master = master_id;

        if state.raw_passthrough {
            self.run_raw_cycle(state)
        } else {
            self.run_pcm_cycle(state)
        }
    }

    /// Forward the master's bitstream verbatim; other streams are still
    /// pulled so their producers keep pacing, but their data is dropped.
    fn run_raw_cycle(&self, state: &mut EngineState) -> bool {
        let master = state.master;
        let mut raw_block: Option<Vec<u8>> = None;

        let streams: Vec<Arc<AudioStream>> = state.streams.clone();
        for stream in &streams {
            match stream.pull_block() {
                Pull::Block(BlockData::Raw(bytes)) if Some(stream.id()) == master => {
                    raw_block = Some(bytes);
                }
                Pull::Block(_) => {}
                Pull::Refilling => {}
                Pull::Empty => self.note_drained(stream),
            }
        }

        let Some(sink) = state.sink.as_mut() else {
            self.shared.out.set_delay_seconds(0.0);
            return false;
        };
        let Some(format) = state.sink_format.as_ref() else {
            return false;
        };

        let frames = format.frames;
        let wrote = match raw_block {
            Some(bytes) => match sink.write(&bytes, frames) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Raw sink write failed: {}", e);
                    self.shared.reopen.store(true, Ordering::Relaxed);
                    false
                }
            },
            None => {
                // Keep the transport clocked with silence.
                state.out_bytes.ensure_len(format.block_bytes());
                state.out_bytes.fill_default();
                let silence = &state.out_bytes.as_slice()[..format.block_bytes()];
                sink.write(silence, frames).is_ok()
            }
        };

        self.shared.out.set_delay_seconds(sink.delay_seconds());
        wrote
    }

    /// Sum playing streams, overlay sounds, finalize, encode, write.
    fn run_pcm_cycle(&self, state: &mut EngineState) -> bool {
        let mix = self.shared.out.mix_format();
        let block_samples = mix.block_samples();

        state.accum.ensure_len(block_samples);
        let streams: Vec<Arc<AudioStream>> = state.streams.clone();

        let accum = &mut state.accum.as_mut_slice()[..block_samples];
        accum.fill(0.0);

        for stream in &streams {
            match stream.pull_block() {
                Pull::Block(BlockData::Pcm(samples)) => {
                    if samples.len() == block_samples {
                        for (acc, s) in accum.iter_mut().zip(samples.iter()) {
                            *acc += s;
                        }
                    } else {
                        // Stale block from a previous mix format
                        debug!(
                            "Stream {} block of {} samples dropped (want {})",
                            stream.id(),
                            samples.len(),
                            block_samples
                        );
                    }
                }
                Pull::Block(BlockData::Raw(_)) => {}
                Pull::Refilling => {}
                Pull::Empty => self.note_drained(stream),
            }
        }

        state.playing_sounds.retain_mut(|p| p.mix_into(accum));

        let volume = self.volume();
        for s in accum.iter_mut() {
            *s = soft_clamp(*s * volume);
        }

        if mix.layout.count() == 8 {
            reorder_wire_channels(accum, &mix.layout);
        }

        let (Some(sink), Some(encode), Some(format)) = (
            state.sink.as_mut(),
            state.encode,
            state.sink_format.as_ref(),
        ) else {
            self.shared.out.set_delay_seconds(0.0);
            return false;
        };

        state.out_bytes.ensure_len(format.block_bytes());
        let out = &mut state.out_bytes.as_mut_slice()[..format.block_bytes()];
        encode(accum, out);

        let wrote = match sink.write(out, mix.frames) {
            Ok(_) => true,
            Err(e) => {
                warn!("Sink write failed: {}", e);
                self.shared.reopen.store(true, Ordering::Relaxed);
                false
            }
        };
        self.shared.out.set_delay_seconds(sink.delay_seconds());
        wrote
    }

    fn note_drained(&self, stream: &Arc<AudioStream>) {
        if stream.drain_finished_once() {
            info!("Stream {} drained", stream.id());
            self.shared.events.emit_lossy(EngineEvent::StreamDrained {
                stream_id: stream.id(),
                timestamp: chrono::Utc::now(),
            });
            if let Some(slave) = stream.take_slave() {
                debug!("Resuming chained stream {}", slave.id());
                slave.set_paused(false);
                let quality = self.shared.config.lock().unwrap().quality;
                if slave.is_raw() || quality == Quality::Audiophile {
                    self.shared.reopen.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// Negotiate and open the sink for the current master, then rebuild
    /// every stream's pipeline and re-render registered sounds.
    fn open_sink(&self, state: &mut EngineState, master: Option<&Arc<AudioStream>>) {
        let config = self.shared.config.lock().unwrap().clone();
        let raw = master.map(|m| m.is_raw()).unwrap_or(false);

        let mut desired = match master {
            Some(m) if raw => {
                let mf = m.format();
                let rate = if mf.sample_format.is_hd_raw() {
                    HD_RAW_RATE
                } else {
                    mf.sample_rate
                };
                AudioFormat::new(mf.sample_format, rate, mf.layout, config.block_frames)
            }
            Some(m) => {
                let mf = m.format();
                AudioFormat::new(
                    SampleFormat::F32,
                    config.resample_rate.unwrap_or(mf.sample_rate),
                    mf.layout.resolve(config.layout),
                    config.block_frames,
                )
            }
            None => AudioFormat::new(
                SampleFormat::F32,
                config.resample_rate.unwrap_or(44100),
                ChannelLayout::standard(config.layout),
                config.block_frames,
            ),
        };

        let device = if raw {
            config.passthrough_device().to_string()
        } else {
            config.device.clone()
        };

        // An already-open sink that still fits needs no churn.
        if raw == state.raw_passthrough && state.sink_device == device {
            if let Some(sink) = state.sink.as_ref() {
                if sink.is_compatible(&desired, &device) {
                    debug!("Sink already compatible, keeping it open");
                    return;
                }
            }
        }

        if let Some(mut old) = state.sink.take() {
            debug!("Closing sink '{}'", old.name());
            old.drain();
        }

        let requested = desired.clone();
        match self.shared.factory.open(&mut desired, &device, raw) {
            Ok(sink) => {
                if raw && desired != requested {
                    // The factory broke the passthrough contract; refuse
                    // to play a mangled bitstream.
                    error!(
                        "Factory altered raw format {} -> {}, rejecting sink",
                        requested, desired
                    );
                    state.sink = None;
                    state.encode = None;
                    // Streams keep tracking what was asked for, not the
                    // mangled negotiation result.
                    desired = requested;
                } else {
                    info!(
                        "Sink open on '{}': {} (passthrough: {})",
                        sink.name(),
                        desired,
                        raw
                    );
                    self.shared.events.emit_lossy(EngineEvent::SinkOpened {
                        device: sink.name().to_string(),
                        format: desired.clone(),
                        passthrough: raw,
                        timestamp: chrono::Utc::now(),
                    });
                    state.sink = Some(sink);
                    state.encode = if raw {
                        None
                    } else {
                        from_float(desired.sample_format)
                    };
                }
            }
            Err(e) => {
                warn!("Sink open on '{}' failed: {}", device, e);
                self.shared.events.emit_lossy(EngineEvent::SinkFailed {
                    device: device.clone(),
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                state.sink = None;
                state.encode = None;
            }
        }

        // Streams follow the negotiated format even when no sink opened,
        // so producers keep flowing and a later open picks up seamlessly.
        state.sink_device = device;
        state.sink_format = Some(desired.clone());
        state.raw_passthrough = raw;

        let mix = MixFormat {
            sample_rate: desired.sample_rate,
            layout: desired.layout.clone(),
            frames: desired.frames,
        };
        self.shared.out.set_mix_format(mix.clone());

        for stream in &state.streams {
            stream.configure(&mix, if raw { state.sink_format.as_ref() } else { None });
        }
        for sound in &state.registered {
            if let Err(e) = sound.prepare(&mix) {
                warn!("Sound '{}' re-render failed: {}", sound.name(), e);
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick the stream whose format drives the sink.
///
/// The most recently added raw stream always wins. Otherwise audiophile
/// mode follows the newest stream and default mode stays with the oldest.
fn select_master(streams: &[Arc<AudioStream>], audiophile: bool) -> Option<Arc<AudioStream>> {
    let mut master = None;
    for stream in streams {
        if stream.is_raw() {
            master = Some(Arc::clone(stream));
        }
    }
    if master.is_none() {
        master = if audiophile {
            streams.last().cloned()
        } else {
            streams.first().cloned()
        };
    }
    master
}

/// Swap the standard rear/side block ordering into the 8-channel wire
/// ordering expected by hardware.
fn reorder_wire_channels(samples: &mut [f32], layout: &ChannelLayout) {
    // Only applies to the full 7.1 arrangement.
    let (Some(bl), Some(br), Some(sl), Some(sr)) = (
        layout.position(Channel::BackLeft),
        layout.position(Channel::BackRight),
        layout.position(Channel::SideLeft),
        layout.position(Channel::SideRight),
    ) else {
        return;
    };
    let channels = layout.count();
    for frame in samples.chunks_exact_mut(channels) {
        frame.swap(bl, sl);
        frame.swap(br, sr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams_of(formats: &[SampleFormat]) -> Vec<Arc<AudioStream>> {
        let shared = Arc::new(OutputShared::new(MixFormat {
            sample_rate: 44100,
            layout: ChannelLayout::stereo(),
            frames: 4,
        }));
        formats
            .iter()
            .map(|&fmt| {
                AudioStream::new(
                    AudioFormat::new(fmt, 44100, ChannelLayout::stereo(), 4),
                    StreamFlags::default(),
                    Arc::clone(&shared),
                )
            })
            .collect()
    }

    #[test]
    fn test_master_default_is_first() {
        let streams = streams_of(&[SampleFormat::F32, SampleFormat::S16Le]);
        let master = select_master(&streams, false).unwrap();
        assert_eq!(master.id(), streams[0].id());
    }

    #[test]
    fn test_master_audiophile_is_newest() {
        let streams = streams_of(&[SampleFormat::F32, SampleFormat::S16Le]);
        let master = select_master(&streams, true).unwrap();
        assert_eq!(master.id(), streams[1].id());
    }

    #[test]
    fn test_master_last_raw_wins() {
        let streams = streams_of(&[SampleFormat::Ac3, SampleFormat::F32, SampleFormat::Dts]);
        let master = select_master(&streams, false).unwrap();
        assert_eq!(master.id(), streams[2].id());
        // Raw outranks audiophile recency too
        let master = select_master(&streams, true).unwrap();
        assert_eq!(master.id(), streams[2].id());
    }

    #[test]
    fn test_master_empty_is_none() {
        assert!(select_master(&[], false).is_none());
    }

    #[test]
    fn test_wire_reorder_swaps_rears_and_sides() {
        let layout = ChannelLayout::standard(crate::audio::types::StandardLayout::Layout7_1);
        // FL FR FC LFE BL BR SL SR
        let mut frame = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        reorder_wire_channels(&mut frame, &layout);
        assert_eq!(frame, vec![1.0, 2.0, 3.0, 4.0, 7.0, 8.0, 5.0, 6.0]);
    }

    #[test]
    fn test_wire_reorder_ignores_other_layouts() {
        let layout = ChannelLayout::standard(crate::audio::types::StandardLayout::Layout5_1);
        let mut frame = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let orig = frame.clone();
        reorder_wire_channels(&mut frame, &layout);
        assert_eq!(frame, orig);
    }
}
