//! Output sinks
//!
//! A [`Sink`] turns finished blocks into sound on a device. Sinks are
//! negotiated through a [`SinkFactory`]: the engine proposes a format and
//! the factory may adjust rate, layout, or encoding to what the device
//! actually supports before the sink is returned. Raw passthrough opens
//! are exact-or-fail; a factory must never silently alter a bitstream
//! format.
//!
//! [`CpalSinkFactory`] is the hardware implementation. The cpal stream
//! object is not Send, so each opened sink runs the device stream on its
//! own thread and feeds it through a lock-free ring.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{traits::*, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use crate::audio::types::{AudioFormat, ChannelLayout, SampleFormat};
use crate::error::{Error, Result};

/// An enumerable output device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Identifier to pass back when opening
    pub id: String,
    /// Human-readable name
    pub name: String,
}

/// A negotiated, open output endpoint.
pub trait Sink: Send {
    /// Identifier of the device this sink writes to.
    fn name(&self) -> &str;

    /// Whether this open sink can serve the given format and device
    /// without reopening.
    fn is_compatible(&self, format: &AudioFormat, device: &str) -> bool;

    /// Write one block of finished frames, blocking until the device has
    /// taken them. Returns frames accepted.
    fn write(&mut self, data: &[u8], frames: usize) -> Result<usize>;

    /// Seconds of audio buffered between here and the speaker.
    fn delay_seconds(&self) -> f64;

    /// Block until buffered audio has played out.
    fn drain(&mut self);
}

/// Opens sinks and enumerates devices for one output backend.
pub trait SinkFactory: Send + Sync {
    /// Open a sink for `device`.
    ///
    /// For PCM opens the factory may rewrite `format` to the nearest
    /// format the device supports; the caller must re-read it after a
    /// successful open. For `passthrough` opens the format is a contract:
    /// the factory either honors it exactly or fails.
    fn open(
        &self,
        format: &mut AudioFormat,
        device: &str,
        passthrough: bool,
    ) -> Result<Box<dyn Sink>>;

    /// List devices available for PCM or passthrough output.
    fn enumerate(&self, passthrough: bool) -> Vec<DeviceInfo>;

    /// Whether any device of this backend can accept raw bitstreams.
    fn supports_raw(&self) -> bool {
        false
    }
}

/// Hardware sink factory backed by cpal.
pub struct CpalSinkFactory;

impl CpalSinkFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open(
        &self,
        format: &mut AudioFormat,
        device: &str,
        passthrough: bool,
    ) -> Result<Box<dyn Sink>> {
        if passthrough {
            // cpal exposes no IEC61937 path; a raw open must fail rather
            // than let a bitstream be played as PCM noise.
            return Err(Error::Passthrough(format!(
                "device '{}' cannot accept raw bitstreams",
                device
            )));
        }
        let sink = CpalSink::open(device, format)?;
        Ok(Box::new(sink))
    }

    fn enumerate(&self, passthrough: bool) -> Vec<DeviceInfo> {
        if passthrough {
            return Vec::new();
        }
        let host = cpal::default_host();
        let Ok(devices) = host.output_devices() else {
            return Vec::new();
        };
        devices
            .filter_map(|d| d.name().ok())
            .map(|name| DeviceInfo {
                id: name.clone(),
                name,
            })
            .collect()
    }
}

/// Shared state between a [`CpalSink`] handle and its device thread.
struct SinkShared {
    stop: AtomicBool,
    alive: AtomicBool,
    error: AtomicBool,
    underruns: AtomicU64,
}

/// PCM sink writing to a cpal device.
///
/// The device stream lives on a dedicated thread; this handle owns the
/// producer half of the sample ring.
pub struct CpalSink {
    device_name: String,
    requested_device: String,
    format: AudioFormat,
    prod: HeapProd<f32>,
    ring_capacity: usize,
    shared: Arc<SinkShared>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Result of device-side negotiation, sent back from the sink thread.
struct Negotiated {
    device_name: String,
    format: AudioFormat,
    prod: HeapProd<f32>,
    ring_capacity: usize,
}

impl CpalSink {
    fn open(device: &str, format: &mut AudioFormat) -> Result<Self> {
        let requested_device = device.to_string();
        let requested = format.clone();
        let shared = Arc::new(SinkShared {
            stop: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            error: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
        });

        let (result_tx, result_rx) = mpsc::channel::<Result<Negotiated>>();
        let thread_shared = Arc::clone(&shared);
        let thread_device = requested_device.clone();

        let thread = thread::Builder::new()
            .name("softmix-sink".to_string())
            .spawn(move || {
                run_device_thread(thread_device, requested, thread_shared, result_tx);
            })
            .map_err(|e| Error::Sink(format!("failed to spawn sink thread: {}", e)))?;

        let negotiated = result_rx
            .recv()
            .map_err(|_| Error::Sink("sink thread exited before negotiation".to_string()))??;

        info!(
            "Opened sink '{}': {}",
            negotiated.device_name, negotiated.format
        );
        *format = negotiated.format.clone();

        Ok(Self {
            device_name: negotiated.device_name,
            requested_device,
            format: negotiated.format,
            prod: negotiated.prod,
            ring_capacity: negotiated.ring_capacity,
            shared,
            thread: Some(thread),
        })
    }

    /// Underruns observed by the device callback since open.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

impl Sink for CpalSink {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn is_compatible(&self, format: &AudioFormat, device: &str) -> bool {
        format.sample_format == SampleFormat::F32
            && format.sample_rate == self.format.sample_rate
            && format.layout.count() == self.format.layout.count()
            && device == self.requested_device
    }

    fn write(&mut self, data: &[u8], frames: usize) -> Result<usize> {
        let samples = frames * self.format.layout.count();
        let mut pushed = 0usize;
        let mut stalls = 0u32;

        let mut iter = data
            .chunks_exact(4)
            .take(samples)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]));
        let mut pending = iter.next();

        while let Some(sample) = pending {
            if self.shared.error.load(Ordering::Relaxed)
                || !self.shared.alive.load(Ordering::Relaxed)
            {
                return Err(Error::Sink(format!(
                    "output stream on '{}' stopped",
                    self.device_name
                )));
            }
            if self.prod.try_push(sample).is_ok() {
                pushed += 1;
                stalls = 0;
                pending = iter.next();
            } else {
                stalls += 1;
                if stalls > 2000 {
                    warn!("Sink '{}' stalled, dropping block tail", self.device_name);
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        Ok(pushed / self.format.layout.count())
    }

    fn delay_seconds(&self) -> f64 {
        let queued = self.prod.occupied_len() / self.format.layout.count();
        queued as f64 / self.format.sample_rate as f64
    }

    fn drain(&mut self) {
        let deadline = 2 * self.ring_capacity as u64 * 1000
            / (self.format.sample_rate as u64 * self.format.layout.count() as u64).max(1);
        let mut waited = 0u64;
        while self.prod.occupied_len() > 0 && waited < deadline.max(100) {
            if !self.shared.alive.load(Ordering::Relaxed) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            waited += 5;
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let underruns = self.underruns();
        if underruns > 0 {
            debug!(
                "Sink '{}' closed with {} underruns",
                self.device_name, underruns
            );
        }
    }
}

/// Owns the cpal stream for one sink's lifetime.
fn run_device_thread(
    device_name: String,
    requested: AudioFormat,
    shared: Arc<SinkShared>,
    result_tx: mpsc::Sender<Result<Negotiated>>,
) {
    let result = (|| -> Result<(cpal::Stream, Negotiated)> {
        let (device, config, format) = negotiate_device(&device_name, &requested)?;
        let channels = format.layout.count();

        // Hold several blocks so the output cycle has slack against
        // callback jitter.
        let ring_capacity = format.frames.max(256) * channels * 4;
        let rb = HeapRb::<f32>::new(ring_capacity);
        let (prod, mut cons) = rb.split();

        let callback_shared = Arc::clone(&shared);
        let error_shared = Arc::clone(&shared);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut missed = false;
                    for sample in data.iter_mut() {
                        *sample = cons.try_pop().unwrap_or_else(|| {
                            missed = true;
                            0.0
                        });
                    }
                    if missed {
                        callback_shared.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_shared.error.store(true, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| Error::Sink(format!("failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| Error::Sink(format!("failed to start stream: {}", e)))?;

        let actual_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Ok((
            stream,
            Negotiated {
                device_name: actual_name,
                format,
                prod,
                ring_capacity,
            },
        ))
    })();

    match result {
        Ok((stream, negotiated)) => {
            if result_tx.send(Ok(negotiated)).is_err() {
                shared.alive.store(false, Ordering::Relaxed);
                return;
            }
            while !shared.stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(20));
            }
            drop(stream);
            shared.alive.store(false, Ordering::Relaxed);
        }
        Err(e) => {
            shared.alive.store(false, Ordering::Relaxed);
            let _ = result_tx.send(Err(e));
        }
    }
}

/// Find the device and the closest supported PCM configuration.
fn negotiate_device(
    device_name: &str,
    requested: &AudioFormat,
) -> Result<(cpal::Device, cpal::StreamConfig, AudioFormat)> {
    let host = cpal::default_host();

    let device = if device_name.is_empty() {
        host.default_output_device()
            .ok_or_else(|| Error::Device("no default output device".to_string()))?
    } else {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::Device(format!("failed to enumerate devices: {}", e)))?;
        match devices.find(|d| d.name().ok().as_deref() == Some(device_name)) {
            Some(d) => d,
            None => {
                warn!(
                    "Device '{}' not found, falling back to default device",
                    device_name
                );
                host.default_output_device().ok_or_else(|| {
                    Error::Device(format!(
                        "device '{}' not found and no default available",
                        device_name
                    ))
                })?
            }
        }
    };

    let channels = requested.layout.count() as u16;
    let rate = requested.sample_rate;

    let configs = device
        .supported_output_configs()
        .map_err(|e| Error::Device(format!("failed to get device configs: {}", e)))?;

    // Prefer an exact match on channels and rate with f32 samples
    let mut best: Option<cpal::SupportedStreamConfig> = None;
    for candidate in configs {
        if candidate.sample_format() != cpal::SampleFormat::F32 {
            continue;
        }
        if candidate.channels() == channels
            && candidate.min_sample_rate().0 <= rate
            && candidate.max_sample_rate().0 >= rate
        {
            best = Some(candidate.with_sample_rate(cpal::SampleRate(rate)));
            break;
        }
        if best.is_none() && candidate.channels() == channels {
            best = Some(candidate.with_max_sample_rate());
        }
    }

    let supported = match best {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| Error::Device(format!("failed to get default config: {}", e)))?,
    };

    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::Sink(format!(
            "device offers no f32 output (got {:?})",
            supported.sample_format()
        )));
    }

    let config = supported.config();
    let actual_channels = config.channels as usize;
    let layout = if actual_channels == requested.layout.count() {
        requested.layout.clone()
    } else {
        ChannelLayout::default_for_count(actual_channels)
    };

    let format = AudioFormat::new(
        SampleFormat::F32,
        config.sample_rate.0,
        layout,
        requested.frames,
    );

    debug!(
        "Negotiated device config: requested {} got {}",
        requested, format
    );

    Ok((device, config, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_open_fails_cleanly() {
        let factory = CpalSinkFactory::new();
        let mut format = AudioFormat::new(SampleFormat::Ac3, 48000, ChannelLayout::stereo(), 1024);
        let requested = format.clone();
        let result = factory.open(&mut format, "", true);
        assert!(matches!(result, Err(Error::Passthrough(_))));
        // A failed raw open must not have touched the format
        assert_eq!(format, requested);
    }

    #[test]
    fn test_factory_reports_no_raw_support() {
        let factory = CpalSinkFactory::new();
        assert!(!factory.supports_raw());
        assert!(factory.enumerate(true).is_empty());
    }

    #[test]
    fn test_enumerate_does_not_panic() {
        // Hardware-dependent; just verify the call is well-behaved.
        let factory = CpalSinkFactory::new();
        let _ = factory.enumerate(false);
    }
}
