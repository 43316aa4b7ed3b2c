//! Test sink: captures every block the engine writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use softmix::audio::types::AudioFormat;
use softmix::error::{Error, Result};
use softmix::{DeviceInfo, Sink, SinkFactory};

/// One sink open observed by the factory.
#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub format: AudioFormat,
    pub device: String,
    pub passthrough: bool,
}

#[derive(Default)]
pub struct Captured {
    pub opens: Mutex<Vec<OpenRecord>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
}

impl Captured {
    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn last_open(&self) -> Option<OpenRecord> {
        self.opens.lock().unwrap().last().cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.writes.lock().unwrap().last().cloned()
    }

    /// Interpret a captured block as native-endian f32 samples.
    pub fn last_write_f32(&self) -> Option<Vec<f32>> {
        self.last_write().map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
    }
}

pub struct CaptureSinkFactory {
    pub captured: Arc<Captured>,
    pub fail_open: AtomicBool,
    pub halve_raw_rate: AtomicBool,
}

impl CaptureSinkFactory {
    pub fn new() -> (Self, Arc<Captured>) {
        let captured = Arc::new(Captured::default());
        (
            Self {
                captured: Arc::clone(&captured),
                fail_open: AtomicBool::new(false),
                halve_raw_rate: AtomicBool::new(false),
            },
            captured,
        )
    }
}

impl SinkFactory for CaptureSinkFactory {
    fn open(
        &self,
        format: &mut AudioFormat,
        device: &str,
        passthrough: bool,
    ) -> Result<Box<dyn Sink>> {
        if self.fail_open.load(Ordering::Relaxed) {
            return Err(Error::Device(format!("no such device: {}", device)));
        }
        if passthrough && self.halve_raw_rate.load(Ordering::Relaxed) {
            // Stands in for a device that renegotiates the bitstream rate.
            format.sample_rate /= 2;
        }
        self.captured.opens.lock().unwrap().push(OpenRecord {
            format: format.clone(),
            device: device.to_string(),
            passthrough,
        });
        Ok(Box::new(CaptureSink {
            captured: Arc::clone(&self.captured),
            format: format.clone(),
            device: device.to_string(),
        }))
    }

    fn enumerate(&self, _passthrough: bool) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            id: "test".to_string(),
            name: "Capture Sink".to_string(),
        }]
    }

    fn supports_raw(&self) -> bool {
        true
    }
}

struct CaptureSink {
    captured: Arc<Captured>,
    format: AudioFormat,
    device: String,
}

impl Sink for CaptureSink {
    fn name(&self) -> &str {
        "Capture Sink"
    }

    fn is_compatible(&self, format: &AudioFormat, device: &str) -> bool {
        *format == self.format && device == self.device
    }

    fn write(&mut self, data: &[u8], _frames: usize) -> Result<usize> {
        self.captured.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn delay_seconds(&self) -> f64 {
        0.01
    }

    fn drain(&mut self) {}
}
