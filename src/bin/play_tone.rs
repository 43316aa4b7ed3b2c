//! Play a sine tone through the mixing engine.
//!
//! Smoke-test utility for the output path: opens the default (or named)
//! device, feeds a generated tone through a stream, and drains it.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use softmix::audio::types::{AudioFormat, ChannelLayout, SampleFormat};
use softmix::{CpalSinkFactory, Engine, EngineConfig, StreamFlags};

#[derive(Parser, Debug)]
#[command(name = "play-tone", about = "Play a sine tone through softmix")]
struct Args {
    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Duration in seconds
    #[arg(short, long, default_value_t = 2.0)]
    duration: f32,

    /// Output level, 0.0 to 1.0
    #[arg(short, long, default_value_t = 0.5)]
    level: f32,

    /// Output device name (default device when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }

    let engine = Engine::new(config, Box::new(CpalSinkFactory::new()));

    if args.list_devices {
        for dev in engine.devices(false) {
            println!("{}\t{}", dev.id, dev.name);
        }
        return Ok(());
    }

    engine.start();

    let sample_rate = 44100u32;
    let format = AudioFormat::new(
        SampleFormat::F32,
        sample_rate,
        ChannelLayout::stereo(),
        1024,
    );
    let stream = engine
        .open_stream(format, StreamFlags::default())
        .context("opening stream")?;

    let level = args.level.clamp(0.0, 1.0);
    let total_frames = (args.duration * sample_rate as f32) as usize;
    info!(
        "Playing {:.1} Hz for {:.1}s at level {:.2}",
        args.frequency, args.duration, level
    );

    let chunk_frames = 1024usize;
    let mut bytes = Vec::with_capacity(chunk_frames * 2 * 4);
    let mut frame = 0usize;
    while frame < total_frames {
        let frames = chunk_frames.min(total_frames - frame);
        bytes.clear();
        for i in 0..frames {
            let t = (frame + i) as f32 / sample_rate as f32;
            let s = level * (2.0 * std::f32::consts::PI * args.frequency * t).sin();
            bytes.extend_from_slice(&s.to_ne_bytes());
            bytes.extend_from_slice(&s.to_ne_bytes());
        }
        let mut offset = 0;
        while offset < bytes.len() {
            let taken = stream.write(&bytes[offset..]);
            if taken == 0 {
                thread::sleep(Duration::from_millis(5));
            } else {
                offset += taken;
            }
        }
        frame += frames;
    }

    stream.drain();
    while !stream.is_drained() {
        thread::sleep(Duration::from_millis(20));
    }

    engine.stop();
    Ok(())
}
