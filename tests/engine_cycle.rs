//! End-to-end output cycle tests against a capturing sink.
//!
//! The cycles are driven by hand with `Engine::run_cycle`, so every block
//! the engine produces is observed deterministically. Opening the sink
//! rebuilds each stream's pipeline and discards queued blocks, so these
//! tests run one settling cycle before feeding audio.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use softmix::audio::types::{AudioFormat, ChannelLayout, SampleFormat, StandardLayout};
use softmix::{Engine, EngineConfig, EngineEvent, Quality, StreamFlags};

use common::{Captured, CaptureSinkFactory};

const BLOCK: usize = 4;

fn test_config() -> EngineConfig {
    EngineConfig {
        block_frames: BLOCK,
        ..EngineConfig::default()
    }
}

fn engine_with(config: EngineConfig) -> (Arc<Engine>, Arc<Captured>) {
    let (factory, captured) = CaptureSinkFactory::new();
    (Engine::new(config, Box::new(factory)), captured)
}

fn stereo_f32(rate: u32) -> AudioFormat {
    AudioFormat::new(SampleFormat::F32, rate, ChannelLayout::stereo(), BLOCK)
}

fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

#[test]
fn test_unity_block_reaches_sink_bit_exact() {
    let (engine, captured) = engine_with(test_config());
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    assert!(engine.run_cycle());

    let open = captured.last_open().unwrap();
    assert!(!open.passthrough);
    assert_eq!(open.format.sample_format, SampleFormat::F32);
    assert_eq!(open.format.sample_rate, 44100);

    let samples = [0.1f32, -0.1, 0.2, -0.2, 0.3, -0.3, 0.4, -0.4];
    let bytes = f32_bytes(&samples);
    assert_eq!(stream.write(&bytes), bytes.len());
    stream.drain();

    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), samples);
}

#[test]
fn test_streams_sum_additively() {
    let (engine, captured) = engine_with(test_config());
    let a = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    let b = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();

    a.write(&f32_bytes(&[0.25f32; BLOCK * 2]));
    b.write(&f32_bytes(&[0.25f32; BLOCK * 2]));
    a.drain();
    b.drain();

    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.5f32; BLOCK * 2]);
}

#[test]
fn test_master_volume_scales_output() {
    let (engine, captured) = engine_with(test_config());
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    engine.set_volume(0.5);

    stream.write(&f32_bytes(&[0.8f32; BLOCK * 2]));
    stream.drain();
    assert!(engine.run_cycle());
    for s in captured.last_write_f32().unwrap() {
        assert!((s - 0.4).abs() < 1e-6);
    }
}

#[test]
fn test_underrun_refills_before_playing_again() {
    let (engine, captured) = engine_with(test_config());
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    // Settling cycle leaves the stream with a full refill debt.
    engine.run_cycle();

    // One block is not enough to clear the debt; silence comes out.
    stream.write(&f32_bytes(&[0.5f32; BLOCK * 2]));
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.0f32; BLOCK * 2]);

    // Topping up to the water level clears it and audio flows.
    for _ in 0..8 {
        stream.write(&f32_bytes(&[0.5f32; BLOCK * 2]));
    }
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.5f32; BLOCK * 2]);
}

#[test]
fn test_raw_master_forwards_verbatim() {
    let mut config = test_config();
    config.ac3_passthrough = true;
    let (engine, captured) = engine_with(config);

    let _pcm = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    assert!(!captured.last_open().unwrap().passthrough);

    let raw_format = AudioFormat::new(SampleFormat::Ac3, 48000, ChannelLayout::stereo(), BLOCK);
    let raw = engine.open_stream(raw_format, StreamFlags::default()).unwrap();
    engine.run_cycle();

    let open = captured.last_open().unwrap();
    assert!(open.passthrough);
    assert_eq!(open.format.sample_format, SampleFormat::Ac3);
    assert_eq!(open.format.sample_rate, 48000);

    // One raw block: frames * channels * 2 bytes
    let burst: Vec<u8> = (0..BLOCK * 2 * 2).map(|i| i as u8).collect();
    assert_eq!(raw.write(&burst), burst.len());
    raw.drain();
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write().unwrap(), burst);
}

#[test]
fn test_raw_open_requires_passthrough_config() {
    let (engine, _captured) = engine_with(test_config());
    let raw_format = AudioFormat::new(SampleFormat::Dts, 48000, ChannelLayout::stereo(), BLOCK);
    assert!(engine.open_stream(raw_format, StreamFlags::default()).is_err());
}

#[test]
fn test_raw_master_removal_returns_to_pcm() {
    let mut config = test_config();
    config.dts_passthrough = true;
    let (engine, captured) = engine_with(config);

    let raw_format = AudioFormat::new(SampleFormat::Dts, 48000, ChannelLayout::stereo(), BLOCK);
    let raw = engine.open_stream(raw_format, StreamFlags::default()).unwrap();
    engine.run_cycle();
    assert!(captured.last_open().unwrap().passthrough);

    engine.destroy_stream(&raw);
    engine.run_cycle();
    let open = captured.last_open().unwrap();
    assert!(!open.passthrough);
    assert_eq!(open.format.sample_format, SampleFormat::F32);
}

#[test]
fn test_mangled_passthrough_keeps_requested_mix() {
    let (factory, captured) = CaptureSinkFactory::new();
    factory.halve_raw_rate.store(true, Ordering::Relaxed);
    let mut config = test_config();
    config.dts_passthrough = true;
    let engine = Engine::new(config, Box::new(factory));

    let raw_format = AudioFormat::new(SampleFormat::Dts, 48000, ChannelLayout::stereo(), BLOCK);
    let raw = engine.open_stream(raw_format, StreamFlags::default()).unwrap();
    engine.run_cycle();

    // The factory came back at half rate, so the sink is refused while
    // the mix keeps tracking what was asked for.
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 24000);
    assert_eq!(engine.mix_format().sample_rate, 48000);

    // Producers keep flowing against the requested format.
    let burst: Vec<u8> = (0..BLOCK * 2 * 2).map(|i| i as u8).collect();
    assert_eq!(raw.write(&burst), burst.len());
}

#[test]
fn test_stream_churn_races_output_cycle() {
    let (engine, captured) = engine_with(test_config());

    let driver = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            for _ in 0..200 {
                engine.run_cycle();
            }
        })
    };
    for _ in 0..50 {
        let s = engine
            .open_stream(stereo_f32(44100), StreamFlags::default())
            .unwrap();
        s.write(&f32_bytes(&[0.1f32; BLOCK * 2]));
        engine.destroy_stream(&s);
    }
    driver.join().unwrap();

    // The engine is still serviceable after the churn.
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    stream.write(&f32_bytes(&[0.5f32; BLOCK * 2]));
    stream.drain();
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.5f32; BLOCK * 2]);
}

#[test]
fn test_audiophile_follows_newest_master_rate() {
    let mut config = test_config();
    config.quality = Quality::Audiophile;
    let (engine, captured) = engine_with(config);

    let _a = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 44100);

    let _b = engine
        .open_stream(stereo_f32(96000), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 96000);
}

#[test]
fn test_default_quality_keeps_first_master() {
    let (engine, captured) = engine_with(test_config());
    let _a = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    let opens = captured.open_count();

    let _b = engine
        .open_stream(stereo_f32(96000), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    // Same mix keeps the same sink
    assert_eq!(captured.open_count(), opens);
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 44100);
}

#[test]
fn test_resample_rate_overrides_master() {
    let mut config = test_config();
    config.resample_rate = Some(48000);
    let (engine, captured) = engine_with(config);

    let _stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 48000);
}

#[test]
fn test_wide_source_downmixed_to_configured_layout() {
    let (engine, captured) = engine_with(test_config());
    let format = AudioFormat::new(
        SampleFormat::F32,
        44100,
        ChannelLayout::standard(StandardLayout::Layout5_1),
        BLOCK,
    );
    let _stream = engine.open_stream(format, StreamFlags::default()).unwrap();
    engine.run_cycle();
    let open = captured.last_open().unwrap();
    assert_eq!(open.format.layout, ChannelLayout::stereo());
}

#[test]
fn test_sink_failure_degrades_gracefully() {
    let (factory, captured) = CaptureSinkFactory::new();
    factory.fail_open.store(true, Ordering::Relaxed);
    let engine = Engine::new(test_config(), Box::new(factory));
    let mut rx = engine.subscribe();

    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    assert!(!engine.run_cycle());
    assert_eq!(captured.open_count(), 0);

    // Writes are still accepted; producers keep running
    let bytes = f32_bytes(&[0.5f32; BLOCK * 2]);
    assert_eq!(stream.write(&bytes), bytes.len());

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, EngineEvent::SinkFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[test]
fn test_destroyed_stream_is_reclaimed() {
    let (engine, _captured) = engine_with(test_config());
    let mut rx = engine.subscribe();
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    let id = stream.id();

    engine.destroy_stream(&stream);
    engine.run_cycle();

    let mut removed = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::StreamRemoved { stream_id, .. } = event {
            assert_eq!(stream_id, id);
            removed = true;
        }
    }
    assert!(removed);
    assert_eq!(stream.write(&[0u8; 16]), 0);
}

#[test]
fn test_drained_stream_emits_event_once() {
    let (engine, _captured) = engine_with(test_config());
    let mut rx = engine.subscribe();
    let stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();

    stream.write(&f32_bytes(&[0.5f32; BLOCK * 2]));
    stream.drain();
    engine.run_cycle(); // plays the final block
    engine.run_cycle(); // observes the drained stream
    engine.run_cycle();

    let mut drained = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, EngineEvent::StreamDrained { .. }) {
            drained += 1;
        }
    }
    assert_eq!(drained, 1);
    assert!(stream.is_drained());
}

#[test]
fn test_chained_stream_resumes_when_predecessor_drains() {
    let (engine, captured) = engine_with(test_config());
    let first = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    let next = engine
        .open_stream(
            stereo_f32(44100),
            StreamFlags {
                start_paused: true,
                ..StreamFlags::default()
            },
        )
        .unwrap();
    first.set_slave(&next);
    engine.run_cycle();

    first.write(&f32_bytes(&[0.25f32; BLOCK * 2]));
    next.write(&f32_bytes(&[0.75f32; BLOCK * 2]));
    first.drain();

    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.25f32; BLOCK * 2]);
    assert!(next.is_paused());

    // The drain is observed and the chained stream joins the same cycle.
    assert!(engine.run_cycle());
    assert!(!next.is_paused());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.75f32; BLOCK * 2]);
}

#[test]
fn test_sound_overlays_silent_mix_and_expires() {
    let (engine, captured) = engine_with(test_config());
    // Open the sink without any stream data
    engine.reconfigure(test_config());

    let samples = vec![0.5f32; BLOCK * 2 + 2]; // one full block plus one frame
    let sound = engine.register_sound(softmix::Sound::from_samples(
        "chime".to_string(),
        samples,
        44100,
        2,
    ));
    engine.play_sound(&sound);

    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.5f32; BLOCK * 2]);

    assert!(engine.run_cycle());
    let second = captured.last_write_f32().unwrap();
    assert_eq!(&second[..2], &[0.5f32, 0.5]);
    assert_eq!(&second[2..], &[0.0f32; BLOCK * 2 - 2][..]);

    // Exhausted: back to silence
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.0f32; BLOCK * 2]);
}

#[test]
fn test_stop_sound_cancels_playback() {
    let (engine, captured) = engine_with(test_config());
    engine.reconfigure(test_config());

    let sound = engine.register_sound(softmix::Sound::from_samples(
        "long".to_string(),
        vec![0.5f32; BLOCK * 2 * 10],
        44100,
        2,
    ));
    engine.play_sound(&sound);
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.5f32; BLOCK * 2]);

    engine.stop_sound(&sound);
    assert!(engine.run_cycle());
    assert_eq!(captured.last_write_f32().unwrap(), vec![0.0f32; BLOCK * 2]);
}

#[test]
fn test_limiter_engages_on_hot_mix() {
    let (engine, captured) = engine_with(test_config());
    let a = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    let b = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();

    a.write(&f32_bytes(&[0.8f32; BLOCK * 2]));
    b.write(&f32_bytes(&[0.8f32; BLOCK * 2]));
    a.drain();
    b.drain();

    assert!(engine.run_cycle());
    for s in captured.last_write_f32().unwrap() {
        assert!(s > 0.9 && s <= 1.0, "limited sample out of range: {}", s);
    }
}

#[test]
fn test_reconfigure_reopens_sink() {
    let (engine, captured) = engine_with(test_config());
    let _stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    let opens = captured.open_count();

    let mut config = test_config();
    config.resample_rate = Some(48000);
    engine.reconfigure(config);
    engine.run_cycle();

    assert_eq!(captured.open_count(), opens + 1);
    assert_eq!(captured.last_open().unwrap().format.sample_rate, 48000);
}

#[test]
fn test_delay_tracks_sink() {
    let (engine, _captured) = engine_with(test_config());
    let _stream = engine
        .open_stream(stereo_f32(44100), StreamFlags::default())
        .unwrap();
    engine.run_cycle();
    assert!((engine.delay() - 0.01).abs() < 1e-9);
}
