//! PCM sample conversion
//!
//! Converts between wire encodings and the canonical interleaved f32
//! representation. Lookup is by format: [`to_float`] and [`from_float`]
//! return plain function pointers so the per-block hot path has no dispatch
//! beyond one indirect call.
//!
//! Encoders scale into the integer range, round to nearest with ties away
//! from zero, then clamp to the encoding's limits. Decoders scale by the
//! matching factor so a full-scale integer maps to nominal +/-1.0.

use super::types::SampleFormat;

/// Decoder: wire bytes in, f32 samples out. Returns samples written.
pub type ToFloatFn = fn(&[u8], &mut [f32]) -> usize;

/// Encoder: f32 samples in, wire bytes out. Returns bytes written.
pub type FromFloatFn = fn(&[f32], &mut [u8]) -> usize;

/// Look up the decoder for a PCM encoding.
///
/// Returns `None` for raw bitstream formats, which never enter the float
/// path.
pub fn to_float(format: SampleFormat) -> Option<ToFloatFn> {
    match format {
        SampleFormat::U8 => Some(u8_to_float),
        SampleFormat::S8 => Some(s8_to_float),
        SampleFormat::S16Le => Some(s16le_to_float),
        SampleFormat::S16Be => Some(s16be_to_float),
        SampleFormat::S24Le4 => Some(s24le4_to_float),
        SampleFormat::S24Be4 => Some(s24be4_to_float),
        SampleFormat::S24Le3 => Some(s24le3_to_float),
        SampleFormat::S24Be3 => Some(s24be3_to_float),
        SampleFormat::S32Le => Some(s32le_to_float),
        SampleFormat::S32Be => Some(s32be_to_float),
        SampleFormat::F32 => Some(f32_to_float),
        SampleFormat::F64 => Some(f64_to_float),
        _ => None,
    }
}

/// Look up the encoder for a PCM encoding.
///
/// Returns `None` for raw bitstream formats.
pub fn from_float(format: SampleFormat) -> Option<FromFloatFn> {
    match format {
        SampleFormat::U8 => Some(float_to_u8),
        SampleFormat::S8 => Some(float_to_s8),
        SampleFormat::S16Le => Some(float_to_s16le),
        SampleFormat::S16Be => Some(float_to_s16be),
        SampleFormat::S24Le4 => Some(float_to_s24le4),
        SampleFormat::S24Be4 => Some(float_to_s24be4),
        SampleFormat::S24Le3 => Some(float_to_s24le3),
        SampleFormat::S24Be3 => Some(float_to_s24be3),
        SampleFormat::S32Le => Some(float_to_s32le),
        SampleFormat::S32Be => Some(float_to_s32be),
        SampleFormat::F32 => Some(float_to_f32),
        SampleFormat::F64 => Some(float_to_f64),
        _ => None,
    }
}

/// Soft limiter applied to the final mix.
///
/// Identity up to the knee at 0.9, then a tanh taper bounded by 1.0; in
/// f32 a hot enough input saturates to exactly 1.0. Samples already
/// inside the knee pass through bit-exact.
pub fn soft_clamp(x: f32) -> f32 {
    let a = x.abs();
    if a <= 0.9 {
        x
    } else {
        let y = 0.9 + 0.1 * ((a - 0.9) / 0.1).tanh();
        y.copysign(x)
    }
}

// Round to nearest, ties away from zero, then clamp. f64::round ties away
// from zero already.
fn clamp_round(x: f64, min: f64, max: f64) -> f64 {
    let r = x.round();
    if r < min {
        min
    } else if r > max {
        max
    } else {
        r
    }
}

fn samples(data_len: usize, out_len: usize, size: usize) -> usize {
    (data_len / size).min(out_len)
}

const U8_SCALE: f64 = 127.5;
const S8_SCALE: f64 = 127.5;
const S16_SCALE: f64 = 32767.5;
const S24_SCALE: f64 = 8_388_607.5;
const S32_SCALE: f64 = 2_147_483_647.0;

fn u8_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 1);
    for (s, o) in data[..n].iter().zip(out[..n].iter_mut()) {
        *o = *s as f32 * (2.0 / 255.0) - 1.0;
    }
    n
}

fn s8_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 1);
    for (s, o) in data[..n].iter().zip(out[..n].iter_mut()) {
        *o = (*s as i8 as f64 / S8_SCALE) as f32;
    }
    n
}

fn s16le_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 2);
    for (c, o) in data.chunks_exact(2).take(n).zip(out.iter_mut()) {
        *o = (i16::from_le_bytes([c[0], c[1]]) as f64 / S16_SCALE) as f32;
    }
    n
}

fn s16be_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 2);
    for (c, o) in data.chunks_exact(2).take(n).zip(out.iter_mut()) {
        *o = (i16::from_be_bytes([c[0], c[1]]) as f64 / S16_SCALE) as f32;
    }
    n
}

// 24-bit samples are widened to i32 by shifting into the high bits and
// back down, which sign-extends for free.
#[inline]
fn widen24(hi: u8, mid: u8, lo: u8) -> i32 {
    (((hi as i32) << 24) | ((mid as i32) << 16) | ((lo as i32) << 8)) >> 8
}

fn s24le4_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 4);
    for (c, o) in data.chunks_exact(4).take(n).zip(out.iter_mut()) {
        *o = (widen24(c[2], c[1], c[0]) as f64 / S24_SCALE) as f32;
    }
    n
}

fn s24be4_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 4);
    for (c, o) in data.chunks_exact(4).take(n).zip(out.iter_mut()) {
        *o = (widen24(c[0], c[1], c[2]) as f64 / S24_SCALE) as f32;
    }
    n
}

fn s24le3_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 3);
    for (c, o) in data.chunks_exact(3).take(n).zip(out.iter_mut()) {
        *o = (widen24(c[2], c[1], c[0]) as f64 / S24_SCALE) as f32;
    }
    n
}

fn s24be3_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 3);
    for (c, o) in data.chunks_exact(3).take(n).zip(out.iter_mut()) {
        *o = (widen24(c[0], c[1], c[2]) as f64 / S24_SCALE) as f32;
    }
    n
}

fn s32le_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 4);
    for (c, o) in data.chunks_exact(4).take(n).zip(out.iter_mut()) {
        *o = (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64 / S32_SCALE) as f32;
    }
    n
}

fn s32be_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 4);
    for (c, o) in data.chunks_exact(4).take(n).zip(out.iter_mut()) {
        *o = (i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64 / S32_SCALE) as f32;
    }
    n
}

fn f32_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 4);
    for (c, o) in data.chunks_exact(4).take(n).zip(out.iter_mut()) {
        *o = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
    }
    n
}

fn f64_to_float(data: &[u8], out: &mut [f32]) -> usize {
    let n = samples(data.len(), out.len(), 8);
    for (c, o) in data.chunks_exact(8).take(n).zip(out.iter_mut()) {
        let v = f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
        *o = v.clamp(-1.0, 1.0) as f32;
    }
    n
}

fn float_to_u8(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 1);
    for (s, o) in data[..n].iter().zip(out[..n].iter_mut()) {
        *o = clamp_round((*s as f64 + 1.0) * U8_SCALE, 0.0, 255.0) as u8;
    }
    n
}

fn float_to_s8(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 1);
    for (s, o) in data[..n].iter().zip(out[..n].iter_mut()) {
        *o = clamp_round(*s as f64 * S8_SCALE, -128.0, 127.0) as i8 as u8;
    }
    n
}

fn float_to_s16le(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 2);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(2).take(n)) {
        let v = clamp_round(*s as f64 * S16_SCALE, -32768.0, 32767.0) as i16;
        c.copy_from_slice(&v.to_le_bytes());
    }
    n * 2
}

fn float_to_s16be(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 2);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(2).take(n)) {
        let v = clamp_round(*s as f64 * S16_SCALE, -32768.0, 32767.0) as i16;
        c.copy_from_slice(&v.to_be_bytes());
    }
    n * 2
}

fn quantize24(s: f32) -> i32 {
    clamp_round(s as f64 * S24_SCALE, -8_388_608.0, 8_388_607.0) as i32
}

fn float_to_s24le4(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 4);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(4).take(n)) {
        let b = quantize24(*s).to_le_bytes();
        c.copy_from_slice(&[b[0], b[1], b[2], 0]);
    }
    n * 4
}

fn float_to_s24be4(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 4);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(4).take(n)) {
        let b = quantize24(*s).to_be_bytes();
        c.copy_from_slice(&[b[1], b[2], b[3], 0]);
    }
    n * 4
}

fn float_to_s24le3(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 3);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(3).take(n)) {
        let b = quantize24(*s).to_le_bytes();
        c.copy_from_slice(&[b[0], b[1], b[2]]);
    }
    n * 3
}

fn float_to_s24be3(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 3);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(3).take(n)) {
        let b = quantize24(*s).to_be_bytes();
        c.copy_from_slice(&[b[1], b[2], b[3]]);
    }
    n * 3
}

fn float_to_s32le(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 4);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(4).take(n)) {
        let v = clamp_round(
            *s as f64 * S32_SCALE,
            i32::MIN as f64,
            i32::MAX as f64,
        ) as i32;
        c.copy_from_slice(&v.to_le_bytes());
    }
    n * 4
}

fn float_to_s32be(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 4);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(4).take(n)) {
        let v = clamp_round(
            *s as f64 * S32_SCALE,
            i32::MIN as f64,
            i32::MAX as f64,
        ) as i32;
        c.copy_from_slice(&v.to_be_bytes());
    }
    n * 4
}

fn float_to_f32(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 4);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(4).take(n)) {
        c.copy_from_slice(&s.to_ne_bytes());
    }
    n * 4
}

fn float_to_f64(data: &[f32], out: &mut [u8]) -> usize {
    let n = samples(out.len(), data.len(), 8);
    for (s, c) in data.iter().zip(out.chunks_exact_mut(8).take(n)) {
        c.copy_from_slice(&(*s as f64).to_ne_bytes());
    }
    n * 8
}
