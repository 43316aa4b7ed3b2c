//! Channel remapping and downmix
//!
//! Builds a weighted tap matrix from a source layout to a destination
//! layout. Channels present in both layouts pass straight through; source
//! channels missing from the destination fold into the nearest surviving
//! speakers at reduced gain. When the folded gains could push a destination
//! channel past full scale the whole matrix is normalized down.

use super::types::{Channel, ChannelLayout};

const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy)]
struct Tap {
    src: usize,
    gain: f32,
}

/// Precomputed remap matrix between two channel layouts.
#[derive(Debug)]
pub struct ChannelRemap {
    taps: Vec<Vec<Tap>>,
    src_count: usize,
    dst_count: usize,
    identity: bool,
}

/// Fold targets for a source channel, in preference order. The first
/// candidate whose channels all exist in the destination wins.
fn routes(ch: Channel) -> &'static [&'static [(Channel, f32)]] {
    use Channel::*;
    match ch {
        FrontLeft => &[&[(FrontLeft, 1.0)], &[(FrontCenter, MINUS_3DB)]],
        FrontRight => &[&[(FrontRight, 1.0)], &[(FrontCenter, MINUS_3DB)]],
        FrontCenter => &[
            &[(FrontCenter, 1.0)],
            &[(FrontLeft, MINUS_3DB), (FrontRight, MINUS_3DB)],
        ],
        Lfe => &[
            &[(Lfe, 1.0)],
            &[(FrontLeft, MINUS_3DB), (FrontRight, MINUS_3DB)],
            &[(FrontCenter, MINUS_3DB)],
        ],
        BackLeft => &[
            &[(BackLeft, 1.0)],
            &[(SideLeft, 1.0)],
            &[(FrontLeft, MINUS_3DB)],
            &[(FrontCenter, 0.5)],
        ],
        BackRight => &[
            &[(BackRight, 1.0)],
            &[(SideRight, 1.0)],
            &[(FrontRight, MINUS_3DB)],
            &[(FrontCenter, 0.5)],
        ],
        SideLeft => &[
            &[(SideLeft, 1.0)],
            &[(BackLeft, 1.0)],
            &[(FrontLeft, MINUS_3DB)],
            &[(FrontCenter, 0.5)],
        ],
        SideRight => &[
            &[(SideRight, 1.0)],
            &[(BackRight, 1.0)],
            &[(FrontRight, MINUS_3DB)],
            &[(FrontCenter, 0.5)],
        ],
        BackCenter => &[
            &[(BackCenter, 1.0)],
            &[(BackLeft, MINUS_3DB), (BackRight, MINUS_3DB)],
            &[(FrontLeft, 0.5), (FrontRight, 0.5)],
            &[(FrontCenter, MINUS_3DB)],
        ],
    }
}

impl ChannelRemap {
    /// Build the matrix from `src` to `dst`.
    ///
    /// With `normalize` set, gains are scaled down uniformly so no
    /// destination channel can exceed the sum of its contributing sources
    /// at full scale.
    pub fn new(src: &ChannelLayout, dst: &ChannelLayout, normalize: bool) -> Self {
        let mut taps: Vec<Vec<Tap>> = vec![Vec::new(); dst.count()];

        for (src_idx, &src_ch) in src.channels().iter().enumerate() {
            let route = routes(src_ch)
                .iter()
                .find(|candidates| candidates.iter().all(|(ch, _)| dst.contains(*ch)));
            if let Some(candidates) = route {
                for (ch, gain) in candidates.iter() {
                    if let Some(dst_idx) = dst.position(*ch) {
                        taps[dst_idx].push(Tap {
                            src: src_idx,
                            gain: *gain,
                        });
                    }
                }
            }
            // A source channel with no viable target is dropped.
        }

        if normalize {
            let max_sum = taps
                .iter()
                .map(|t| t.iter().map(|tap| tap.gain.abs()).sum::<f32>())
                .fold(0.0f32, f32::max);
            if max_sum > 1.0 {
                let scale = 1.0 / max_sum;
                for dst_taps in &mut taps {
                    for tap in dst_taps.iter_mut() {
                        tap.gain *= scale;
                    }
                }
            }
        }

        let identity = src == dst
            && taps
                .iter()
                .enumerate()
                .all(|(i, t)| t.len() == 1 && t[0].src == i && t[0].gain == 1.0);

        Self {
            taps,
            src_count: src.count(),
            dst_count: dst.count(),
            identity,
        }
    }

    /// True when the matrix is a straight copy.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn src_count(&self) -> usize {
        self.src_count
    }

    pub fn dst_count(&self) -> usize {
        self.dst_count
    }

    /// Remap `frames` interleaved frames from `src` into `dst`.
    ///
    /// `src` must hold at least `frames * src_count` samples and `dst` at
    /// least `frames * dst_count`.
    pub fn remap(&self, src: &[f32], dst: &mut [f32], frames: usize) {
        debug_assert!(src.len() >= frames * self.src_count);
        debug_assert!(dst.len() >= frames * self.dst_count);

        if self.identity {
            dst[..frames * self.dst_count].copy_from_slice(&src[..frames * self.src_count]);
            return;
        }

        for frame in 0..frames {
            let src_base = frame * self.src_count;
            let dst_base = frame * self.dst_count;
            for (d, dst_taps) in self.taps.iter().enumerate() {
                let mut acc = 0.0f32;
                for tap in dst_taps {
                    acc += src[src_base + tap.src] * tap.gain;
                }
                dst[dst_base + d] = acc;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::StandardLayout;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_identity_passthrough() {
        let stereo = ChannelLayout::stereo();
        let remap = ChannelRemap::new(&stereo, &stereo, true);
        assert!(remap.is_identity());

        let src = [0.1, 0.2, 0.3, 0.4];
        let mut dst = [0.0f32; 4];
        remap.remap(&src, &mut dst, 2);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_mono_upmix_to_stereo() {
        let remap = ChannelRemap::new(&ChannelLayout::mono(), &ChannelLayout::stereo(), true);
        let src = [1.0f32];
        let mut dst = [0.0f32; 2];
        remap.remap(&src, &mut dst, 1);
        assert!(close(dst[0], MINUS_3DB));
        assert!(close(dst[1], MINUS_3DB));
    }

    #[test]
    fn test_stereo_downmix_to_mono_normalizes() {
        let remap = ChannelRemap::new(&ChannelLayout::stereo(), &ChannelLayout::mono(), true);
        let src = [1.0f32, 1.0];
        let mut dst = [0.0f32; 1];
        remap.remap(&src, &mut dst, 1);
        // Both channels fold at -3 dB, then normalize caps the sum at 1.0
        assert!(close(dst[0], 1.0));
    }

    #[test]
    fn test_surround_folds_into_stereo() {
        let src_layout = ChannelLayout::standard(StandardLayout::Layout5_1);
        let dst_layout = ChannelLayout::stereo();
        let remap = ChannelRemap::new(&src_layout, &dst_layout, false);

        // Only the center channel carries signal
        let src = [0.0f32, 0.0, 1.0, 0.0, 0.0, 0.0];
        let mut dst = [0.0f32; 2];
        remap.remap(&src, &mut dst, 1);
        assert!(close(dst[0], MINUS_3DB));
        assert!(close(dst[1], MINUS_3DB));

        // Rears fold left to left, right to right
        let src = [0.0f32, 0.0, 0.0, 0.0, 1.0, 0.0];
        remap.remap(&src, &mut dst, 1);
        assert!(close(dst[0], MINUS_3DB));
        assert!(close(dst[1], 0.0));
    }

    #[test]
    fn test_normalization_prevents_overdrive() {
        let src_layout = ChannelLayout::standard(StandardLayout::Layout5_1);
        let dst_layout = ChannelLayout::stereo();
        let remap = ChannelRemap::new(&src_layout, &dst_layout, true);

        // Full-scale on every source channel must stay within range
        let src = [1.0f32; 6];
        let mut dst = [0.0f32; 2];
        remap.remap(&src, &mut dst, 1);
        assert!(dst[0] <= 1.0 + 1e-6);
        assert!(dst[1] <= 1.0 + 1e-6);
    }

    #[test]
    fn test_sides_map_to_rears() {
        let src_layout = ChannelLayout::standard(StandardLayout::Layout7_1);
        let dst_layout = ChannelLayout::standard(StandardLayout::Layout5_1);
        let remap = ChannelRemap::new(&src_layout, &dst_layout, false);

        // SideLeft is index 6 in 7.1, BackLeft index 4 in 5.1
        let mut src = [0.0f32; 8];
        src[6] = 0.8;
        let mut dst = [0.0f32; 6];
        remap.remap(&src, &mut dst, 1);
        assert!(close(dst[4], 0.8));
    }
}
