//! Core audio data types
//!
//! Defines sample encodings, channel layouts, and the format descriptor used
//! throughout the pipeline. The canonical in-engine representation is
//! interleaved f32 in the nominal range -1.0 to 1.0; everything else is a
//! wire encoding handled at the edges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample encodings understood by the conversion layer.
///
/// PCM variants name their width, container size, and byte order. The
/// `S24*4` variants carry 24 significant bits in a 32-bit container; the
/// `S24*3` variants are tightly packed 3-byte samples. `F32` and `F64` are
/// native byte order.
///
/// The raw variants (`Ac3` and friends) are compressed bitstreams carried
/// opaquely for passthrough. They are framed as 16-bit pairs on the wire
/// and never touch the float path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S8,
    S16Le,
    S16Be,
    /// 24-bit in a 4-byte little-endian container
    S24Le4,
    /// 24-bit in a 4-byte big-endian container
    S24Be4,
    /// 24-bit packed little-endian
    S24Le3,
    /// 24-bit packed big-endian
    S24Be3,
    S32Le,
    S32Be,
    F32,
    F64,
    Ac3,
    Eac3,
    Dts,
    DtsHd,
    TrueHd,
}

impl SampleFormat {
    /// Native-endian 16-bit signed PCM.
    pub const fn s16ne() -> Self {
        #[cfg(target_endian = "little")]
        {
            SampleFormat::S16Le
        }
        #[cfg(target_endian = "big")]
        {
            SampleFormat::S16Be
        }
    }

    /// Native-endian 32-bit signed PCM.
    pub const fn s32ne() -> Self {
        #[cfg(target_endian = "little")]
        {
            SampleFormat::S32Le
        }
        #[cfg(target_endian = "big")]
        {
            SampleFormat::S32Be
        }
    }

    /// Native-endian 24-in-32 PCM.
    pub const fn s24ne4() -> Self {
        #[cfg(target_endian = "little")]
        {
            SampleFormat::S24Le4
        }
        #[cfg(target_endian = "big")]
        {
            SampleFormat::S24Be4
        }
    }

    /// Container size of one sample in bytes.
    ///
    /// Raw bitstream formats are framed as 16-bit words.
    pub const fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S24Le3 | SampleFormat::S24Be3 => 3,
            SampleFormat::S24Le4
            | SampleFormat::S24Be4
            | SampleFormat::S32Le
            | SampleFormat::S32Be
            | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
            SampleFormat::Ac3
            | SampleFormat::Eac3
            | SampleFormat::Dts
            | SampleFormat::DtsHd
            | SampleFormat::TrueHd => 2,
        }
    }

    /// Significant bits of one sample.
    pub const fn bits(self) -> usize {
        match self {
            SampleFormat::S24Le4
            | SampleFormat::S24Be4
            | SampleFormat::S24Le3
            | SampleFormat::S24Be3 => 24,
            other => other.bytes() * 8,
        }
    }

    /// True for compressed bitstream formats that bypass the float path.
    pub const fn is_raw(self) -> bool {
        matches!(
            self,
            SampleFormat::Ac3
                | SampleFormat::Eac3
                | SampleFormat::Dts
                | SampleFormat::DtsHd
                | SampleFormat::TrueHd
        )
    }

    /// True for the high-bandwidth bitstream formats that require a
    /// 192 kHz transport.
    pub const fn is_hd_raw(self) -> bool {
        matches!(
            self,
            SampleFormat::Eac3 | SampleFormat::DtsHd | SampleFormat::TrueHd
        )
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::U8 => "U8",
            SampleFormat::S8 => "S8",
            SampleFormat::S16Le => "S16LE",
            SampleFormat::S16Be => "S16BE",
            SampleFormat::S24Le4 => "S24LE4",
            SampleFormat::S24Be4 => "S24BE4",
            SampleFormat::S24Le3 => "S24LE3",
            SampleFormat::S24Be3 => "S24BE3",
            SampleFormat::S32Le => "S32LE",
            SampleFormat::S32Be => "S32BE",
            SampleFormat::F32 => "FLOAT",
            SampleFormat::F64 => "DOUBLE",
            SampleFormat::Ac3 => "AC3",
            SampleFormat::Eac3 => "EAC3",
            SampleFormat::Dts => "DTS",
            SampleFormat::DtsHd => "DTSHD",
            SampleFormat::TrueHd => "TRUEHD",
        };
        f.write_str(name)
    }
}

/// Speaker positions, in standard interleave order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
    BackCenter,
}

impl Channel {
    const ORDER: [Channel; 9] = [
        Channel::FrontLeft,
        Channel::FrontRight,
        Channel::FrontCenter,
        Channel::Lfe,
        Channel::BackLeft,
        Channel::BackRight,
        Channel::SideLeft,
        Channel::SideRight,
        Channel::BackCenter,
    ];

    fn short_name(self) -> &'static str {
        match self {
            Channel::FrontLeft => "FL",
            Channel::FrontRight => "FR",
            Channel::FrontCenter => "FC",
            Channel::Lfe => "LFE",
            Channel::BackLeft => "BL",
            Channel::BackRight => "BR",
            Channel::SideLeft => "SL",
            Channel::SideRight => "SR",
            Channel::BackCenter => "BC",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Named speaker arrangements selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandardLayout {
    #[serde(rename = "1.0")]
    Mono,
    #[serde(rename = "2.0")]
    Stereo,
    #[serde(rename = "2.1")]
    Layout2_1,
    #[serde(rename = "3.0")]
    Layout3_0,
    #[serde(rename = "3.1")]
    Layout3_1,
    #[serde(rename = "4.0")]
    Layout4_0,
    #[serde(rename = "4.1")]
    Layout4_1,
    #[serde(rename = "5.0")]
    Layout5_0,
    #[serde(rename = "5.1")]
    Layout5_1,
    #[serde(rename = "7.0")]
    Layout7_0,
    #[serde(rename = "7.1")]
    Layout7_1,
}

impl Default for StandardLayout {
    fn default() -> Self {
        StandardLayout::Stereo
    }
}

/// An ordered set of speaker positions.
///
/// Order matters: it defines the interleave order of samples within a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    channels: Vec<Channel>,
}

impl ChannelLayout {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn mono() -> Self {
        Self::new(vec![Channel::FrontCenter])
    }

    pub fn stereo() -> Self {
        Self::new(vec![Channel::FrontLeft, Channel::FrontRight])
    }

    /// Build the layout for a named standard arrangement.
    pub fn standard(layout: StandardLayout) -> Self {
        use Channel::*;
        let channels = match layout {
            StandardLayout::Mono => vec![FrontCenter],
            StandardLayout::Stereo => vec![FrontLeft, FrontRight],
            StandardLayout::Layout2_1 => vec![FrontLeft, FrontRight, Lfe],
            StandardLayout::Layout3_0 => vec![FrontLeft, FrontRight, FrontCenter],
            StandardLayout::Layout3_1 => vec![FrontLeft, FrontRight, FrontCenter, Lfe],
            StandardLayout::Layout4_0 => vec![FrontLeft, FrontRight, BackLeft, BackRight],
            StandardLayout::Layout4_1 => vec![FrontLeft, FrontRight, Lfe, BackLeft, BackRight],
            StandardLayout::Layout5_0 => {
                vec![FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight]
            }
            StandardLayout::Layout5_1 => {
                vec![FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight]
            }
            StandardLayout::Layout7_0 => vec![
                FrontLeft, FrontRight, FrontCenter, BackLeft, BackRight, SideLeft, SideRight,
            ],
            StandardLayout::Layout7_1 => vec![
                FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight, SideLeft, SideRight,
            ],
        };
        Self { channels }
    }

    /// Best-effort layout for a bare channel count, used when a device
    /// reports a count but no positions.
    pub fn default_for_count(count: usize) -> Self {
        match count {
            1 => Self::mono(),
            2 => Self::stereo(),
            3 => Self::standard(StandardLayout::Layout2_1),
            4 => Self::standard(StandardLayout::Layout4_0),
            5 => Self::standard(StandardLayout::Layout5_0),
            6 => Self::standard(StandardLayout::Layout5_1),
            7 => Self::standard(StandardLayout::Layout7_0),
            8 => Self::standard(StandardLayout::Layout7_1),
            n => {
                // Unknown arrangement, take the first n positions in
                // standard order.
                Self::new(Channel::ORDER.iter().copied().take(n.max(1)).collect())
            }
        }
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn contains(&self, ch: Channel) -> bool {
        self.channels.contains(&ch)
    }

    /// Index of a channel within a frame, if present.
    pub fn position(&self, ch: Channel) -> Option<usize> {
        self.channels.iter().position(|&c| c == ch)
    }

    /// Restrict this layout to channels present in the given standard
    /// arrangement, preserving this layout's interleave order.
    ///
    /// A source wider than the configured speaker set is trimmed here so
    /// downmix happens in the remap stage rather than at the device.
    pub fn resolve(&self, limit: StandardLayout) -> ChannelLayout {
        let allowed = ChannelLayout::standard(limit);
        let kept: Vec<Channel> = self
            .channels
            .iter()
            .copied()
            .filter(|&c| allowed.contains(c))
            .collect();
        if kept.is_empty() {
            allowed
        } else {
            Self::new(kept)
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ch in &self.channels {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}", ch)?;
            first = false;
        }
        Ok(())
    }
}

/// Full description of an audio stream or device format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    /// Sample encoding on the wire
    pub sample_format: SampleFormat,

    /// Frames per second
    pub sample_rate: u32,

    /// Speaker positions and interleave order
    pub layout: ChannelLayout,

    /// Frames per processing block
    pub frames: usize,
}

impl AudioFormat {
    pub fn new(
        sample_format: SampleFormat,
        sample_rate: u32,
        layout: ChannelLayout,
        frames: usize,
    ) -> Self {
        Self {
            sample_format,
            sample_rate,
            layout,
            frames,
        }
    }

    /// Bytes in one frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes() * self.layout.count()
    }

    /// Samples in one processing block.
    pub fn block_samples(&self) -> usize {
        self.frames * self.layout.count()
    }

    /// Bytes in one processing block.
    pub fn block_bytes(&self) -> usize {
        self.frames * self.frame_bytes()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @{}Hz [{}] x{}",
            self.sample_format, self.sample_rate, self.layout, self.frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_sizes() {
        assert_eq!(SampleFormat::U8.bytes(), 1);
        assert_eq!(SampleFormat::S16Le.bytes(), 2);
        assert_eq!(SampleFormat::S24Le3.bytes(), 3);
        assert_eq!(SampleFormat::S24Le4.bytes(), 4);
        assert_eq!(SampleFormat::S32Be.bytes(), 4);
        assert_eq!(SampleFormat::F64.bytes(), 8);
        assert_eq!(SampleFormat::Ac3.bytes(), 2);
    }

    #[test]
    fn test_raw_classification() {
        assert!(SampleFormat::Ac3.is_raw());
        assert!(SampleFormat::TrueHd.is_raw());
        assert!(!SampleFormat::S16Le.is_raw());
        assert!(SampleFormat::TrueHd.is_hd_raw());
        assert!(!SampleFormat::Ac3.is_hd_raw());
    }

    #[test]
    fn test_native_selectors() {
        #[cfg(target_endian = "little")]
        {
            assert_eq!(SampleFormat::s16ne(), SampleFormat::S16Le);
            assert_eq!(SampleFormat::s32ne(), SampleFormat::S32Le);
        }
    }

    #[test]
    fn test_layout_positions() {
        let layout = ChannelLayout::standard(StandardLayout::Layout5_1);
        assert_eq!(layout.count(), 6);
        assert_eq!(layout.position(Channel::FrontCenter), Some(2));
        assert_eq!(layout.position(Channel::SideLeft), None);
        assert!(layout.contains(Channel::Lfe));
    }

    #[test]
    fn test_layout_resolve_trims_to_speaker_set() {
        let source = ChannelLayout::standard(StandardLayout::Layout5_1);
        let resolved = source.resolve(StandardLayout::Stereo);
        assert_eq!(resolved, ChannelLayout::stereo());
    }

    #[test]
    fn test_layout_resolve_keeps_narrow_source() {
        let source = ChannelLayout::stereo();
        let resolved = source.resolve(StandardLayout::Layout7_1);
        assert_eq!(resolved, ChannelLayout::stereo());
    }

    #[test]
    fn test_format_arithmetic() {
        let fmt = AudioFormat::new(SampleFormat::S16Le, 48000, ChannelLayout::stereo(), 1024);
        assert_eq!(fmt.frame_bytes(), 4);
        assert_eq!(fmt.block_samples(), 2048);
        assert_eq!(fmt.block_bytes(), 4096);
    }

    #[test]
    fn test_layout_display() {
        let layout = ChannelLayout::standard(StandardLayout::Layout3_1);
        assert_eq!(layout.to_string(), "FL,FR,FC,LFE");
    }
}
