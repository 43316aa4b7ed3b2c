//! Engine configuration
//!
//! Settings that shape sink negotiation and mixing behavior. Loadable from
//! a TOML file; every field has a sensible default so an empty file (or no
//! file at all) yields a working stereo engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::types::StandardLayout;
use crate::error::{Error, Result};

/// How aggressively the engine follows the master stream's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Keep the sink open across master changes where possible
    Default,
    /// Reopen the sink to match each new master stream exactly
    Audiophile,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Default
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device for PCM playback, empty for the system default
    pub device: String,

    /// Output device for raw bitstream passthrough, empty to reuse `device`
    pub passthrough_device: String,

    /// Configured speaker arrangement; wider sources are downmixed to this
    pub layout: StandardLayout,

    /// Allow AC3 bitstreams through untouched
    pub ac3_passthrough: bool,

    /// Allow E-AC3 bitstreams through untouched
    pub eac3_passthrough: bool,

    /// Allow DTS bitstreams through untouched
    pub dts_passthrough: bool,

    /// Allow TrueHD and DTS-HD bitstreams through untouched
    pub hd_passthrough: bool,

    /// Force all PCM output to this rate instead of following the master
    pub resample_rate: Option<u32>,

    /// Master format tracking policy
    pub quality: Quality,

    /// Request exclusive device access where the backend supports it
    pub exclusive: bool,

    /// Master volume, 0.0 to 1.0
    pub volume: f32,

    /// Frames per output block
    pub block_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            passthrough_device: String::new(),
            layout: StandardLayout::Stereo,
            ac3_passthrough: false,
            eac3_passthrough: false,
            dts_passthrough: false,
            hd_passthrough: false,
            resample_rate: None,
            quality: Quality::Default,
            exclusive: false,
            volume: 1.0,
            block_frames: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.volume = config.volume.clamp(0.0, 1.0);
        Ok(config)
    }

    /// Device to use for raw passthrough output.
    pub fn passthrough_device(&self) -> &str {
        if self.passthrough_device.is_empty() {
            &self.device
        } else {
            &self.passthrough_device
        }
    }

    /// Whether a raw bitstream format is cleared for passthrough.
    pub fn passthrough_enabled(&self, format: crate::audio::types::SampleFormat) -> bool {
        use crate::audio::types::SampleFormat::*;
        match format {
            Ac3 => self.ac3_passthrough,
            Eac3 => self.eac3_passthrough,
            Dts => self.dts_passthrough,
            DtsHd | TrueHd => self.hd_passthrough,
            _ => false,
        }
    }
}
