//! Resizer configuration
//!
//! Loaded from TOML. Every section is optional and falls back to its
//! defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ResizeError, Result};
use crate::facade::OutputLocation;
use crate::factory::ChannelFactory;
use crate::ffmpeg::FfmpegOptions;
use crate::media::{
    AudioEncodeSettings, AudioFormat, ChannelLayoutTag, PixelFormat, Size, VideoDecodeSettings,
};

/// Output frame size
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Where results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Every request overwrites `path`
    Fixed,
    /// Every request writes `<directory>/<request-id>.mp4`
    PerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Output file in `fixed` mode
    pub path: PathBuf,
    /// Output directory in `per_request` mode
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            mode: OutputMode::Fixed,
            path: temp.join("video.mp4"),
            directory: temp.join("video-resizer"),
        }
    }
}

/// Where named assets are looked up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub directory: PathBuf,
    /// File extension appended to asset names
    pub extension: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("assets"),
            extension: "mp4".to_string(),
        }
    }
}

/// AAC output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Bitrate in bps
    pub bit_rate: u64,
    /// 1 (mono) or 2 (stereo)
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let aac = AudioEncodeSettings::aac_stereo();
        Self {
            sample_rate: aac.sample_rate(),
            bit_rate: aac.bit_rate(),
            channels: aac.channels(),
        }
    }
}

/// H.264 output and decode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// x264 constant rate factor (0-51, lower is better)
    pub crf: u8,
    /// x264 preset
    pub preset: String,
    /// Use frame-threaded decoding
    pub hardware_compatible: bool,
    /// Picture layout decoded frames are converted to
    pub decode_pixel_format: PixelFormat,
    /// How far (in seconds) one track may run ahead of the other when
    /// interleaving
    pub interleave_window_secs: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            crf: 20,
            preset: "medium".to_string(),
            hardware_compatible: true,
            decode_pixel_format: PixelFormat::Yuv420PlanarFullRange,
            interleave_window_secs: 1.0,
        }
    }
}

/// Resizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizerConfig {
    pub target: TargetConfig,
    pub output: OutputConfig,
    pub assets: AssetConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ResizerConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            output: OutputConfig::default(),
            assets: AssetConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ResizerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResizeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ResizeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ResizeError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn target_size(&self) -> Size {
        Size::new(self.target.width, self.target.height)
    }

    pub fn output_location(&self) -> OutputLocation {
        match self.output.mode {
            OutputMode::Fixed => OutputLocation::Fixed(self.output.path.clone()),
            OutputMode::PerRequest => OutputLocation::PerRequest {
                directory: self.output.directory.clone(),
            },
        }
    }

    pub fn audio_encode_settings(&self) -> Result<AudioEncodeSettings> {
        let layout = ChannelLayoutTag::for_channels(self.audio.channels).ok_or_else(|| {
            ResizeError::InvalidSettings(format!(
                "unsupported audio channel count {}",
                self.audio.channels
            ))
        })?;
        AudioEncodeSettings::new(
            AudioFormat::Aac,
            self.audio.sample_rate,
            self.audio.channels,
            self.audio.bit_rate,
            layout,
        )
    }

    pub fn video_decode_settings(&self) -> VideoDecodeSettings {
        VideoDecodeSettings {
            pixel_format: self.video.decode_pixel_format,
            hardware_compatible: self.video.hardware_compatible,
        }
    }

    pub fn channel_factory(&self) -> Result<ChannelFactory> {
        Ok(ChannelFactory::new(
            self.audio_encode_settings()?,
            self.video_decode_settings(),
        ))
    }

    pub fn ffmpeg_options(&self) -> Result<FfmpegOptions> {
        if self.video.crf > 51 {
            return Err(ResizeError::InvalidSettings(format!(
                "crf {} is out of range 0-51",
                self.video.crf
            )));
        }
        if !self.video.interleave_window_secs.is_finite() || self.video.interleave_window_secs <= 0.0
        {
            return Err(ResizeError::InvalidSettings(format!(
                "interleave window {} must be positive",
                self.video.interleave_window_secs
            )));
        }
        Ok(FfmpegOptions {
            crf: self.video.crf,
            preset: self.video.preset.clone(),
            interleave_window: Duration::from_secs_f64(self.video.interleave_window_secs),
        })
    }

    /// Effective log level, `info` when unset
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}

/// Write the default configuration to `path`
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ResizerConfig::default().to_file(path)
}
