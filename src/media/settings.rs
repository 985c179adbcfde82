//! Typed decode/encode settings
//!
//! One record per media kind and direction. Records that can be invalid are
//! only built through constructors that validate them.

use serde::{Deserialize, Serialize};

use crate::error::{ResizeError, Result};
use crate::media::{MediaKind, Size};

/// AAC output sample rate
pub const AAC_SAMPLE_RATE: u32 = 44_100;
/// AAC output bitrate in bps
pub const AAC_BIT_RATE: u64 = 128_000;

/// Audio sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Uncompressed interleaved PCM
    LinearPcm,
    /// MPEG-4 AAC (LC)
    Aac,
}

/// Speaker arrangement of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayoutTag {
    Mono,
    Stereo,
}

impl ChannelLayoutTag {
    pub fn channels(self) -> u16 {
        match self {
            ChannelLayoutTag::Mono => 1,
            ChannelLayoutTag::Stereo => 2,
        }
    }

    pub fn for_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(ChannelLayoutTag::Mono),
            2 => Some(ChannelLayoutTag::Stereo),
            _ => None,
        }
    }
}

/// Decoded picture layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Planar Y'CbCr 4:2:0, full (JPEG) range
    Yuv420PlanarFullRange,
    /// Planar Y'CbCr 4:2:0, video range
    Yuv420Planar,
}

/// Video codec produced by the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
}

impl ContainerFormat {
    /// Muxer short name
    pub fn muxer_name(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
        }
    }
}

/// What the reader should decode an audio track into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDecodeSettings {
    pub format: AudioFormat,
}

impl AudioDecodeSettings {
    /// Normalizes any input codec to PCM the encoder can consume.
    pub fn linear_pcm() -> Self {
        Self {
            format: AudioFormat::LinearPcm,
        }
    }
}

/// What the writer should encode an audio track into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncodeSettings {
    format: AudioFormat,
    sample_rate: u32,
    channels: u16,
    bit_rate: u64,
    layout: ChannelLayoutTag,
}

impl AudioEncodeSettings {
    pub fn new(
        format: AudioFormat,
        sample_rate: u32,
        channels: u16,
        bit_rate: u64,
        layout: ChannelLayoutTag,
    ) -> Result<Self> {
        if format != AudioFormat::Aac {
            return Err(ResizeError::InvalidSettings(format!(
                "{:?} is not an encodable audio format",
                format
            )));
        }
        if sample_rate == 0 {
            return Err(ResizeError::InvalidSettings(
                "audio sample rate must be non-zero".into(),
            ));
        }
        if bit_rate == 0 {
            return Err(ResizeError::InvalidSettings(
                "audio bit rate must be non-zero".into(),
            ));
        }
        if layout.channels() != channels {
            return Err(ResizeError::InvalidSettings(format!(
                "{} channels do not match the {:?} layout",
                channels, layout
            )));
        }
        Ok(Self {
            format,
            sample_rate,
            channels,
            bit_rate,
            layout,
        })
    }

    /// AAC, stereo, 44.1 kHz, 128 kbps.
    pub fn aac_stereo() -> Self {
        Self {
            format: AudioFormat::Aac,
            sample_rate: AAC_SAMPLE_RATE,
            channels: 2,
            bit_rate: AAC_BIT_RATE,
            layout: ChannelLayoutTag::Stereo,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bit_rate(&self) -> u64 {
        self.bit_rate
    }

    pub fn layout(&self) -> ChannelLayoutTag {
        self.layout
    }
}

impl Default for AudioEncodeSettings {
    fn default() -> Self {
        Self::aac_stereo()
    }
}

/// What the reader should decode a video track into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDecodeSettings {
    pub pixel_format: PixelFormat,
    /// Ask the decoder for its accelerated path where one exists
    pub hardware_compatible: bool,
}

impl Default for VideoDecodeSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Yuv420PlanarFullRange,
            hardware_compatible: true,
        }
    }
}

/// What the writer should encode a video track into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncodeSettings {
    codec: VideoCodec,
    size: Size,
}

impl VideoEncodeSettings {
    /// Output dimensions are taken verbatim; the aspect ratio is not preserved.
    pub fn new(codec: VideoCodec, size: Size) -> Result<Self> {
        if size.width == 0 || size.height == 0 {
            return Err(ResizeError::InvalidSettings(format!(
                "video size {} has a zero dimension",
                size
            )));
        }
        // 4:2:0 chroma needs even luma dimensions
        if size.width % 2 != 0 || size.height % 2 != 0 {
            return Err(ResizeError::InvalidSettings(format!(
                "video size {} must have even dimensions",
                size
            )));
        }
        Ok(Self { codec, size })
    }

    pub fn h264(size: Size) -> Result<Self> {
        Self::new(VideoCodec::H264, size)
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn size(&self) -> Size {
        self.size
    }
}

/// Decode settings of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeSettings {
    Audio(AudioDecodeSettings),
    Video(VideoDecodeSettings),
}

/// Encode settings of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeSettings {
    Audio(AudioEncodeSettings),
    Video(VideoEncodeSettings),
}

impl DecodeSettings {
    pub fn kind(&self) -> MediaKind {
        match self {
            DecodeSettings::Audio(_) => MediaKind::Audio,
            DecodeSettings::Video(_) => MediaKind::Video,
        }
    }
}

impl EncodeSettings {
    pub fn kind(&self) -> MediaKind {
        match self {
            EncodeSettings::Audio(_) => MediaKind::Audio,
            EncodeSettings::Video(_) => MediaKind::Video,
        }
    }
}
