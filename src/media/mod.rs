//! Media model and codec collaborator interfaces
//!
//! The pipeline never talks to a codec library directly. It drives the
//! traits defined here:
//! - `Asset` exposes the tracks of a decodable source
//! - `AssetReader` hands out one `SampleSource` per attached track
//! - `AssetWriter` hands out one `SampleSink` per attached track
//! - `MediaBackend` ties a compatible asset/reader/writer triple together
//!
//! `crate::ffmpeg` implements them on top of FFmpeg.

pub mod settings;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResizeError, Result};
use crate::factory::ChannelPlan;

pub use settings::{
    AudioDecodeSettings, AudioEncodeSettings, AudioFormat, ChannelLayoutTag, ContainerFormat,
    DecodeSettings, EncodeSettings, PixelFormat, VideoCodec, VideoDecodeSettings,
    VideoEncodeSettings,
};

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Pixel dimensions of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Format metadata of a source track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackFormat {
    Audio { sample_rate: u32, channels: u16 },
    Video { width: u32, height: u32, frame_rate: f64 },
}

/// One audio or video stream within an asset
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Position of the track in the asset's stream list
    pub index: usize,
    /// Short codec name as reported by the container (e.g. "h264", "aac")
    pub codec: String,
    pub format: TrackFormat,
}

impl TrackInfo {
    pub fn kind(&self) -> MediaKind {
        match self.format {
            TrackFormat::Audio { .. } => MediaKind::Audio,
            TrackFormat::Video { .. } => MediaKind::Video,
        }
    }
}

/// A decodable media source. Read-only for the pipeline.
pub trait Asset: Send + Sync + 'static {
    /// All audio and video tracks, in container order.
    fn tracks(&self) -> &[TrackInfo];

    /// The first track of `kind`, if any.
    fn first_track(&self, kind: MediaKind) -> Option<&TrackInfo> {
        self.tracks().iter().find(|t| t.kind() == kind)
    }
}

/// Result of waiting for a writer input to accept more data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The input can accept at least one more sample
    Ready,
    /// The input will never accept data again (writer failed or closed)
    Closed,
}

/// Reader side of one track: yields decoded samples in decode order.
pub trait SampleSource: Send + 'static {
    type Sample: Send + 'static;

    /// Pull the next decoded sample.
    ///
    /// `None` means the track is exhausted or the reader failed; a failure
    /// is reported through `AssetReader::take_error`.
    fn copy_next_sample(&mut self) -> Option<Self::Sample>;
}

/// Writer side of one track: accepts decoded samples and encodes them.
pub trait SampleSink: Send + 'static {
    type Sample: Send + 'static;

    fn is_ready_for_more(&self) -> bool;

    /// Block the calling worker until the input is ready for more data or
    /// can no longer accept any.
    fn wait_for_readiness(&self) -> Readiness;

    /// Append one sample. `false` means the sample was rejected and the
    /// input is unusable.
    fn append(&mut self, sample: Self::Sample) -> bool;

    /// Signal that no more samples will be appended.
    fn mark_as_finished(&mut self);
}

/// Demux/decode side of a pipeline session.
pub trait AssetReader: Send + 'static {
    type Sample: Send + 'static;
    type Output: SampleSource<Sample = Self::Sample>;

    /// `false` if the track of `plan` is already attached or unsupported.
    fn can_add_output(&self, plan: &ChannelPlan) -> bool;

    fn add_output(&mut self, plan: &ChannelPlan) -> Result<Self::Output>;

    fn start_reading(&mut self) -> Result<()>;

    /// Take the reader-level error, if the reader failed.
    fn take_error(&self) -> Option<ResizeError>;
}

/// Encode/mux side of a pipeline session.
pub trait AssetWriter: Send + 'static {
    type Sample: Send + 'static;
    type Input: SampleSink<Sample = Self::Sample>;

    /// `false` if the track of `plan` is already attached or writing began.
    fn can_add_input(&self, plan: &ChannelPlan) -> bool;

    fn add_input(&mut self, plan: &ChannelPlan) -> Result<Self::Input>;

    fn start_writing(&mut self) -> Result<()>;

    /// Open the writing session; samples before `at_source_time` are dropped.
    fn start_session(&mut self, at_source_time: Duration);

    /// Take the writer-level error, if the writer failed.
    fn take_error(&self) -> Option<ResizeError>;

    /// Flush and close the container. Blocking.
    fn finish_writing(self) -> Result<()>;
}

/// A codec library able to open assets and build matching readers/writers.
pub trait MediaBackend: Send + Sync + 'static {
    type Sample: Send + 'static;
    type Asset: Asset;
    type Reader: AssetReader<Sample = Self::Sample>;
    type Writer: AssetWriter<Sample = Self::Sample>;

    fn open_asset(&self, path: &Path) -> Result<Self::Asset>;

    fn create_reader(&self, asset: &Self::Asset) -> Result<Self::Reader>;

    fn create_writer(&self, output: &Path, container: ContainerFormat) -> Result<Self::Writer>;
}
