//! FFmpeg backend
//!
//! Implements the `media` traits on top of ffmpeg-next:
//! - `FfmpegAsset` probes a file's audio and video streams
//! - `FfmpegReader` demuxes on its own thread and decodes per track
//! - `FfmpegWriter` encodes to AAC/H.264 and muxes into one container
//!
//! Call `init()` (or `FfmpegBackend::new`) before anything else here.

pub mod asset;
pub mod decoder;
pub mod encoder;
pub mod reader;
pub mod resampler;
pub mod scaler;
pub mod utils;
pub mod writer;

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

pub use asset::FfmpegAsset;
pub use ffmpeg_next as ffmpeg;
pub use reader::{DecodedSample, FfmpegReader, FfmpegSampleSource};
pub use writer::{FfmpegSampleSink, FfmpegWriter};

use crate::error::{FfmpegError, Result};
use crate::media::{ContainerFormat, MediaBackend};
use encoder::H264Options;

/// Initialize the FFmpeg library.
///
/// Safe to call more than once.
pub fn init() -> std::result::Result<(), FfmpegError> {
    ffmpeg::init()
        .map_err(|e| FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e)))?;

    tracing::debug!("FFmpeg initialized");

    Ok(())
}

static LOG_FILTER: Once = Once::new();

/// Route FFmpeg's own log output through a filter that drops known-benign
/// messages. Installed once per process.
pub fn install_log_filter() {
    LOG_FILTER.call_once(|| {
        // SAFETY: both calls modify global FFmpeg state; `call_once` makes
        // sure they run exactly once.
        unsafe {
            ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
            ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
        }
    });
}

/// Expected while re-encoding arbitrary sources into MP4
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
    "Application provided invalid, non monotonically increasing dts",
    "deprecated pixel format used, make sure you did set range correctly",
    "Estimating duration from bitrate",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();

    if SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s)) {
        return;
    }

    let msg = msg.trim_end();
    if level <= ffmpeg::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    }
}

/// Encoder tuning and writer pacing
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegOptions {
    /// x264 constant rate factor, 0..=51
    pub crf: u8,
    /// x264 preset name
    pub preset: String,
    /// How far (in source time) one track may run ahead of the others
    pub interleave_window: Duration,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            crf: 20,
            preset: "medium".to_string(),
            interleave_window: Duration::from_secs(1),
        }
    }
}

impl FfmpegOptions {
    pub fn h264(&self) -> H264Options {
        H264Options {
            crf: self.crf,
            preset: self.preset.clone(),
        }
    }
}

/// `MediaBackend` backed by the system FFmpeg libraries
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    options: FfmpegOptions,
}

impl FfmpegBackend {
    /// Initializes FFmpeg and installs the log filter.
    pub fn new(options: FfmpegOptions) -> Result<Self> {
        init()?;
        install_log_filter();
        Ok(Self { options })
    }

    pub fn options(&self) -> &FfmpegOptions {
        &self.options
    }
}

impl MediaBackend for FfmpegBackend {
    type Sample = DecodedSample;
    type Asset = FfmpegAsset;
    type Reader = FfmpegReader;
    type Writer = FfmpegWriter;

    fn open_asset(&self, path: &Path) -> Result<FfmpegAsset> {
        FfmpegAsset::open(path)
    }

    fn create_reader(&self, asset: &FfmpegAsset) -> Result<FfmpegReader> {
        FfmpegReader::open(asset)
    }

    fn create_writer(&self, output: &Path, container: ContainerFormat) -> Result<FfmpegWriter> {
        FfmpegWriter::create(output, container, &self.options)
    }
}
