//! Video scaling and pixel format conversion (`SwsContext`)

use crate::error::{FfmpegError, ResizeError, Result};
use crate::media::PixelFormat;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};

/// Planar 4:2:0, full range: what the reader decodes video into by default
pub const DECODE_PIXEL_FORMAT: Pixel = Pixel::YUVJ420P;
/// Planar 4:2:0, video range: what the H.264 encoder consumes
pub const ENCODE_PIXEL_FORMAT: Pixel = Pixel::YUV420P;

/// FFmpeg pixel format for a decode setting
pub fn pixel_for(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420PlanarFullRange => Pixel::YUVJ420P,
        PixelFormat::Yuv420Planar => Pixel::YUV420P,
    }
}

/// Scaler bound to one source geometry and one output geometry
pub struct VideoScaler {
    context: ScaleCtx,
    source: (Pixel, u32, u32),
    output: (Pixel, u32, u32),
}

// SAFETY: the SwsContext is owned exclusively by this value and only used
// from one thread at a time.
unsafe impl Send for VideoScaler {}

impl VideoScaler {
    pub fn new(
        source: (Pixel, u32, u32),
        output: (Pixel, u32, u32),
        flags: ScaleFlags,
    ) -> Result<Self> {
        let context = ScaleCtx::get(
            source.0, source.1, source.2, output.0, output.1, output.2, flags,
        )
        .map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::ScalerCreate(format!(
                "{:?} {}x{} -> {:?} {}x{}: {}",
                source.0, source.1, source.2, output.0, output.1, output.2, e
            )))
        })?;

        Ok(Self {
            context,
            source,
            output,
        })
    }

    /// Scaler converting frames shaped like `frame` to `output`.
    pub fn for_frame(
        frame: &ffmpeg::util::frame::Video,
        output: (Pixel, u32, u32),
        flags: ScaleFlags,
    ) -> Result<Self> {
        Self::new((frame.format(), frame.width(), frame.height()), output, flags)
    }

    /// Whether `frame` still has the geometry this scaler was built for.
    pub fn accepts(&self, frame: &ffmpeg::util::frame::Video) -> bool {
        self.source == (frame.format(), frame.width(), frame.height())
    }

    /// Convert one frame; the output carries the source's timestamp.
    pub fn run(&mut self, frame: &ffmpeg::util::frame::Video) -> Result<ffmpeg::util::frame::Video> {
        let mut out = ffmpeg::util::frame::Video::empty();
        self.context.run(frame, &mut out).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::ConvertFrame(format!("scaling: {}", e)))
        })?;
        out.set_pts(frame.pts().or(frame.timestamp()));
        out.set_kind(frame.kind());
        Ok(out)
    }

    pub fn output(&self) -> (Pixel, u32, u32) {
        self.output
    }
}

/// Reuse `slot` while it fits `frame`, rebuild it otherwise.
pub fn scaler_for<'a>(
    slot: &'a mut Option<VideoScaler>,
    frame: &ffmpeg::util::frame::Video,
    output: (Pixel, u32, u32),
    flags: ScaleFlags,
) -> Result<&'a mut VideoScaler> {
    let stale = slot.as_ref().map_or(true, |s| !s.accepts(frame));
    if stale {
        tracing::debug!(
            format = ?frame.format(),
            width = frame.width(),
            height = frame.height(),
            "creating scaler"
        );
        *slot = Some(VideoScaler::for_frame(frame, output, flags)?);
    }
    slot.as_mut().ok_or_else(|| {
        ResizeError::Ffmpeg(FfmpegError::ScalerCreate("scaler missing".into()))
    })
}
