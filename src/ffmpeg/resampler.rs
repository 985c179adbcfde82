//! Audio resampling and encoder framing
//!
//! - `AudioResampler` wraps FFmpeg's `SwrContext`; the reader uses it to
//!   normalize decoded audio to packed 16-bit PCM, the writer to convert
//!   that PCM to the encoder's planar float input.
//! - `AudioFifo` re-chunks planar float audio into encoder-sized frames.

use crate::error::{FfmpegError, ResizeError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type as SampleType};

/// Interleaved 16-bit PCM, the reader's linear PCM output
pub const LINEAR_PCM_FORMAT: Sample = Sample::I16(SampleType::Packed);
/// Planar float, the AAC encoder's input
pub const ENCODER_SAMPLE_FORMAT: Sample = Sample::F32(SampleType::Planar);

/// Channel layout of a frame, derived from its channel count when unset.
pub fn frame_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    if frame.channel_layout().bits() == 0 {
        layout_for_channels(frame.channels())
    } else {
        frame.channel_layout()
    }
}

pub fn layout_for_channels(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default(n as i32),
    }
}

/// Audio resampler wrapping FFmpeg's `SwrContext`
pub struct AudioResampler {
    context: resampling::Context,
    source_rate: u32,
    output_format: Sample,
    output_layout: ChannelLayout,
    output_rate: u32,
}

// SAFETY: the SwrContext is owned exclusively by this value and only used
// from one thread at a time; it holds no thread-local state.
unsafe impl Send for AudioResampler {}

impl AudioResampler {
    /// Create a resampler from the format described by `src_frame` to the
    /// given output format.
    pub fn new(
        src_frame: &ffmpeg::util::frame::Audio,
        output_format: Sample,
        output_layout: ChannelLayout,
        output_rate: u32,
    ) -> Result<Self> {
        let context = resampling::Context::get(
            src_frame.format(),
            frame_layout(src_frame),
            src_frame.rate(),
            output_format,
            output_layout,
            output_rate,
        )
        .map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::ResamplerCreate(format!(
                "{:?} {} Hz -> {:?} {} Hz: {}",
                src_frame.format(),
                src_frame.rate(),
                output_format,
                output_rate,
                e
            )))
        })?;

        Ok(Self {
            context,
            source_rate: src_frame.rate(),
            output_format,
            output_layout,
            output_rate,
        })
    }

    /// Whether `frame` still matches the input this resampler was built for.
    pub fn accepts(&self, frame: &ffmpeg::util::frame::Audio) -> bool {
        let input = self.context.input();
        input.format == frame.format()
            && input.rate == frame.rate()
            && input.channel_layout == frame_layout(frame)
    }

    /// Convert one input frame. Returns `None` when the resampler buffered
    /// everything and produced no output yet.
    pub fn convert(
        &mut self,
        frame: &ffmpeg::util::frame::Audio,
    ) -> Result<Option<ffmpeg::util::frame::Audio>> {
        // Room for the rate change plus whatever the context still buffers
        let capacity = (frame.samples() as u64 * self.output_rate as u64
            / self.source_rate.max(1) as u64) as usize
            + 256;
        let mut out =
            ffmpeg::util::frame::Audio::new(self.output_format, capacity, self.output_layout);

        self.context.run(frame, &mut out).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::ConvertFrame(format!("resampling: {}", e)))
        })?;

        if out.samples() == 0 {
            return Ok(None);
        }
        out.set_rate(self.output_rate);
        Ok(Some(out))
    }

    /// Flush samples still buffered in the context.
    ///
    /// A passthrough context has nothing buffered and reports an error on
    /// flush; that is not a failure.
    pub fn flush(&mut self) -> Option<ffmpeg::util::frame::Audio> {
        let mut out = ffmpeg::util::frame::Audio::new(self.output_format, 4096, self.output_layout);
        if let Err(e) = self.context.flush(&mut out) {
            tracing::debug!("resampler flush returned non-fatal error: {}", e);
            return None;
        }
        if out.samples() == 0 {
            return None;
        }
        out.set_rate(self.output_rate);
        Some(out)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// Planar float sample queue that hands out fixed-size encoder frames
pub struct AudioFifo {
    planes: Vec<Vec<f32>>,
    layout: ChannelLayout,
    rate: u32,
}

impl AudioFifo {
    pub fn new(channels: usize, layout: ChannelLayout, rate: u32) -> Self {
        Self {
            planes: vec![Vec::new(); channels],
            layout,
            rate,
        }
    }

    /// Samples buffered per channel
    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one planar float frame. A frame with fewer channels than the
    /// queue repeats its last plane.
    pub fn push(&mut self, frame: &ffmpeg::util::frame::Audio) {
        let n = frame.samples();
        let frame_planes = frame.planes();
        if n == 0 || frame_planes == 0 {
            return;
        }
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let data = frame.plane::<f32>(index.min(frame_planes - 1));
            plane.extend_from_slice(&data[..n.min(data.len())]);
        }
    }

    /// Push raw per-channel samples.
    pub fn push_planes(&mut self, planes: &[&[f32]]) {
        for (index, plane) in self.planes.iter_mut().enumerate() {
            if let Some(src) = planes.get(index).or_else(|| planes.last()) {
                plane.extend_from_slice(src);
            }
        }
    }

    /// Pop one frame of `n` samples with PTS `pts`. A short tail is
    /// zero-padded.
    pub fn pop_frame(&mut self, n: usize, pts: i64) -> ffmpeg::util::frame::Audio {
        let available = self.len().min(n);
        let mut frame = ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FORMAT, n, self.layout);
        frame.set_rate(self.rate);
        frame.set_pts(Some(pts));

        for (index, plane) in self.planes.iter_mut().enumerate() {
            let dst = frame.plane_mut::<f32>(index);
            dst[..available].copy_from_slice(&plane[..available]);
            dst[available..n].fill(0.0);
            plane.drain(..available);
        }

        frame
    }
}
