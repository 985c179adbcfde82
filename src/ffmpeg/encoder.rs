//! AAC and H.264 encoders
//!
//! Both wrap an FFmpeg codec context configured before open. Packets come
//! back in the encoder's own timebase; the writer rescales them to the
//! output stream's.

use crate::error::{FfmpegError, ResizeError, Result};
use crate::media::{AudioEncodeSettings, ChannelLayoutTag, Size};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;

use super::resampler::ENCODER_SAMPLE_FORMAT;
use super::scaler::ENCODE_PIXEL_FORMAT;
use super::utils::{
    context_codec_parameters, framerate_from_f64, is_again, VIDEO_ENCODER_TIME_BASE,
};

/// AAC encoder frame size when the codec does not report one
pub const AAC_FRAME_SIZE: usize = 1024;

pub fn channel_layout(tag: ChannelLayoutTag) -> ChannelLayout {
    match tag {
        ChannelLayoutTag::Mono => ChannelLayout::MONO,
        ChannelLayoutTag::Stereo => ChannelLayout::STEREO,
    }
}

/// AAC encoder backed by an FFmpeg codec context
pub struct AacEncoder {
    encoder: ffmpeg::encoder::Audio,
    frame_size: usize,
    layout: ChannelLayout,
    time_base: ffmpeg::Rational,
}

impl AacEncoder {
    /// Open an AAC encoder for `settings`. `global_header` is required by
    /// containers that keep codec config out of band (MP4).
    pub fn open(settings: &AudioEncodeSettings, global_header: bool) -> Result<Self> {
        let codec = codec::encoder::find(codec::Id::AAC).ok_or_else(|| {
            ResizeError::Ffmpeg(FfmpegError::EncoderNotFound(
                "AAC encoder not found in this FFmpeg build".into(),
            ))
        })?;

        let sample_rate = settings.sample_rate();
        let layout = channel_layout(settings.layout());
        let time_base = ffmpeg::Rational::new(1, sample_rate as i32);

        let mut context = codec::Context::new_with_codec(codec);
        if global_header {
            context.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "audio encoder handle: {}",
                e
            )))
        })?;

        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_format(ENCODER_SAMPLE_FORMAT);
        audio_enc.set_channel_layout(layout);
        audio_enc.set_bit_rate(settings.bit_rate() as usize);
        audio_enc.set_time_base(time_base);

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "open AAC encoder: {}",
                e
            )))
        })?;

        let frame_size = match encoder.frame_size() as usize {
            0 => AAC_FRAME_SIZE,
            n => n,
        };

        tracing::debug!(
            sample_rate,
            channels = settings.channels(),
            bit_rate = settings.bit_rate(),
            frame_size,
            "AAC encoder opened"
        );

        Ok(Self {
            encoder,
            frame_size,
            layout,
            time_base,
        })
    }

    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "AAC send_frame: {}",
                e
            )))
        })
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "AAC send_eof: {}",
                e
            )))),
        }
    }

    /// Receive one encoded packet, or `None` if the encoder needs more input.
    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "AAC receive_packet: {}",
                e
            )))),
        }
    }

    /// Samples per channel the encoder expects per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.layout
    }

    /// 1 / sample_rate
    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// Codec parameters for the muxer stream.
    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        use std::ops::Deref;
        context_codec_parameters(self.encoder.deref())
    }
}

/// x264 tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Options {
    pub crf: u8,
    pub preset: String,
}

/// H.264 encoder backed by an FFmpeg codec context
pub struct H264Encoder {
    encoder: ffmpeg::encoder::Video,
    size: Size,
}

impl H264Encoder {
    /// Open an H.264 encoder producing exactly `size` frames.
    pub fn open(
        size: Size,
        frame_rate: f64,
        options: &H264Options,
        global_header: bool,
    ) -> Result<Self> {
        let codec = codec::encoder::find(codec::Id::H264).ok_or_else(|| {
            ResizeError::Ffmpeg(FfmpegError::EncoderNotFound(
                "H.264 encoder not found in this FFmpeg build".into(),
            ))
        })?;

        let mut context = codec::Context::new_with_codec(codec);
        if global_header {
            context.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }

        let mut video_enc = context.encoder().video().map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "video encoder handle: {}",
                e
            )))
        })?;

        video_enc.set_width(size.width);
        video_enc.set_height(size.height);
        video_enc.set_format(ENCODE_PIXEL_FORMAT);
        video_enc.set_time_base(VIDEO_ENCODER_TIME_BASE);
        video_enc.set_frame_rate(Some(framerate_from_f64(frame_rate)));
        // CRF controls quality
        video_enc.set_bit_rate(0);

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("crf", &options.crf.to_string());
        opts.set("preset", &options.preset);

        let mut encoder = video_enc.open_as_with(codec, opts).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncoderCreate(format!(
                "open H.264 encoder: {}",
                e
            )))
        })?;
        // libavcodec resets the aspect ratio during open
        encoder.set_aspect_ratio(ffmpeg::Rational::new(1, 1));

        tracing::debug!(
            %size,
            frame_rate,
            crf = options.crf,
            preset = %options.preset,
            "H.264 encoder opened"
        );

        Ok(Self { encoder, size })
    }

    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Video) -> Result<()> {
        self.encoder.send_frame(frame).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "H.264 send_frame: {}",
                e
            )))
        })
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "H.264 send_eof: {}",
                e
            )))),
        }
    }

    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::EncodeFrame(format!(
                "H.264 receive_packet: {}",
                e
            )))),
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn time_base(&self) -> ffmpeg::Rational {
        VIDEO_ENCODER_TIME_BASE
    }

    pub fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        use std::ops::Deref;
        context_codec_parameters(self.encoder.deref())
    }
}

/// Check whether the FFmpeg build includes the encoders the writer needs.
pub fn encoders_available() -> bool {
    codec::encoder::find(codec::Id::AAC).is_some() && codec::encoder::find(codec::Id::H264).is_some()
}
