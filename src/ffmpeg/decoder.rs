//! Audio and video decoders
//!
//! Wrap an FFmpeg `AVCodecContext` built from a source stream's own codec
//! parameters, so no external configuration is needed.

use crate::error::{FfmpegError, ResizeError, Result};
use ffmpeg_next as ffmpeg;

use super::utils::is_again;

/// Audio decoder backed by an FFmpeg codec context
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
}

impl AudioDecoder {
    /// Open a decoder for the given stream.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                ResizeError::Ffmpeg(FfmpegError::DecoderCreate(format!(
                    "codec context for stream {}: {}",
                    stream_index, e
                )))
            })?;

        let decoder = context.decoder().audio().map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::DecoderNotFound(format!(
                "audio decoder for stream {}: {}",
                stream_index, e
            )))
        })?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    /// Send a compressed packet to the decoder.
    ///
    /// `AVERROR_INVALIDDATA` is not fatal: the packet is skipped.
    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "send_packet: skipping invalid packet"
                );
                Ok(())
            }
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "send_packet error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    /// Send EOF to flush the decoder's internal buffers.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) if is_again(&e) => Ok(()),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "send_eof error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    /// Receive one decoded PCM frame, or `None` if the decoder needs more
    /// input or is drained.
    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "receive_frame error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}

/// Video decoder backed by an FFmpeg codec context
pub struct VideoDecoder {
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
}

impl VideoDecoder {
    /// Open a decoder for the given stream. `frame_threads` enables
    /// frame-level threading where the codec supports it.
    pub fn open(stream: &ffmpeg::format::stream::Stream, frame_threads: bool) -> Result<Self> {
        let stream_index = stream.index();
        let mut context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                ResizeError::Ffmpeg(FfmpegError::DecoderCreate(format!(
                    "codec context for stream {}: {}",
                    stream_index, e
                )))
            })?;

        if frame_threads {
            context.set_threading(ffmpeg::codec::threading::Config::kind(
                ffmpeg::codec::threading::Type::Frame,
            ));
        }

        let decoder = context.decoder().video().map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::DecoderNotFound(format!(
                "video decoder for stream {}: {}",
                stream_index, e
            )))
        })?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "send_packet: skipping invalid packet"
                );
                Ok(())
            }
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "send_packet error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) if is_again(&e) => Ok(()),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "send_eof error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Video>> {
        let mut frame = ffmpeg::util::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(ResizeError::Ffmpeg(FfmpegError::DecodePacket(format!(
                "receive_frame error on stream {}: {}",
                self.stream_index, e
            )))),
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }
}
