//! Encoding writer
//!
//! Every attached track gets its own encoder, owned by its
//! `FfmpegSampleSink` and driven from that track's channel worker. Encoding
//! happens outside any lock; only muxing goes through the shared output
//! context.
//!
//! Interleaving: a track is ready for more while its position (source time
//! of the last appended sample) is within `interleave_window` of the slowest
//! unfinished track. A track that runs ahead parks on a condvar until the
//! others catch up or finish.
//!
//! Failures: an encoder failure only ends its own track; the error is kept
//! and returned by `finish_writing`. A failed write to the shared muxer
//! closes every input.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling::Flags as ScaleFlags;
use parking_lot::{Condvar, Mutex};

use super::encoder::{AacEncoder, H264Encoder};
use super::reader::DecodedSample;
use super::resampler::{AudioFifo, AudioResampler, ENCODER_SAMPLE_FORMAT};
use super::scaler::{scaler_for, VideoScaler, ENCODE_PIXEL_FORMAT};
use super::utils::{frame_set_square_pixels, rescale_ts, stream_reset_codec_tag};
use super::FfmpegOptions;
use crate::error::{FfmpegError, ResizeError, Result};
use crate::factory::ChannelPlan;
use crate::media::{
    AssetWriter, ContainerFormat, EncodeSettings, MediaKind, Readiness, SampleSink, TrackFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Writing,
    Finished,
    Failed,
}

#[derive(Debug)]
struct Slot {
    kind: MediaKind,
    /// Source time of the last appended sample, in seconds
    position: f64,
    finished: bool,
}

struct WriterState {
    output: Option<ffmpeg::format::context::Output>,
    phase: Phase,
    slots: Vec<Slot>,
    /// Output stream timebases, known once the header is written
    time_bases: Vec<ffmpeg::Rational>,
    error: Option<ResizeError>,
    session_start: f64,
}

impl WriterState {
    fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Finished | Phase::Failed)
    }

    fn is_ready(&self, slot: usize, window: f64) -> bool {
        if self.phase != Phase::Writing {
            return false;
        }
        let slowest = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, s)| *i != slot && !s.finished)
            .map(|(_, s)| s.position)
            .fold(f64::INFINITY, f64::min);
        self.slots[slot].position <= slowest + window
    }

    /// Keep the first error without closing the other inputs.
    fn record(&mut self, err: ResizeError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn fail(&mut self, err: ResizeError) {
        self.record(err);
        self.phase = Phase::Failed;
    }

    /// Mux encoded packets of stream `slot`, given in `encoder_tb`.
    fn write_packets(
        &mut self,
        slot: usize,
        encoder_tb: ffmpeg::Rational,
        packets: Vec<ffmpeg::Packet>,
    ) -> std::result::Result<(), FfmpegError> {
        let stream_tb = self.time_bases[slot];
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| FfmpegError::WritePacket("output already closed".into()))?;
        for mut packet in packets {
            packet.set_stream(slot);
            packet.rescale_ts(encoder_tb, stream_tb);
            packet
                .write_interleaved(output)
                .map_err(|e| FfmpegError::WritePacket(format!("stream {}: {}", slot, e)))?;
        }
        Ok(())
    }
}

struct WriterShared {
    state: Mutex<WriterState>,
    ready: Condvar,
    window: f64,
}

pub struct FfmpegWriter {
    path: PathBuf,
    shared: Arc<WriterShared>,
    global_header: bool,
    options: FfmpegOptions,
}

impl FfmpegWriter {
    /// Create the output container. Never overwrites: an existing file at
    /// `output` is an error.
    pub fn create(output: &Path, container: ContainerFormat, options: &FfmpegOptions) -> Result<Self> {
        if output.exists() {
            return Err(ResizeError::OutputExists(output.to_path_buf()));
        }

        let octx = ffmpeg::format::output_as(&output, container.muxer_name()).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::MuxerCreate(format!(
                "{} ({}): {}",
                output.display(),
                container.muxer_name(),
                e
            )))
        })?;
        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        tracing::debug!(path = %output.display(), container = container.muxer_name(), "writer created");

        Ok(Self {
            path: output.to_path_buf(),
            shared: Arc::new(WriterShared {
                state: Mutex::new(WriterState {
                    output: Some(octx),
                    phase: Phase::Configuring,
                    slots: Vec::new(),
                    time_bases: Vec::new(),
                    error: None,
                    session_start: 0.0,
                }),
                ready: Condvar::new(),
                window: options.interleave_window.as_secs_f64(),
            }),
            global_header,
            options: options.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn attach_error(plan: &ChannelPlan, message: impl Into<String>) -> ResizeError {
    ResizeError::Attach {
        kind: plan.kind(),
        track_index: plan.track.index,
        message: message.into(),
    }
}

impl AssetWriter for FfmpegWriter {
    type Sample = DecodedSample;
    type Input = FfmpegSampleSink;

    fn can_add_input(&self, plan: &ChannelPlan) -> bool {
        let state = self.shared.state.lock();
        state.phase == Phase::Configuring
            && plan.encode.kind() == plan.kind()
            && !state.slots.iter().any(|s| s.kind == plan.kind())
    }

    fn add_input(&mut self, plan: &ChannelPlan) -> Result<FfmpegSampleSink> {
        if !self.can_add_input(plan) {
            return Err(attach_error(plan, "writer cannot accept this track"));
        }

        let (encoder, params, codec_id) = match plan.encode {
            EncodeSettings::Audio(settings) => {
                let encoder = AacEncoder::open(&settings, self.global_header)?;
                let params = encoder.codec_parameters();
                let fifo = AudioFifo::new(
                    settings.channels() as usize,
                    encoder.channel_layout(),
                    settings.sample_rate(),
                );
                let sink = SinkEncoder::Audio {
                    encoder,
                    resampler: None,
                    fifo,
                    next_pts: None,
                };
                (sink, params, ffmpeg::codec::Id::AAC)
            }
            EncodeSettings::Video(settings) => {
                let frame_rate = match plan.track.format {
                    TrackFormat::Video { frame_rate, .. } => frame_rate,
                    TrackFormat::Audio { .. } => 0.0,
                };
                let encoder = H264Encoder::open(
                    settings.size(),
                    frame_rate,
                    &self.options.h264(),
                    self.global_header,
                )?;
                let params = encoder.codec_parameters();
                let sink = SinkEncoder::Video {
                    encoder,
                    scaler: None,
                    last_pts: None,
                };
                (sink, params, ffmpeg::codec::Id::H264)
            }
        };

        let mut state = self.shared.state.lock();
        let octx = state
            .output
            .as_mut()
            .ok_or_else(|| attach_error(plan, "output already closed"))?;
        let mut stream = octx
            .add_stream(ffmpeg::encoder::find(codec_id))
            .map_err(|e| attach_error(plan, format!("add stream: {}", e)))?;
        stream.set_parameters(params);
        stream_reset_codec_tag(&mut stream);
        stream.set_time_base(encoder.time_base());
        let slot = stream.index();

        state.slots.push(Slot {
            kind: plan.kind(),
            position: 0.0,
            finished: false,
        });

        tracing::debug!(
            kind = %plan.kind(),
            track = plan.track.index,
            stream = slot,
            "writer input attached"
        );

        Ok(FfmpegSampleSink {
            shared: Arc::clone(&self.shared),
            slot,
            kind: plan.kind(),
            encoder,
            finished: false,
        })
    }

    fn start_writing(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.phase != Phase::Configuring {
            return Err(ResizeError::Ffmpeg(FfmpegError::WriteHeader(
                "writing already started".into(),
            )));
        }
        if state.slots.is_empty() {
            return Err(ResizeError::NoMediaTracks);
        }

        let octx = state.output.as_mut().ok_or_else(|| {
            ResizeError::Ffmpeg(FfmpegError::WriteHeader("output already closed".into()))
        })?;
        octx.write_header().map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::WriteHeader(format!(
                "{}: {}",
                self.path.display(),
                e
            )))
        })?;
        // The muxer may have changed the timebases while writing the header
        let time_bases: Vec<_> = octx.streams().map(|s| s.time_base()).collect();

        state.time_bases = time_bases;
        state.phase = Phase::Writing;
        self.shared.ready.notify_all();
        Ok(())
    }

    fn start_session(&mut self, at_source_time: Duration) {
        self.shared.state.lock().session_start = at_source_time.as_secs_f64();
    }

    fn take_error(&self) -> Option<ResizeError> {
        self.shared.state.lock().error.take()
    }

    fn finish_writing(self) -> Result<()> {
        let mut state = self.shared.state.lock();

        if let Some(err) = state.error.take() {
            state.phase = Phase::Failed;
            self.shared.ready.notify_all();
            return Err(err);
        }
        if state.phase != Phase::Writing {
            return Err(ResizeError::Finalize(format!(
                "writer is not writing ({:?})",
                state.phase
            )));
        }

        let result = match state.output.as_mut() {
            Some(octx) => octx
                .write_trailer()
                .map_err(|e| ResizeError::Finalize(format!("{}: {}", self.path.display(), e))),
            None => Err(ResizeError::Finalize("output already closed".into())),
        };
        // Dropping the context closes the file
        state.output = None;
        state.phase = if result.is_ok() {
            Phase::Finished
        } else {
            Phase::Failed
        };
        self.shared.ready.notify_all();

        if result.is_ok() {
            tracing::debug!(path = %self.path.display(), "container finalized");
        }
        result
    }
}

enum SinkEncoder {
    Audio {
        encoder: AacEncoder,
        resampler: Option<AudioResampler>,
        fifo: AudioFifo,
        /// Next frame PTS in samples, seeded from the first frame
        next_pts: Option<i64>,
    },
    Video {
        encoder: H264Encoder,
        scaler: Option<VideoScaler>,
        last_pts: Option<i64>,
    },
}

impl SinkEncoder {
    fn time_base(&self) -> ffmpeg::Rational {
        match self {
            SinkEncoder::Audio { encoder, .. } => encoder.time_base(),
            SinkEncoder::Video { encoder, .. } => encoder.time_base(),
        }
    }

    /// Encode one sample. Returns the packets ready for muxing.
    fn encode(&mut self, sample: DecodedSample) -> Result<Vec<ffmpeg::Packet>> {
        let mut packets = Vec::new();
        match (self, sample) {
            (
                SinkEncoder::Audio {
                    encoder,
                    resampler,
                    fifo,
                    next_pts,
                },
                DecodedSample::Audio { frame, time_base },
            ) => {
                if resampler.as_ref().map_or(true, |r| !r.accepts(&frame)) {
                    *resampler = Some(AudioResampler::new(
                        &frame,
                        ENCODER_SAMPLE_FORMAT,
                        encoder.channel_layout(),
                        encoder.time_base().denominator() as u32,
                    )?);
                }
                if let Some(converted) = resampler.as_mut().and_then(|r| r.convert(&frame).transpose()) {
                    fifo.push(&converted?);
                }

                let mut pts = next_pts.unwrap_or_else(|| {
                    frame
                        .pts()
                        .map_or(0, |pts| rescale_ts(pts, time_base, encoder.time_base()).max(0))
                });
                let frame_size = encoder.frame_size();
                while fifo.len() >= frame_size {
                    let chunk = fifo.pop_frame(frame_size, pts);
                    pts += frame_size as i64;
                    encoder.send_frame(&chunk)?;
                    while let Some(packet) = encoder.receive_packet()? {
                        packets.push(packet);
                    }
                }
                *next_pts = Some(pts);
            }
            (
                SinkEncoder::Video {
                    encoder,
                    scaler,
                    last_pts,
                },
                DecodedSample::Video { frame, time_base },
            ) => {
                let size = encoder.size();
                let target = (ENCODE_PIXEL_FORMAT, size.width, size.height);
                let mut picture = scaler_for(scaler, &frame, target, ScaleFlags::BICUBIC)?.run(&frame)?;

                // Encoder timestamps must strictly increase
                let mut pts = frame
                    .pts()
                    .map(|pts| rescale_ts(pts, time_base, encoder.time_base()))
                    .unwrap_or_else(|| last_pts.map_or(0, |p| p + 1));
                if let Some(last) = *last_pts {
                    if pts <= last {
                        pts = last + 1;
                    }
                }
                *last_pts = Some(pts);

                picture.set_pts(Some(pts));
                picture.set_kind(ffmpeg::util::picture::Type::None);
                frame_set_square_pixels(&mut picture);
                encoder.send_frame(&picture)?;
                while let Some(packet) = encoder.receive_packet()? {
                    packets.push(packet);
                }
            }
            (_, sample) => {
                return Err(ResizeError::InvalidSettings(format!(
                    "{} sample sent to the wrong encoder",
                    sample.kind()
                )));
            }
        }
        Ok(packets)
    }

    /// Drain everything the converter and encoder still hold.
    fn flush(&mut self) -> Result<Vec<ffmpeg::Packet>> {
        let mut packets = Vec::new();
        match self {
            SinkEncoder::Audio {
                encoder,
                resampler,
                fifo,
                next_pts,
            } => {
                if let Some(tail) = resampler.as_mut().and_then(|r| r.flush()) {
                    fifo.push(&tail);
                }
                let frame_size = encoder.frame_size();
                let mut pts = next_pts.unwrap_or(0);
                while !fifo.is_empty() {
                    let chunk = fifo.pop_frame(frame_size, pts);
                    pts += frame_size as i64;
                    encoder.send_frame(&chunk)?;
                    while let Some(packet) = encoder.receive_packet()? {
                        packets.push(packet);
                    }
                }
                *next_pts = Some(pts);
                encoder.send_eof()?;
                while let Some(packet) = encoder.receive_packet()? {
                    packets.push(packet);
                }
            }
            SinkEncoder::Video { encoder, .. } => {
                encoder.send_eof()?;
                while let Some(packet) = encoder.receive_packet()? {
                    packets.push(packet);
                }
            }
        }
        Ok(packets)
    }
}

/// Writer input of one track
pub struct FfmpegSampleSink {
    shared: Arc<WriterShared>,
    slot: usize,
    kind: MediaKind,
    encoder: SinkEncoder,
    finished: bool,
}

impl FfmpegSampleSink {
    /// End this input after an encoder failure. The other inputs keep
    /// writing; the error surfaces from `finish_writing`.
    fn abandon(&mut self, err: ResizeError) {
        self.finished = true;
        let mut state = self.shared.state.lock();
        state.record(err);
        state.slots[self.slot].finished = true;
        self.shared.ready.notify_all();
    }
}

impl Drop for FfmpegSampleSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Release the interleave gate so no sibling waits on this track
        let mut state = self.shared.state.lock();
        if let Some(slot) = state.slots.get_mut(self.slot) {
            slot.finished = true;
        }
        self.shared.ready.notify_all();
        tracing::debug!(kind = %self.kind, "writer input dropped before finishing");
    }
}

impl SampleSink for FfmpegSampleSink {
    type Sample = DecodedSample;

    fn is_ready_for_more(&self) -> bool {
        let state = self.shared.state.lock();
        !self.finished && state.is_ready(self.slot, self.shared.window)
    }

    fn wait_for_readiness(&self) -> Readiness {
        let mut state = self.shared.state.lock();
        loop {
            if self.finished || state.is_closed() {
                return Readiness::Closed;
            }
            if state.is_ready(self.slot, self.shared.window) {
                return Readiness::Ready;
            }
            self.shared.ready.wait(&mut state);
        }
    }

    fn append(&mut self, sample: DecodedSample) -> bool {
        if self.finished || self.shared.state.lock().is_closed() {
            return false;
        }

        let position = sample.pts_secs();
        let session_start = self.shared.state.lock().session_start;
        if matches!(position, Some(p) if p < session_start) {
            return true;
        }

        let packets = match self.encoder.encode(sample) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "encoding failed");
                self.abandon(ResizeError::Append {
                    kind: self.kind,
                    message: e.to_string(),
                });
                return false;
            }
        };

        let mut state = self.shared.state.lock();
        if state.phase != Phase::Writing {
            return false;
        }
        if let Err(e) = state.write_packets(self.slot, self.encoder.time_base(), packets) {
            tracing::warn!(kind = %self.kind, error = %e, "muxing failed");
            state.fail(ResizeError::Append {
                kind: self.kind,
                message: e.to_string(),
            });
            self.shared.ready.notify_all();
            return false;
        }
        if let Some(position) = position {
            let slot = &mut state.slots[self.slot];
            slot.position = slot.position.max(position);
        }
        self.shared.ready.notify_all();
        true
    }

    fn mark_as_finished(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let writing = self.shared.state.lock().phase == Phase::Writing;
        let mut failure = None;
        if writing {
            match self.encoder.flush() {
                Ok(packets) => {
                    let mut state = self.shared.state.lock();
                    if let Err(e) = state.write_packets(self.slot, self.encoder.time_base(), packets)
                    {
                        tracing::warn!(kind = %self.kind, error = %e, "muxing failed");
                        state.fail(ResizeError::Append {
                            kind: self.kind,
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = %self.kind, error = %e, "flushing encoder failed");
                    failure = Some(ResizeError::Append {
                        kind: self.kind,
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut state = self.shared.state.lock();
        if let Some(err) = failure {
            state.record(err);
        }
        state.slots[self.slot].finished = true;
        self.shared.ready.notify_all();
        tracing::debug!(kind = %self.kind, "writer input finished");
    }
}
