//! Demuxing reader
//!
//! One demux thread reads packets in container order and routes them to a
//! per-track queue. The demuxer never blocks on a single full queue, since
//! the track behind it may be the one the writer is waiting for. It pauses
//! only while every open queue holds `MAX_QUEUED_PACKETS` or more, so memory
//! stays bounded for interleaved files. A file that stores one track far
//! ahead of the other still buffers that distance in the leading queue.
//!
//! Each `FfmpegSampleSource` owns its track's decoder and runs on its
//! channel worker:
//! - audio is normalized to packed 16-bit PCM at the source rate and layout
//! - video is converted to the configured planar 4:2:0 format at the source
//!   size

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::scaling::Flags as ScaleFlags;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;

use super::asset::FfmpegAsset;
use super::decoder::{AudioDecoder, VideoDecoder};
use super::resampler::{frame_layout, AudioResampler, LINEAR_PCM_FORMAT};
use super::scaler::{pixel_for, scaler_for, VideoScaler};
use super::utils::{is_again, ts_to_secs};
use crate::error::{FfmpegError, ResizeError, Result};
use crate::factory::ChannelPlan;
use crate::media::{AssetReader, DecodeSettings, MediaKind, SampleSource};

/// A decoded frame and the timebase of its timestamp
pub enum DecodedSample {
    Audio {
        frame: ffmpeg::util::frame::Audio,
        time_base: ffmpeg::Rational,
    },
    Video {
        frame: ffmpeg::util::frame::Video,
        time_base: ffmpeg::Rational,
    },
}

impl DecodedSample {
    pub fn kind(&self) -> MediaKind {
        match self {
            DecodedSample::Audio { .. } => MediaKind::Audio,
            DecodedSample::Video { .. } => MediaKind::Video,
        }
    }

    /// Presentation time in seconds, if the frame carries one
    pub fn pts_secs(&self) -> Option<f64> {
        match self {
            DecodedSample::Audio { frame, time_base } => {
                frame.pts().map(|pts| ts_to_secs(pts, *time_base))
            }
            DecodedSample::Video { frame, time_base } => {
                frame.pts().map(|pts| ts_to_secs(pts, *time_base))
            }
        }
    }
}

/// Queue depth at which a track stops counting as starved
const MAX_QUEUED_PACKETS: usize = 256;

/// Depth of every track queue; `None` once the source hung up
#[derive(Default)]
struct Backlog {
    depths: Mutex<Vec<Option<usize>>>,
    drained: Condvar,
}

impl Backlog {
    fn register(&self) -> usize {
        let mut depths = self.depths.lock();
        depths.push(Some(0));
        depths.len() - 1
    }

    fn push(&self, queue: usize) {
        if let Some(Some(depth)) = self.depths.lock().get_mut(queue) {
            *depth += 1;
        }
    }

    fn pop(&self, queue: usize) {
        if let Some(Some(depth)) = self.depths.lock().get_mut(queue) {
            *depth = depth.saturating_sub(1);
        }
        self.drained.notify_all();
    }

    fn close(&self, queue: usize) {
        if let Some(depth) = self.depths.lock().get_mut(queue) {
            *depth = None;
        }
        self.drained.notify_all();
    }

    /// Block while every open queue holds at least `limit` packets.
    fn wait_for_room(&self, limit: usize) {
        let mut depths = self.depths.lock();
        while depths.iter().any(Option::is_some) && depths.iter().flatten().all(|&d| d >= limit) {
            self.drained.wait(&mut depths);
        }
    }
}

/// Where the demuxer sends one stream's packets
struct Route {
    queue: usize,
    tx: mpsc::UnboundedSender<ffmpeg::Packet>,
}

type ErrorSlot = Arc<Mutex<Option<ResizeError>>>;

fn record(slot: &ErrorSlot, err: ResizeError) {
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(err);
    }
}

pub struct FfmpegReader {
    path: PathBuf,
    input: Option<ffmpeg::format::context::Input>,
    routes: HashMap<usize, Route>,
    backlog: Arc<Backlog>,
    error: ErrorSlot,
    demuxer: Option<JoinHandle<()>>,
}

impl FfmpegReader {
    pub fn open(asset: &FfmpegAsset) -> Result<Self> {
        let path = asset.path().to_path_buf();
        let input = ffmpeg::format::input(&path).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::OpenInput(format!("{}: {}", path.display(), e)))
        })?;

        Ok(Self {
            path,
            input: Some(input),
            routes: HashMap::new(),
            backlog: Arc::default(),
            error: Arc::new(Mutex::new(None)),
            demuxer: None,
        })
    }

    fn stream_kind(&self, index: usize) -> Option<MediaKind> {
        let stream = self.input.as_ref()?.stream(index)?;
        match stream.parameters().medium() {
            ffmpeg::media::Type::Audio => Some(MediaKind::Audio),
            ffmpeg::media::Type::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl AssetReader for FfmpegReader {
    type Sample = DecodedSample;
    type Output = FfmpegSampleSource;

    fn can_add_output(&self, plan: &ChannelPlan) -> bool {
        !self.routes.contains_key(&plan.track.index)
            && self.stream_kind(plan.track.index) == Some(plan.kind())
            && plan.decode.kind() == plan.kind()
    }

    fn add_output(&mut self, plan: &ChannelPlan) -> Result<FfmpegSampleSource> {
        let attach_error = |message: String| ResizeError::Attach {
            kind: plan.kind(),
            track_index: plan.track.index,
            message,
        };

        if !self.can_add_output(plan) {
            return Err(attach_error("track already attached or not decodable".into()));
        }
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| attach_error("reading already started".into()))?;
        let stream = input
            .stream(plan.track.index)
            .ok_or_else(|| attach_error("no such stream".into()))?;
        let time_base = stream.time_base();

        let decoder = match plan.decode {
            DecodeSettings::Audio(_) => TrackDecoder::Audio {
                decoder: AudioDecoder::open(&stream)?,
                resampler: None,
            },
            DecodeSettings::Video(settings) => TrackDecoder::Video {
                decoder: VideoDecoder::open(&stream, settings.hardware_compatible)?,
                scaler: None,
                format: pixel_for(settings.pixel_format),
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = self.backlog.register();
        self.routes.insert(plan.track.index, Route { queue, tx });

        tracing::debug!(
            kind = %plan.kind(),
            track = plan.track.index,
            codec = %plan.track.codec,
            "reader output attached"
        );

        Ok(FfmpegSampleSource {
            decoder,
            packets: rx,
            backlog: Arc::clone(&self.backlog),
            queue,
            time_base,
            pending: VecDeque::new(),
            draining: false,
            done: false,
            error: Arc::clone(&self.error),
        })
    }

    fn start_reading(&mut self) -> Result<()> {
        let input = self
            .input
            .take()
            .ok_or_else(|| ResizeError::Read("reading already started".into()))?;
        let routes = std::mem::take(&mut self.routes);
        let backlog = Arc::clone(&self.backlog);
        let error = Arc::clone(&self.error);
        let span = tracing::debug_span!("demux", path = %self.path.display());

        let handle = std::thread::Builder::new()
            .name("demux".into())
            .spawn(move || {
                let _entered = span.enter();
                demux(input, routes, &backlog, &error);
            })
            .map_err(|e| ResizeError::Worker(format!("spawn demux thread: {}", e)))?;

        self.demuxer = Some(handle);
        Ok(())
    }

    fn take_error(&self) -> Option<ResizeError> {
        self.error.lock().take()
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        // The thread exits once every source is gone; don't wait for it.
        if let Some(handle) = self.demuxer.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// Read packets until end of file, a read error, or every track hung up.
/// Errors are recorded before the queues close, so a source that sees its
/// queue end can rely on the error slot.
fn demux(
    mut input: ffmpeg::format::context::Input,
    mut routes: HashMap<usize, Route>,
    backlog: &Backlog,
    error: &ErrorSlot,
) {
    let mut packets = 0u64;

    while !routes.is_empty() {
        backlog.wait_for_room(MAX_QUEUED_PACKETS);

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => break,
            Err(e) if is_again(&e) => continue,
            Err(e) => {
                tracing::warn!(error = %e, packets, "demux failed");
                record(
                    error,
                    ResizeError::Read(format!("reading packet {}: {}", packets, e)),
                );
                break;
            }
        }

        let index = packet.stream();
        if let Some(route) = routes.get(&index) {
            backlog.push(route.queue);
            if route.tx.send(packet).is_err() {
                tracing::debug!(stream = index, "track hung up");
                backlog.close(route.queue);
                routes.remove(&index);
            }
        }
        packets += 1;
    }

    tracing::debug!(packets, "demux finished");
}

enum TrackDecoder {
    Audio {
        decoder: AudioDecoder,
        resampler: Option<AudioResampler>,
    },
    Video {
        decoder: VideoDecoder,
        scaler: Option<VideoScaler>,
        /// Pixel format handed to the writer
        format: ffmpeg::format::Pixel,
    },
}

/// Decoded samples of one track, pulled by its channel worker
pub struct FfmpegSampleSource {
    decoder: TrackDecoder,
    packets: mpsc::UnboundedReceiver<ffmpeg::Packet>,
    backlog: Arc<Backlog>,
    queue: usize,
    time_base: ffmpeg::Rational,
    pending: VecDeque<DecodedSample>,
    draining: bool,
    done: bool,
    error: ErrorSlot,
}

impl FfmpegSampleSource {
    /// Make progress: decode one frame, feed one packet, or finish draining.
    fn step(&mut self) -> Result<()> {
        if self.receive()? {
            return Ok(());
        }

        if self.draining {
            self.flush();
            self.done = true;
            return Ok(());
        }

        match self.packets.blocking_recv() {
            Some(packet) => {
                self.backlog.pop(self.queue);
                match &mut self.decoder {
                    TrackDecoder::Audio { decoder, .. } => decoder.send_packet(&packet),
                    TrackDecoder::Video { decoder, .. } => decoder.send_packet(&packet),
                }
            }
            None => {
                match &mut self.decoder {
                    TrackDecoder::Audio { decoder, .. } => decoder.send_eof()?,
                    TrackDecoder::Video { decoder, .. } => decoder.send_eof()?,
                }
                self.draining = true;
                Ok(())
            }
        }
    }

    /// Pull one frame out of the decoder. `false` when it has none ready.
    fn receive(&mut self) -> Result<bool> {
        let time_base = self.time_base;
        match &mut self.decoder {
            TrackDecoder::Audio { decoder, resampler } => {
                let frame = match decoder.receive_frame()? {
                    Some(frame) => frame,
                    None => return Ok(false),
                };
                if frame.samples() == 0 {
                    return Ok(true);
                }

                if resampler.as_ref().map_or(true, |r| !r.accepts(&frame)) {
                    *resampler = Some(AudioResampler::new(
                        &frame,
                        LINEAR_PCM_FORMAT,
                        frame_layout(&frame),
                        frame.rate(),
                    )?);
                }
                let pts = frame.timestamp().or(frame.pts());
                if let Some(resampler) = resampler.as_mut() {
                    if let Some(mut pcm) = resampler.convert(&frame)? {
                        pcm.set_pts(pts);
                        self.pending.push_back(DecodedSample::Audio {
                            frame: pcm,
                            time_base,
                        });
                    }
                }
                Ok(true)
            }
            TrackDecoder::Video {
                decoder,
                scaler,
                format,
            } => {
                let frame = match decoder.receive_frame()? {
                    Some(frame) => frame,
                    None => return Ok(false),
                };
                let pts = frame.timestamp().or(frame.pts());

                let mut picture = if frame.format() == *format {
                    frame
                } else {
                    let output = (*format, frame.width(), frame.height());
                    scaler_for(scaler, &frame, output, ScaleFlags::BILINEAR)?.run(&frame)?
                };
                picture.set_pts(pts);
                self.pending.push_back(DecodedSample::Video {
                    frame: picture,
                    time_base,
                });
                Ok(true)
            }
        }
    }

    /// Emit samples still buffered in the audio converter.
    fn flush(&mut self) {
        if let TrackDecoder::Audio {
            resampler: Some(resampler),
            ..
        } = &mut self.decoder
        {
            if let Some(pcm) = resampler.flush() {
                self.pending.push_back(DecodedSample::Audio {
                    frame: pcm,
                    time_base: self.time_base,
                });
            }
        }
    }
}

impl SampleSource for FfmpegSampleSource {
    type Sample = DecodedSample;

    fn copy_next_sample(&mut self) -> Option<DecodedSample> {
        loop {
            if let Some(sample) = self.pending.pop_front() {
                return Some(sample);
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.step() {
                tracing::warn!(error = %e, "decoding failed");
                record(&self.error, ResizeError::Read(e.to_string()));
                self.done = true;
            }
        }
    }
}

impl Drop for FfmpegSampleSource {
    fn drop(&mut self) {
        self.backlog.close(self.queue);
    }
}
