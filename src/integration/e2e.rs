//! End-to-end transcodes through FFmpeg
//!
//! The source clip is synthesized with the crate's own writer, so no media
//! files are needed. Tests return early when this FFmpeg build lacks the
//! AAC or H.264 encoder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;

use crate::callback::Immediate;
use crate::factory::ChannelFactory;
use crate::ffmpeg::encoder::encoders_available;
use crate::ffmpeg::resampler::LINEAR_PCM_FORMAT;
use crate::ffmpeg::scaler::DECODE_PIXEL_FORMAT;
use crate::ffmpeg::{DecodedSample, FfmpegBackend, FfmpegOptions, FfmpegWriter};
use crate::inspect::inspect;
use crate::media::{
    Asset, AssetWriter, ContainerFormat, MediaBackend, MediaKind, SampleSink, Size, TrackFormat,
    TrackInfo,
};
use crate::pipeline::TranscodePipeline;

const SOURCE_SIZE: Size = Size::new(640, 360);
const FPS: i64 = 25;
const SAMPLE_RATE: i32 = 44_100;
const AUDIO_FRAME: usize = 1024;

fn fast_options() -> FfmpegOptions {
    FfmpegOptions {
        crf: 30,
        preset: "ultrafast".into(),
        interleave_window: Duration::from_millis(500),
    }
}

fn ready() -> bool {
    crate::ffmpeg::init().is_ok() && encoders_available()
}

fn video_frame(index: i64) -> DecodedSample {
    let mut frame = ffmpeg::util::frame::Video::new(
        DECODE_PIXEL_FORMAT,
        SOURCE_SIZE.width,
        SOURCE_SIZE.height,
    );
    let luma = (16 + index * 8 % 200) as u8;
    frame.data_mut(0).fill(luma);
    frame.data_mut(1).fill(128);
    frame.data_mut(2).fill(128);
    frame.set_pts(Some(index));
    DecodedSample::Video {
        frame,
        time_base: ffmpeg::Rational::new(1, FPS as i32),
    }
}

fn audio_frame(index: i64) -> DecodedSample {
    let mut frame = ffmpeg::util::frame::Audio::new(LINEAR_PCM_FORMAT, AUDIO_FRAME, ChannelLayout::STEREO);
    frame.set_rate(SAMPLE_RATE as u32);
    let start = index as usize * AUDIO_FRAME;
    let data = frame.data_mut(0);
    for i in 0..AUDIO_FRAME {
        let t = (start + i) as f32 / SAMPLE_RATE as f32;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        let bytes = value.to_le_bytes();
        // Interleaved: left, right
        data[i * 4..i * 4 + 2].copy_from_slice(&bytes);
        data[i * 4 + 2..i * 4 + 4].copy_from_slice(&bytes);
    }
    frame.set_pts(Some(start as i64));
    DecodedSample::Audio {
        frame,
        time_base: ffmpeg::Rational::new(1, SAMPLE_RATE),
    }
}

/// Write a one-second 640x360 H.264 + AAC clip to `path`.
fn synthesize_source(path: &Path) {
    struct Tracks(Vec<TrackInfo>);
    impl Asset for Tracks {
        fn tracks(&self) -> &[TrackInfo] {
            &self.0
        }
    }
    let source = Tracks(vec![
        TrackInfo {
            index: 0,
            codec: "pcm".into(),
            format: TrackFormat::Audio {
                sample_rate: SAMPLE_RATE as u32,
                channels: 2,
            },
        },
        TrackInfo {
            index: 1,
            codec: "raw".into(),
            format: TrackFormat::Video {
                width: SOURCE_SIZE.width,
                height: SOURCE_SIZE.height,
                frame_rate: FPS as f64,
            },
        },
    ]);
    let plans = ChannelFactory::default()
        .build_channels(&source, SOURCE_SIZE)
        .unwrap();

    let mut writer = FfmpegWriter::create(path, ContainerFormat::Mp4, &fast_options()).unwrap();
    let mut audio = writer.add_input(&plans[0]).unwrap();
    let mut video = writer.add_input(&plans[1]).unwrap();
    writer.start_writing().unwrap();
    writer.start_session(Duration::ZERO);

    let audio_frames = SAMPLE_RATE as i64 / AUDIO_FRAME as i64 + 1;
    for i in 0..FPS.max(audio_frames) {
        if i < FPS {
            assert!(video.append(video_frame(i)));
        }
        if i < audio_frames {
            assert!(audio.append(audio_frame(i)));
        }
    }
    audio.mark_as_finished();
    video.mark_as_finished();
    writer.finish_writing().unwrap();
}

#[test]
fn test_synthesized_source_is_readable() {
    if !ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    synthesize_source(&source);

    let backend = FfmpegBackend::new(fast_options()).unwrap();
    let asset = backend.open_asset(&source).unwrap();
    assert_eq!(asset.tracks().len(), 2);
    match asset.first_track(MediaKind::Video).map(|t| &t.format) {
        Some(TrackFormat::Video { width, height, .. }) => {
            assert_eq!((*width, *height), (640, 360));
        }
        other => panic!("unexpected video track: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resize_640x360_to_1080p() {
    if !ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    synthesize_source(&source);

    let backend = Arc::new(FfmpegBackend::new(fast_options()).unwrap());
    let asset = backend.open_asset(&source).unwrap();
    let pipeline = TranscodePipeline::new(
        backend,
        ChannelFactory::default(),
        tokio::runtime::Handle::current(),
    );

    let output = dir.path().join("resized.mp4");
    let (tx, rx) = tokio::sync::oneshot::channel();
    pipeline
        .run(asset, Size::new(1920, 1080), output.clone(), Immediate, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    let report = rx.await.unwrap().unwrap();

    assert_eq!(report.output, output);
    assert!(report.channels.iter().all(|c| !c.is_failure() && c.samples > 0));

    let info = inspect(&output).unwrap();
    let video = info.track(MediaKind::Video).expect("video track");
    assert_eq!(video.size(), Some(Size::new(1920, 1080)));
    assert!(video.codec.contains("264"));

    let audio = info.track(MediaKind::Audio).expect("audio track");
    assert_eq!(
        audio.format,
        TrackFormat::Audio {
            sample_rate: 44_100,
            channels: 2
        }
    );
}

#[tokio::test]
async fn test_asset_without_streams_is_refused() {
    if !ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.mp4");
    std::fs::write(&bogus, bytes::Bytes::from_static(b"\x00\x00\x00\x08free")).unwrap();

    let backend = Arc::new(FfmpegBackend::new(fast_options()).unwrap());
    // Depending on the FFmpeg version this either fails to open or opens
    // with no streams; both must keep the pipeline from starting.
    let asset = match backend.open_asset(&bogus) {
        Ok(asset) => asset,
        Err(_) => return,
    };
    let pipeline = TranscodePipeline::new(
        backend,
        ChannelFactory::default(),
        tokio::runtime::Handle::current(),
    );
    let result = pipeline.run(
        asset,
        Size::new(1920, 1080),
        dir.path().join("out.mp4"),
        Immediate,
        |_| panic!("completion must not run"),
    );
    assert!(matches!(result, Err(crate::error::ResizeError::NoMediaTracks)));
}
