//! Source probing
//!
//! Opens a container once to list its audio and video streams. The asset
//! keeps only metadata; each reader opens its own demuxer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next as ffmpeg;

use super::utils::{
    codec_params_channels, codec_params_height, codec_params_sample_rate, codec_params_width,
    framerate_to_f64,
};
use crate::error::{FfmpegError, ResizeError, Result};
use crate::media::{Asset, TrackFormat, TrackInfo};

#[derive(Debug, Clone)]
pub struct FfmpegAsset {
    path: PathBuf,
    tracks: Vec<TrackInfo>,
    duration: Option<Duration>,
}

impl FfmpegAsset {
    pub fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg::format::input(&path).map_err(|e| {
            ResizeError::Ffmpeg(FfmpegError::OpenInput(format!("{}: {}", path.display(), e)))
        })?;

        let mut tracks = Vec::new();
        for stream in input.streams() {
            let params = stream.parameters();
            let codec = params.id().name().to_string();

            match params.medium() {
                ffmpeg::media::Type::Audio => tracks.push(TrackInfo {
                    index: stream.index(),
                    codec,
                    format: TrackFormat::Audio {
                        sample_rate: codec_params_sample_rate(&params),
                        channels: codec_params_channels(&params),
                    },
                }),
                ffmpeg::media::Type::Video => {
                    // Cover art is stored as a one-frame video stream
                    if stream
                        .disposition()
                        .contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC)
                    {
                        continue;
                    }
                    tracks.push(TrackInfo {
                        index: stream.index(),
                        codec,
                        format: TrackFormat::Video {
                            width: codec_params_width(&params),
                            height: codec_params_height(&params),
                            frame_rate: framerate_to_f64(stream.avg_frame_rate()),
                        },
                    });
                }
                _ => {}
            }
        }

        let duration = match input.duration() {
            d if d > 0 => Some(Duration::from_micros(d as u64)),
            _ => None,
        };

        tracing::debug!(
            path = %path.display(),
            tracks = tracks.len(),
            duration_ms = duration.map(|d| d.as_millis() as u64),
            "asset opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            tracks,
            duration,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container duration, when the demuxer knows it
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl Asset for FfmpegAsset {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }
}
