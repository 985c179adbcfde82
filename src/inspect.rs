//! Read back a produced MP4
//!
//! Parses the container with the `mp4` crate, independently of FFmpeg, and
//! reports what a player would see: track kinds, codecs, picture size and
//! audio sample rate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use crate::error::{ResizeError, Result};
use crate::media::{MediaKind, Size, TrackFormat};

/// One audio or video track of an artifact
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedTrack {
    pub track_id: u32,
    /// Lowercase codec name, e.g. "h264" or "aac"
    pub codec: String,
    pub format: TrackFormat,
    pub duration: Duration,
    pub sample_count: u32,
}

impl InspectedTrack {
    pub fn kind(&self) -> MediaKind {
        match self.format {
            TrackFormat::Audio { .. } => MediaKind::Audio,
            TrackFormat::Video { .. } => MediaKind::Video,
        }
    }

    pub fn size(&self) -> Option<Size> {
        match self.format {
            TrackFormat::Video { width, height, .. } => Some(Size::new(width, height)),
            TrackFormat::Audio { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    /// Ordered by track id
    pub tracks: Vec<InspectedTrack>,
    pub duration: Duration,
}

impl ArtifactInfo {
    pub fn track(&self, kind: MediaKind) -> Option<&InspectedTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

fn inspect_error(path: &Path, e: mp4::Error) -> ResizeError {
    ResizeError::Inspect(format!("{}: {}", path.display(), e))
}

/// Parse the MP4 at `path`. Tracks other than audio and video are skipped.
pub fn inspect(path: &Path) -> Result<ArtifactInfo> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mp4 = mp4::Mp4Reader::read_header(BufReader::new(file), size)
        .map_err(|e| inspect_error(path, e))?;

    let mut tracks = Vec::new();
    for track in mp4.tracks().values() {
        let track_type = match track.track_type() {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(track = track.track_id(), error = %e, "skipping track");
                continue;
            }
        };
        let codec = track
            .media_type()
            .map(|m| m.to_string().to_lowercase())
            .unwrap_or_else(|_| "unknown".to_string());

        let format = match track_type {
            mp4::TrackType::Video => TrackFormat::Video {
                width: track.width() as u32,
                height: track.height() as u32,
                frame_rate: track.frame_rate(),
            },
            mp4::TrackType::Audio => TrackFormat::Audio {
                sample_rate: track
                    .sample_freq_index()
                    .map(|f| f.freq())
                    .map_err(|e| inspect_error(path, e))?,
                channels: track
                    .channel_config()
                    .map(|c| c as u16)
                    .map_err(|e| inspect_error(path, e))?,
            },
            _ => continue,
        };

        tracks.push(InspectedTrack {
            track_id: track.track_id(),
            codec,
            format,
            duration: track.duration(),
            sample_count: track.sample_count(),
        });
    }
    tracks.sort_by_key(|t| t.track_id);

    Ok(ArtifactInfo {
        tracks,
        duration: mp4.duration(),
    })
}
