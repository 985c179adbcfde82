//! Channel planning
//!
//! Picks the tracks that take part in a transcode (first audio, first video)
//! and pairs each with the decode/encode settings for its media kind.

use crate::error::{ResizeError, Result};
use crate::media::{
    Asset, AudioDecodeSettings, AudioEncodeSettings, DecodeSettings, EncodeSettings, MediaKind,
    Size, TrackInfo, VideoDecodeSettings, VideoEncodeSettings,
};

/// One selected track and the settings its channel runs with
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPlan {
    pub track: TrackInfo,
    pub decode: DecodeSettings,
    pub encode: EncodeSettings,
}

impl ChannelPlan {
    pub fn kind(&self) -> MediaKind {
        self.track.kind()
    }
}

/// Builds channel plans with fixed per-kind settings
#[derive(Debug, Clone, Default)]
pub struct ChannelFactory {
    audio_encode: AudioEncodeSettings,
    video_decode: VideoDecodeSettings,
}

impl ChannelFactory {
    pub fn new(audio_encode: AudioEncodeSettings, video_decode: VideoDecodeSettings) -> Self {
        Self {
            audio_encode,
            video_decode,
        }
    }

    /// Plan one channel for the first audio track and one for the first
    /// video track. Empty only when the asset has neither kind.
    ///
    /// The video encoder produces exactly `target_size`; callers that want
    /// to keep the aspect ratio must pass a size with that ratio.
    pub fn build_channels<A: Asset + ?Sized>(
        &self,
        asset: &A,
        target_size: Size,
    ) -> Result<Vec<ChannelPlan>> {
        let mut plans = Vec::with_capacity(2);

        if let Some(track) = asset.first_track(MediaKind::Audio) {
            plans.push(ChannelPlan {
                track: track.clone(),
                decode: DecodeSettings::Audio(AudioDecodeSettings::linear_pcm()),
                encode: EncodeSettings::Audio(self.audio_encode),
            });
        }

        if let Some(track) = asset.first_track(MediaKind::Video) {
            plans.push(ChannelPlan {
                track: track.clone(),
                decode: DecodeSettings::Video(self.video_decode),
                encode: EncodeSettings::Video(VideoEncodeSettings::h264(target_size)?),
            });
        }

        tracing::debug!(
            channels = plans.len(),
            tracks = asset.tracks().len(),
            target = %target_size,
            "planned channels"
        );

        Ok(plans)
    }

    /// Like `build_channels`, but an asset without audio or video is a
    /// precondition violation: a zero-channel pipeline could never complete.
    pub fn require_channels<A: Asset + ?Sized>(
        &self,
        asset: &A,
        target_size: Size,
    ) -> Result<Vec<ChannelPlan>> {
        let plans = self.build_channels(asset, target_size)?;
        if plans.is_empty() {
            return Err(ResizeError::NoMediaTracks);
        }
        Ok(plans)
    }
}
