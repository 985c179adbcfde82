//! Video resizer
//!
//! Transcodes the first audio and first video track of a media file into a
//! new MP4: AAC stereo audio and H.264 video at an exact target size. Each
//! track runs on its own worker; the result is delivered once, on a
//! caller-chosen callback context.
//!
//! Layers, bottom up:
//! - `media`: track model, typed settings, codec collaborator traits
//! - `transfer`: per-track sample pump and fan-in barrier
//! - `factory` / `pipeline`: channel planning and session orchestration
//! - `facade`: resize-by-name with output path management
//! - `ffmpeg`: the FFmpeg-backed implementation of the `media` traits

pub mod callback;
pub mod config;
pub mod error;
pub mod facade;
pub mod factory;
pub mod ffmpeg;
pub mod inspect;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod transfer;

#[cfg(test)]
mod integration;

pub use callback::{CallbackContext, Immediate, MainQueue, MainQueueReceiver};
pub use config::{generate_default_config, ResizerConfig};
pub use error::{FfmpegError, ResizeError, Result};
pub use facade::{AssetLocator, DirectoryLocator, OutputLocation, ResizeFacade};
pub use factory::{ChannelFactory, ChannelPlan};
pub use ffmpeg::{FfmpegBackend, FfmpegOptions};
pub use media::{MediaKind, Size};
pub use pipeline::{TranscodePipeline, TranscodeReport};
