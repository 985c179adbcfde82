use std::path::PathBuf;

use thiserror::Error;

use crate::media::MediaKind;

/// Main error type for the resizer
#[derive(Error, Debug)]
pub enum ResizeError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The locator could not resolve a logical asset name to a file
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// The asset has neither an audio nor a video track
    #[error("Asset has no audio or video track to transcode")]
    NoMediaTracks,

    /// A decode or encode settings record failed validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A track could not be attached to the reader or writer
    #[error("Failed to attach {kind} track {track_index}: {message}")]
    Attach {
        kind: MediaKind,
        track_index: usize,
        message: String,
    },

    /// The writer refuses to overwrite an existing artifact
    #[error("Output already exists: {0}")]
    OutputExists(PathBuf),

    /// Another request is currently writing to the same output path
    #[error("Output is busy with another request: {0}")]
    OutputBusy(PathBuf),

    /// The reader failed while demuxing or decoding
    #[error("Read error: {0}")]
    Read(String),

    /// A writer input rejected a sample
    #[error("Failed to append {kind} sample: {message}")]
    Append { kind: MediaKind, message: String },

    /// A channel terminated with a failure the writer did not report
    #[error("{kind} channel for track {track_index} failed")]
    ChannelFailed { kind: MediaKind, track_index: usize },

    /// The writer failed to flush or close the container
    #[error("Finalize error: {0}")]
    Finalize(String),

    /// A background worker panicked or was cancelled
    #[error("Worker error: {0}")]
    Worker(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A produced artifact could not be parsed back
    #[error("Inspect error: {0}")]
    Inspect(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure opening an input media file
    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    /// The requested decoder for a specific codec ID was not found
    #[error("Failed to find decoder: codec_id={0}")]
    DecoderNotFound(String),

    /// Failure instantiating a decoder
    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    /// The requested encoder for a specific codec ID was not found
    #[error("Failed to find encoder: codec_id={0}")]
    EncoderNotFound(String),

    /// Failure instantiating or opening an encoder
    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    /// Failure creating an audio resampler
    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    /// Failure creating a video scaler
    #[error("Failed to create scaler: {0}")]
    ScalerCreate(String),

    /// Failure creating an output format muxer
    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    /// Failure writing the container header
    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    /// Failure writing a media packet to the container
    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    /// Failure decoding a single packet into a frame
    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    /// Failure encoding a single frame into a packet
    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    /// Failure converting a frame between formats
    #[error("Failed to convert frame: {0}")]
    ConvertFrame(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResizeError>;
