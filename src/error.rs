use std::path::PathBuf;

use async_openai::error::OpenAIError;
use ffmpeg_next as ffmpeg;
use thiserror::Error;

use crate::session::Action;

/// Errors surfaced by the narration pipeline.
///
/// Every step of a [`Session`](crate::session::Session) reports failures
/// through this type; the CLI layer wraps it in `anyhow` for display.
#[derive(Debug, Error)]
pub(crate) enum NarratorError {
    #[error("No API key provided. Pass --api-key or set OPENAI_API_KEY.")]
    MissingCredential,

    #[error("{0} is not available yet")]
    ActionUnavailable(Action),

    #[error("Unsupported container {0:?}, only .mp4 uploads are accepted")]
    UnsupportedContainer(String),

    #[error("Failed to open video at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("No video stream found in upload")]
    NoVideoStream,

    #[error("No frames could be decoded from the video")]
    NoFrames,

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid frame encoding: {0}")]
    FrameEncoding(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Invalid request: {0}")]
    Request(#[from] OpenAIError),

    #[error("Script generation failed: {0}")]
    Generation(String),

    #[error("Speech synthesis was rejected: {0}")]
    Synthesis(String),

    #[error("Operation cancelled")]
    Cancelled,
}
