//! Media sources
//!
//! A [`MediaOpener`] turns a path into everything the player needs: a
//! container reader for the demuxer, one codec per selected stream and the
//! stream description. FFmpeg backs real files; the synthetic source produces
//! a deterministic test pattern with no external dependencies.

mod ffmpeg;
mod synthetic;

pub use self::ffmpeg::FfmpegOpener;
pub use synthetic::{SyntheticOpener, SyntheticSpec};

use crate::decoder::{AudioCodec, MediaInfo, PixelLayout, VideoCodec};
use crate::demux::ContainerReader;
use crate::utils::config::Config;
use crate::utils::error::Result;
use std::path::Path;

/// Options that influence how streams are opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Output layout of decoded pictures
    pub pixel_layout: PixelLayout,

    /// Video decoder threads, 0 = codec default
    pub decoder_threads: usize,

    /// Open the audio stream when present
    pub audio_enabled: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            pixel_layout: PixelLayout::Rgba,
            decoder_threads: 0,
            audio_enabled: true,
        }
    }
}

impl From<&Config> for DecodeOptions {
    fn from(config: &Config) -> Self {
        Self {
            pixel_layout: config.video.pixel_format,
            decoder_threads: config.video.decoder_threads,
            audio_enabled: config.audio.enabled,
        }
    }
}

/// Freshly opened media, not yet owned by a player
pub struct OpenedMedia {
    pub info: MediaInfo,
    pub reader: Box<dyn ContainerReader>,
    pub video: Box<VideoCodec>,
    pub audio: Option<Box<AudioCodec>>,
}

impl std::fmt::Debug for OpenedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedMedia")
            .field("info", &self.info)
            .field("has_audio", &self.audio.is_some())
            .finish()
    }
}

/// Opens media sources
///
/// # Errors
///
/// Implementations return `PlaybackError::Open` when the container or the
/// video stream cannot be opened. A missing or broken audio stream is not an
/// error; the media simply has no audio.
pub trait MediaOpener: Send + Sync {
    fn open(&self, path: &Path, options: &DecodeOptions) -> Result<OpenedMedia>;
}
