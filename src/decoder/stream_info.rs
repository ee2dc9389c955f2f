//! Media stream information
//!
//! Describes what was opened: the container, the selected video stream and
//! the optional audio stream, in the units the rest of the crate works with.

use super::{AudioFormat, PixelLayout};
use serde::Serialize;
use std::fmt;

/// Selected video stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStreamInfo {
    /// Container stream index
    pub index: usize,

    /// Codec name
    pub codec: String,

    pub width: u32,
    pub height: u32,

    /// Average frame rate
    pub fps: f64,

    /// Layout of decoded pictures
    pub layout: PixelLayout,
}

/// Selected audio stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioStreamInfo {
    /// Container stream index
    pub index: usize,

    /// Codec name
    pub codec: String,

    /// Output format after resampling
    pub format: AudioFormat,
}

/// Everything known about an opened media source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    /// Path or URL the media was opened from
    pub source: String,

    /// Container format name
    pub container: String,

    /// Duration in seconds, 0 when unknown
    pub duration: f64,

    pub video: VideoStreamInfo,

    pub audio: Option<AudioStreamInfo>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.audio.as_ref().map(|a| a.format)
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} | video {} {}x{} @ {:.2} fps",
            self.source,
            self.container,
            crate::utils::format_seconds(self.duration),
            self.video.codec,
            self.video.width,
            self.video.height,
            self.video.fps,
        )?;

        match &self.audio {
            Some(audio) => write!(
                f,
                " | audio {} {} Hz {} ch",
                audio.codec, audio.format.sample_rate, audio.format.channels
            ),
            None => write!(f, " | no audio"),
        }
    }
}
