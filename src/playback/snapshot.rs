//! Published playback status and core events

use super::command::PlaybackCommand;
use crate::audio::AudioStats;
use crate::decoder::MediaInfo;
use crate::player::PlayerState;
use crate::utils::format_seconds;
use crate::video::VideoStats;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Which video path is feeding the presenter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoBackendStatus {
    /// No media loaded
    #[default]
    Inactive,

    /// CPU decode into pooled frames
    Software,
}

/// Counters across the whole session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub video: VideoStats,
    pub audio: AudioStats,
    pub commands_dropped: u64,
    pub seeks: u64,
}

/// Consistent copy of the session state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlayerState,

    /// Position in seconds
    pub current_time: f64,

    /// Duration in seconds, 0 without media
    pub duration: f64,

    pub volume: f32,
    pub speed: f64,
    pub has_media: bool,
    pub has_audio: bool,
    pub eof: bool,
    pub backend_status: VideoBackendStatus,

    /// Name of the audio sink in use
    pub audio_sink: Option<&'static str>,

    pub stats: PlaybackStats,
}

impl fmt::Display for PlaybackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} / {} vol {:.0}% speed {:.2}x",
            self.state,
            format_seconds(self.current_time),
            format_seconds(self.duration),
            self.volume * 100.0,
            self.speed
        )?;
        if self.eof {
            f.write_str(" (end)")?;
        }
        Ok(())
    }
}

/// Notifications from the command thread
#[derive(Debug, Clone)]
pub enum CoreEvent {
    MediaOpened(MediaInfo),
    OpenFailed { path: PathBuf, message: String },
    StateChanged { from: PlayerState, to: PlayerState },
    SeekCompleted { target: f64 },
    SeekFailed { target: f64, message: String },
    EndOfMedia,

    /// Evicted from a full command queue before it ran
    CommandDropped(PlaybackCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_is_idle() {
        let snapshot = PlaybackSnapshot::default();
        assert_eq!(snapshot.state, PlayerState::Stopped);
        assert_eq!(snapshot.backend_status, VideoBackendStatus::Inactive);
        assert!(!snapshot.has_media);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = PlaybackSnapshot {
            state: PlayerState::Playing,
            current_time: 65.0,
            duration: 120.0,
            volume: 0.5,
            speed: 1.0,
            eof: true,
            ..PlaybackSnapshot::default()
        };
        assert_eq!(snapshot.to_string(), "[playing] 01:05 / 02:00 vol 50% speed 1.00x (end)");
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(PlaybackSnapshot::default()).unwrap();
        assert_eq!(json["state"], "Stopped");
        assert_eq!(json["backend_status"], "inactive");
        assert_eq!(json["stats"]["video"]["frames_queued"], 0);
    }
}
