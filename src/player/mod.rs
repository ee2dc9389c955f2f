//! Player for ccsync
//!
//! The player aggregates the demuxer and both stream decoders, owns the
//! playback state machine and the pending seek, and exposes the decode-one-
//! unit and apply-seek operations the pipelines and the command thread use.
//!
//! Lock order: the video decoder, then the audio decoder, then status. The
//! media slot is only held long enough to clone its `Arc`.

mod state;

pub use state::{PlayerState, SeekRequest};

use crate::decoder::{AudioChunk, AudioFormat, Decoded, MediaInfo, Picture, StreamDecoder};
use crate::demux::{Demuxer, StreamKind};
use crate::source::{DecodeOptions, MediaOpener};
use crate::utils::error::{PlaybackError, Result};
use crate::utils::clamp;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Volume range
pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 1.0;

/// Speed range
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 2.0;

/// Demuxer, decoders and stream description of the open media
pub struct LoadedMedia {
    demuxer: Demuxer,
    video: Mutex<StreamDecoder<Picture>>,
    audio: Option<Mutex<StreamDecoder<AudioChunk>>>,
    info: MediaInfo,
}

impl LoadedMedia {
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }
}

#[derive(Debug)]
struct PlayerStatus {
    state: PlayerState,
    current_time: f64,
    eof: bool,
    seek: SeekRequest,
    volume: f32,
    speed: f64,
}

/// Playback state machine over the loaded media
pub struct Player {
    media: RwLock<Option<Arc<LoadedMedia>>>,
    status: Mutex<PlayerStatus>,
    changed: Condvar,

    /// Bumped under both decode locks by every successful seek
    seek_generation: AtomicU64,
}

impl Player {
    pub fn new(volume: f32, speed: f64) -> Self {
        Self {
            media: RwLock::new(None),
            status: Mutex::new(PlayerStatus {
                state: PlayerState::Stopped,
                current_time: 0.0,
                eof: false,
                seek: SeekRequest::default(),
                volume: clamp(volume, MIN_VOLUME, MAX_VOLUME),
                speed: clamp(speed, MIN_SPEED, MAX_SPEED),
            }),
            changed: Condvar::new(),
            seek_generation: AtomicU64::new(0),
        }
    }

    /// Open media, replacing whatever was loaded
    ///
    /// # Arguments
    ///
    /// * `opener` - Source that turns the path into a reader and codecs
    /// * `path` - Media path
    /// * `options` - Decode options
    /// * `queue_capacity` - Packet queue capacity per stream
    ///
    /// # Returns
    ///
    /// The stream description, or `PlaybackError::Open` with nothing loaded
    pub fn open(
        &self,
        opener: &dyn MediaOpener,
        path: &Path,
        options: &DecodeOptions,
        queue_capacity: usize,
    ) -> Result<MediaInfo> {
        self.close();

        let opened = opener.open(path, options)?;
        let info = opened.info.clone();
        if info.video.width == 0 || info.video.height == 0 {
            return Err(PlaybackError::Open(format!(
                "invalid video size {}x{}",
                info.video.width, info.video.height
            )));
        }

        let demuxer = Demuxer::open(opened.reader, queue_capacity);
        let video = StreamDecoder::new(opened.video, StreamKind::Video);
        let audio = opened.audio
            .filter(|_| demuxer.has_audio())
            .map(|codec| Mutex::new(StreamDecoder::new(codec, StreamKind::Audio)));

        demuxer.start().map_err(|e| PlaybackError::Open(format!("demuxer: {}", e)))?;

        *self.media.write() = Some(Arc::new(LoadedMedia {
            demuxer,
            video: Mutex::new(video),
            audio,
            info: info.clone(),
        }));

        {
            let mut status = self.status.lock();
            status.state = PlayerState::Stopped;
            status.current_time = 0.0;
            status.eof = false;
            status.seek.clear();
        }
        self.changed.notify_all();

        info!("Loaded {}", info.source);
        Ok(info)
    }

    /// Unload the media, if any; the state ends `Stopped`
    pub fn close(&self) {
        let media = self.media.write().take();
        if let Some(media) = media {
            media.demuxer.abort();
            debug!("Closing {}", media.info.source);
        }

        {
            let mut status = self.status.lock();
            status.state = PlayerState::Stopped;
            status.current_time = 0.0;
            status.eof = false;
            status.seek.clear();
        }
        self.changed.notify_all();
    }

    fn loaded(&self) -> Option<Arc<LoadedMedia>> {
        self.media.read().clone()
    }

    /// Media is loaded with a usable video stream
    pub fn has_media(&self) -> bool {
        self.media.read()
            .as_ref()
            .map_or(false, |m| m.info.video.width > 0 && m.info.video.height > 0)
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.loaded().map(|m| m.info.clone())
    }

    pub fn has_audio(&self) -> bool {
        self.loaded().map_or(false, |m| m.audio.is_some())
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.loaded()
            .filter(|m| m.audio.is_some())
            .and_then(|m| m.info.audio_format())
    }

    /// Move to `to` through the transition table
    ///
    /// # Errors
    ///
    /// `NoMedia` when leaving for anything but `Stopped` without media,
    /// `InvalidTransition` when the table forbids the move. State is
    /// unchanged on error.
    pub fn set_state(&self, to: PlayerState) -> Result<PlayerState> {
        let has_media = self.has_media();
        let mut status = self.status.lock();
        let from = status.state;

        if to != PlayerState::Stopped && !has_media {
            return Err(PlaybackError::NoMedia);
        }
        if !from.can_transition_to(to) {
            return Err(PlaybackError::InvalidTransition { from, to });
        }

        status.state = to;
        match to {
            PlayerState::Stopped => {
                status.current_time = 0.0;
                status.seek.clear();
            }
            PlayerState::Playing => status.eof = false,
            PlayerState::Paused | PlayerState::Buffering => {}
        }
        drop(status);

        if from != to {
            debug!("Player {} -> {}", from, to);
        }
        self.changed.notify_all();
        Ok(from)
    }

    /// `Playing` goes to `Paused`, anything else to `Playing`
    pub fn toggle_play_pause(&self) -> Result<PlayerState> {
        let target = if self.state().is_playing() {
            PlayerState::Paused
        } else {
            PlayerState::Playing
        };
        self.set_state(target)?;
        Ok(target)
    }

    pub fn state(&self) -> PlayerState {
        self.status.lock().state
    }

    pub fn current_time(&self) -> f64 {
        self.status.lock().current_time
    }

    pub fn set_current_time(&self, time: f64) {
        if time.is_finite() {
            self.status.lock().current_time = time.max(0.0);
        }
    }

    /// Duration in seconds, 0 without media
    pub fn duration(&self) -> f64 {
        self.loaded().map_or(0.0, |m| m.info.duration)
    }

    pub fn is_eof(&self) -> bool {
        self.status.lock().eof
    }

    pub fn set_eof(&self, eof: bool) {
        self.status.lock().eof = eof;
        self.changed.notify_all();
    }

    pub fn volume(&self) -> f32 {
        self.status.lock().volume
    }

    /// Clamp and store the volume, returning the effective value
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp(volume, MIN_VOLUME, MAX_VOLUME);
        self.status.lock().volume = volume;
        volume
    }

    pub fn speed(&self) -> f64 {
        self.status.lock().speed
    }

    /// Clamp and store the speed, returning the effective value
    pub fn set_speed(&self, speed: f64) -> f64 {
        let speed = clamp(speed, MIN_SPEED, MAX_SPEED);
        self.status.lock().speed = speed;
        speed
    }

    /// Mark a seek as pending, clamped to `[0, duration]`
    pub fn request_seek(&self, target: f64) -> Result<f64> {
        let media = self.loaded().ok_or(PlaybackError::NoMedia)?;
        let upper = if media.info.duration > 0.0 { media.info.duration } else { f64::MAX };
        let target = clamp(target, 0.0, upper);

        self.status.lock().seek.set(target);
        Ok(target)
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.status.lock().seek.target()
    }

    /// Apply the pending seek under both decode locks
    ///
    /// On success both decoders are flushed and repositioned, `current_time`
    /// moves to the target, the seek generation advances and `on_success`
    /// runs while the decode locks are still held. On failure only the
    /// pending seek is cleared.
    pub fn apply_seek(&self, on_success: impl FnOnce(f64)) -> Result<f64> {
        let target = self.pending_seek()
            .ok_or_else(|| PlaybackError::InvalidInput("no seek pending".to_string()))?;

        let Some(media) = self.loaded() else {
            self.status.lock().seek.clear();
            return Err(PlaybackError::NoMedia);
        };

        // unblock decode threads waiting on packets so they drop their locks
        media.demuxer.abort();

        let mut video = media.video.lock();
        let mut audio = media.audio.as_ref().map(|a| a.lock());

        if let Err(e) = media.demuxer.seek(target) {
            self.status.lock().seek.clear();
            drop(audio);
            drop(video);
            self.changed.notify_all();
            warn!("Seek to {:.3}s failed: {}", target, e);
            return Err(e);
        }

        video.flush();
        video.set_pts(target);
        video.set_seek_floor(Some(target));
        if let Some(audio) = audio.as_mut() {
            audio.flush();
            audio.set_pts(target);
            audio.set_seek_floor(Some(target));
        }

        {
            let mut status = self.status.lock();
            status.current_time = target;
            status.eof = false;
            status.seek.clear();
        }
        self.seek_generation.fetch_add(1, Ordering::AcqRel);

        on_success(target);

        drop(audio);
        drop(video);
        self.changed.notify_all();
        info!("Seeked to {:.3}s", target);
        Ok(target)
    }

    /// Generation of the latest successful seek
    ///
    /// Units stamped with an older generation were decoded before that seek.
    pub fn seek_generation(&self) -> u64 {
        self.seek_generation.load(Ordering::Acquire)
    }

    /// Decode one video unit; `None` unless playing, at end of stream or on abort
    pub fn decode_frame(&self) -> Option<Decoded<Picture>> {
        if !self.state().is_playing() {
            return None;
        }
        let media = self.loaded()?;
        let mut video = media.video.lock();
        let mut decoded = video.decode_next(&media.demuxer)?;
        decoded.generation = self.seek_generation();
        Some(decoded)
    }

    /// Decode one audio unit; `None` unless playing, at end of stream or on abort
    pub fn decode_audio(&self) -> Option<Decoded<AudioChunk>> {
        if !self.state().is_playing() {
            return None;
        }
        let media = self.loaded()?;
        let mut audio = media.audio.as_ref()?.lock();
        let mut decoded = audio.decode_next(&media.demuxer)?;
        decoded.generation = self.seek_generation();
        Some(decoded)
    }

    /// Whether the video stream has ended; a decoder busy decoding has not
    pub fn video_ended(&self) -> bool {
        self.loaded()
            .and_then(|m| m.video.try_lock().map(|d| d.is_ended()))
            .unwrap_or(false)
    }

    /// Whether the audio stream has ended; no audio counts as ended
    pub fn audio_ended(&self) -> bool {
        match self.loaded() {
            Some(media) => match &media.audio {
                Some(audio) => audio.try_lock().map_or(false, |d| d.is_ended()),
                None => true,
            },
            None => false,
        }
    }

    /// Unblock every packet wait, used at teardown
    pub fn abort_reads(&self) {
        if let Some(media) = self.loaded() {
            media.demuxer.abort();
        }
        self.changed.notify_all();
    }

    /// Block until the status changes or `timeout` elapses
    pub fn park(&self, timeout: Duration) {
        let mut status = self.status.lock();
        self.changed.wait_for(&mut status, timeout);
    }

    /// Block until playing or `timeout` elapses; returns whether playing
    pub fn wait_until_playing(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while !status.state.is_playing() {
            if self.changed.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        status.state.is_playing()
    }

    /// Wake every thread parked on the player
    pub fn wake(&self) {
        self.changed.notify_all();
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(MAX_VOLUME, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SyntheticOpener, SyntheticSpec};

    fn loaded_player(spec: SyntheticSpec) -> Player {
        let player = Player::default();
        player
            .open(&SyntheticOpener::new(spec), Path::new("clip"), &DecodeOptions::default(), 64)
            .unwrap();
        player
    }

    #[test]
    fn test_play_without_media_stays_stopped() {
        let player = Player::default();
        assert!(matches!(player.set_state(PlayerState::Playing), Err(PlaybackError::NoMedia)));
        assert_eq!(player.state(), PlayerState::Stopped);

        // stopping always works
        assert!(player.set_state(PlayerState::Stopped).is_ok());
    }

    #[test]
    fn test_open_starts_stopped() {
        let player = loaded_player(SyntheticSpec::with_duration(120.0));
        assert!(player.has_media());
        assert!(player.has_audio());
        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(player.duration(), 120.0);
        assert_eq!(player.current_time(), 0.0);
    }

    #[test]
    fn test_transition_rules() {
        let player = loaded_player(SyntheticSpec::default());

        let err = player.set_state(PlayerState::Paused).unwrap_err();
        assert!(matches!(
            err,
            PlaybackError::InvalidTransition { from: PlayerState::Stopped, to: PlayerState::Paused }
        ));

        player.set_state(PlayerState::Playing).unwrap();
        assert_eq!(player.toggle_play_pause().unwrap(), PlayerState::Paused);
        assert_eq!(player.toggle_play_pause().unwrap(), PlayerState::Playing);
        player.set_state(PlayerState::Buffering).unwrap();
        assert_eq!(player.state(), PlayerState::Buffering);
    }

    #[test]
    fn test_stop_resets_time_and_seek() {
        let player = loaded_player(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();
        player.set_current_time(4.0);
        player.request_seek(6.0).unwrap();

        player.set_state(PlayerState::Stopped).unwrap();
        assert_eq!(player.current_time(), 0.0);
        assert_eq!(player.pending_seek(), None);
    }

    #[test]
    fn test_decode_only_while_playing() {
        let player = loaded_player(SyntheticSpec::default());
        assert!(player.decode_frame().is_none());

        player.set_state(PlayerState::Playing).unwrap();
        let frame = player.decode_frame().unwrap();
        assert_eq!(frame.pts, 0.0);
        assert!(player.decode_audio().is_some());
    }

    #[test]
    fn test_seek_is_clamped() {
        let player = loaded_player(SyntheticSpec::with_duration(10.0));
        assert_eq!(player.request_seek(-5.0).unwrap(), 0.0);
        assert_eq!(player.request_seek(99.0).unwrap(), 10.0);
    }

    #[test]
    fn test_seek_repositions_both_streams() {
        let player = loaded_player(SyntheticSpec::with_duration(30.0));
        player.set_state(PlayerState::Playing).unwrap();
        player.decode_frame().unwrap();

        player.request_seek(12.3).unwrap();
        let mut reset_at = None;
        let target = player.apply_seek(|t| reset_at = Some(t)).unwrap();
        assert_eq!(target, 12.3);
        assert_eq!(reset_at, Some(12.3));
        assert_eq!(player.current_time(), 12.3);
        assert_eq!(player.pending_seek(), None);

        let video = player.decode_frame().unwrap();
        assert!(video.pts + video.duration > 12.3 && video.pts <= 12.3 + video.duration);
        let audio = player.decode_audio().unwrap();
        assert!(audio.pts + audio.duration > 12.3);
    }

    #[test]
    fn test_units_carry_the_seek_generation() {
        let player = loaded_player(SyntheticSpec::with_duration(30.0));
        player.set_state(PlayerState::Playing).unwrap();

        let before = player.decode_frame().unwrap();
        assert_eq!(before.generation, 0);

        player.request_seek(8.0).unwrap();
        let mut seen = None;
        player.apply_seek(|_| seen = Some(player.seek_generation())).unwrap();
        assert_eq!(seen, Some(1));

        let video = player.decode_frame().unwrap();
        let audio = player.decode_audio().unwrap();
        assert_eq!(video.generation, 1);
        assert_eq!(audio.generation, 1);

        player.request_seek(40.0).unwrap();
        player.apply_seek(|_| {}).unwrap();
        assert_eq!(player.seek_generation(), 2);
    }

    #[test]
    fn test_failed_seek_keeps_position() {
        let spec = SyntheticSpec { fail_seek: true, ..SyntheticSpec::default() };
        let player = loaded_player(spec);
        player.set_state(PlayerState::Playing).unwrap();
        player.set_current_time(3.0);

        player.request_seek(7.0).unwrap();
        assert!(matches!(player.apply_seek(|_| {}), Err(PlaybackError::Seek(_))));
        assert_eq!(player.current_time(), 3.0);
        assert_eq!(player.pending_seek(), None);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_volume_and_speed_clamps() {
        let player = Player::default();
        assert_eq!(player.set_volume(-0.5), 0.0);
        assert_eq!(player.set_volume(5.0), 1.0);
        assert_eq!(player.set_speed(0.1), 0.25);
        assert_eq!(player.set_speed(3.0), 2.0);
        assert_eq!(player.speed(), 2.0);
    }

    #[test]
    fn test_streams_end_after_last_unit() {
        let spec = SyntheticSpec { duration: 0.2, audio: None, ..SyntheticSpec::default() };
        let player = loaded_player(spec);
        player.set_state(PlayerState::Playing).unwrap();

        let mut frames = 0;
        while player.decode_frame().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 6);
        assert!(player.video_ended());
        assert!(player.audio_ended());
    }

    #[test]
    fn test_close_unloads() {
        let player = loaded_player(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();
        player.close();

        assert!(!player.has_media());
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(player.decode_frame().is_none());
    }
}
