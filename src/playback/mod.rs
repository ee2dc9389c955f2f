//! Playback core for ccsync
//!
//! [`PlaybackCore`] is the thread-safe front of a playback session. Callers
//! enqueue transport commands; one command thread owns the player, both
//! pipelines and the shared pts offset, applies the commands in order and
//! publishes a [`PlaybackSnapshot`] after each one and on every idle tick.
//! The presenter pulls frames straight from the video pipeline, timed
//! against the audio clock.

mod command;
mod offset;
mod snapshot;

pub use command::{CommandQueue, PlaybackCommand, PushOutcome};
pub use offset::PtsOffset;
pub use snapshot::{CoreEvent, PlaybackSnapshot, PlaybackStats, VideoBackendStatus};

use crate::audio::{AudioClock, AudioOutput};
use crate::player::{Player, PlayerState};
use crate::source::{DecodeOptions, MediaOpener};
use crate::utils::config::Config;
use crate::utils::error::{PlaybackError, Result};
use crate::video::{RenderFrame, VideoPipeline};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Events buffered for subscribers; newer events are dropped once full
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// State readable from any thread without going through the command thread
struct CoreShared {
    snapshot: RwLock<PlaybackSnapshot>,
    video: RwLock<Option<Arc<VideoPipeline>>>,
    audio_clock: RwLock<Option<AudioClock>>,
    commands_dropped: AtomicCell<u64>,
}

/// Handle to a running playback session
pub struct PlaybackCore {
    commands: Arc<CommandQueue>,
    shared: Arc<CoreShared>,
    events_tx: Sender<CoreEvent>,
    events_rx: Receiver<CoreEvent>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackCore {
    /// Start the command thread
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `opener` - Turns `Open` paths into readers and codecs
    pub fn new(config: Config, opener: Arc<dyn MediaOpener>) -> Result<Self> {
        config.validate()?;

        let commands = Arc::new(CommandQueue::new(
            config.playback.command_queue_capacity,
            config.playback.coalesce_commands,
        ));
        let shared = Arc::new(CoreShared {
            snapshot: RwLock::new(PlaybackSnapshot {
                volume: config.audio.volume,
                speed: config.playback.speed,
                ..PlaybackSnapshot::default()
            }),
            video: RwLock::new(None),
            audio_clock: RwLock::new(None),
            commands_dropped: AtomicCell::new(0),
        });
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);

        let session_commands = Arc::clone(&commands);
        let session_shared = Arc::clone(&shared);
        let session_events = events_tx.clone();
        let thread = thread::Builder::new()
            .name("playback-core".to_string())
            .spawn(move || {
                let session = Session::new(config, opener, session_shared, session_events);
                run(session, &session_commands);
            })
            .map_err(|e| PlaybackError::Allocation(format!("Failed to spawn command thread: {}", e)))?;

        info!("Playback core started");
        Ok(Self {
            commands,
            shared,
            events_tx,
            events_rx,
            thread: Some(thread),
        })
    }

    /// Enqueue a command without waiting for it to run
    pub fn send(&self, command: PlaybackCommand) -> PushOutcome {
        let outcome = self.commands.push(command);
        if let PushOutcome::DroppedOldest(dropped) = &outcome {
            warn!("Command queue full, dropped {}", dropped);
            self.shared.commands_dropped.fetch_add(1);
            publish_event(&self.events_tx, CoreEvent::CommandDropped(dropped.clone()));
        }
        outcome
    }

    pub fn open(&self, path: impl AsRef<Path>) -> PushOutcome {
        self.send(PlaybackCommand::Open(path.as_ref().to_path_buf()))
    }

    pub fn play(&self) -> PushOutcome {
        self.send(PlaybackCommand::Play)
    }

    pub fn pause(&self) -> PushOutcome {
        self.send(PlaybackCommand::Pause)
    }

    pub fn stop(&self) -> PushOutcome {
        self.send(PlaybackCommand::Stop)
    }

    pub fn toggle_play_pause(&self) -> PushOutcome {
        self.send(PlaybackCommand::TogglePlayPause)
    }

    pub fn seek(&self, seconds: f64) -> PushOutcome {
        self.send(PlaybackCommand::SeekAbs(seconds))
    }

    pub fn set_volume(&self, volume: f32) -> PushOutcome {
        self.send(PlaybackCommand::SetVolume(volume))
    }

    pub fn set_speed(&self, speed: f64) -> PushOutcome {
        self.send(PlaybackCommand::SetSpeed(speed))
    }

    /// Latest published state
    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.snapshot.read().clone()
    }

    /// Audio master clock in seconds, `None` without audio or before the first chunk
    pub fn master_clock(&self) -> Option<f64> {
        self.shared.audio_clock.read().as_ref().and_then(AudioClock::now)
    }

    /// Next frame to present, if one is due
    pub fn get_frame_for_render(&self) -> Option<RenderFrame> {
        let clock = self.master_clock();
        let video = self.shared.video.read().clone()?;
        video.get_frame_for_render(clock)
    }

    /// Receiver for core events; every clone sees each event once between them
    ///
    /// At most [`EVENT_QUEUE_CAPACITY`] events wait unread. Later events are
    /// dropped until a subscriber catches up.
    pub fn events(&self) -> Receiver<CoreEvent> {
        self.events_rx.clone()
    }

    /// Tear the session down and join the command thread
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        if self.commands.push(PlaybackCommand::Shutdown) == PushOutcome::Closed {
            debug!("Command queue already closed");
        }
        self.commands.close();

        if handle.join().is_err() {
            error!("Command thread panicked");
        }
        info!("Playback core shut down");
    }
}

impl Drop for PlaybackCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut session: Session, commands: &CommandQueue) {
    let tick = Duration::from_millis(session.config.playback.tick_interval_ms.max(1));

    loop {
        if let Some(command) = commands.pop_timeout(tick) {
            if command == PlaybackCommand::Shutdown {
                break;
            }
            debug!("Applying {}", command);
            session.handle(command);
        } else if commands.is_closed() {
            break;
        }
        session.refresh();
    }

    session.teardown();
    session.refresh();
    debug!("Command thread exiting");
}

/// Everything the command thread owns
struct Session {
    config: Config,
    opener: Arc<dyn MediaOpener>,
    player: Arc<Player>,
    offset: Arc<PtsOffset>,
    video: Option<Arc<VideoPipeline>>,
    audio: Option<AudioOutput>,
    shared: Arc<CoreShared>,
    events: Sender<CoreEvent>,
    seeks: u64,
}

impl Session {
    fn new(config: Config, opener: Arc<dyn MediaOpener>, shared: Arc<CoreShared>, events: Sender<CoreEvent>) -> Self {
        let player = Arc::new(Player::new(config.audio.volume, config.playback.speed));
        Self {
            config,
            opener,
            player,
            offset: Arc::new(PtsOffset::new(0.0)),
            video: None,
            audio: None,
            shared,
            events,
            seeks: 0,
        }
    }

    fn emit(&self, event: CoreEvent) {
        publish_event(&self.events, event);
    }

    fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Open(path) => self.open(path),
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => {
                self.transition(PlayerState::Paused);
            }
            PlaybackCommand::Stop => self.stop(),
            PlaybackCommand::TogglePlayPause => {
                if self.player.state().is_playing() {
                    self.transition(PlayerState::Paused);
                } else {
                    self.play();
                }
            }
            PlaybackCommand::SeekAbs(target) => self.seek(target),
            PlaybackCommand::SetVolume(volume) => {
                let volume = self.player.set_volume(volume);
                if let Some(audio) = &self.audio {
                    audio.set_volume(volume);
                }
            }
            PlaybackCommand::SetSpeed(speed) => {
                let speed = self.player.set_speed(speed);
                if let Some(audio) = &self.audio {
                    audio.set_speed(speed);
                }
                if let Some(video) = &self.video {
                    video.set_speed(speed);
                }
            }
            PlaybackCommand::Shutdown => {}
        }
    }

    fn open(&mut self, path: PathBuf) {
        self.teardown();

        match self.build(&path) {
            Ok(()) => {
                if self.config.general.auto_play {
                    self.play();
                }
            }
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                self.teardown();
                self.emit(CoreEvent::OpenFailed {
                    path,
                    message: e.to_string(),
                });
            }
        }
    }

    fn build(&mut self, path: &Path) -> Result<()> {
        let options = DecodeOptions::from(&self.config);
        let info = self.player.open(
            self.opener.as_ref(),
            path,
            &options,
            self.config.demuxer.packet_queue_capacity,
        )?;
        self.offset.reset(0.0);

        let video = Arc::new(VideoPipeline::start(
            Arc::clone(&self.player),
            Arc::clone(&self.offset),
            &info.video,
            &self.config.video,
        )?);
        *self.shared.video.write() = Some(Arc::clone(&video));
        self.video = Some(video);

        if let Some(format) = self.player.audio_format() {
            let audio = AudioOutput::start(
                Arc::clone(&self.player),
                Arc::clone(&self.offset),
                format,
                &self.config.audio,
            )?;
            *self.shared.audio_clock.write() = Some(audio.clock());
            self.audio = Some(audio);
        }

        info!("Opened {}", info);
        self.emit(CoreEvent::MediaOpened(info));
        Ok(())
    }

    /// Run a player transition and propagate the pause state
    fn transition(&mut self, to: PlayerState) -> bool {
        match self.player.set_state(to) {
            Ok(from) => {
                let paused = !to.is_playing();
                if let Some(audio) = self.audio.as_mut() {
                    audio.set_paused(paused);
                }
                if let Some(video) = &self.video {
                    video.set_paused(paused);
                }
                if from != to {
                    self.emit(CoreEvent::StateChanged { from, to });
                }
                true
            }
            Err(e) => {
                warn!("Cannot change to {}: {}", to, e);
                false
            }
        }
    }

    fn play(&mut self) {
        // playing again after the end starts over
        if self.player.is_eof() {
            self.seek(0.0);
        }
        self.transition(PlayerState::Playing);
    }

    fn stop(&mut self) {
        if self.transition(PlayerState::Stopped) && self.player.has_media() {
            self.rewind_to(0.0);
        }
    }

    fn seek(&mut self, target: f64) {
        self.rewind_to(target);
    }

    fn rewind_to(&mut self, target: f64) {
        let video = self.video.as_deref();
        let audio = self.audio.as_ref();
        let offset = &self.offset;
        let result = self.player.request_seek(target).and_then(|_| {
            // pipelines first so frames decoded before the seek are rejected
            // before the offset can be latched again
            self.player.apply_seek(|at| {
                if let Some(video) = video {
                    video.reset(at);
                }
                if let Some(audio) = audio {
                    audio.reset(at);
                }
                offset.reset(at);
            })
        });

        match result {
            Ok(at) => {
                self.seeks += 1;
                self.emit(CoreEvent::SeekCompleted { target: at });
            }
            Err(e) => {
                warn!("Seek to {:.3}s failed: {}", target, e);
                self.emit(CoreEvent::SeekFailed {
                    target,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Update time and end-of-media, then publish the snapshot
    fn refresh(&mut self) {
        let state = self.player.state();

        if self.player.has_media() && state != PlayerState::Stopped && self.player.pending_seek().is_none() {
            let clock = match &self.audio {
                Some(audio) => audio.master_clock(),
                None => self.video.as_ref().and_then(|video| video.fallback_clock()),
            };
            if let Some(clock) = clock {
                let duration = self.player.duration();
                self.player.set_current_time(if duration > 0.0 { clock.min(duration) } else { clock });
            }

            let video_done = self.player.video_ended() && self.video.as_ref().map_or(true, |v| v.is_drained());
            let audio_done = self.player.audio_ended() && self.audio.as_ref().map_or(true, |a| a.is_drained());
            if video_done && audio_done && !self.player.is_eof() {
                info!("End of media at {:.3}s", self.player.current_time());
                self.player.set_eof(true);
                self.emit(CoreEvent::EndOfMedia);
            }
        }

        self.publish();
    }

    fn publish(&self) {
        let stats = PlaybackStats {
            video: self.video.as_ref().map(|v| v.stats()).unwrap_or_default(),
            audio: self.audio.as_ref().map(|a| a.stats()).unwrap_or_default(),
            commands_dropped: self.shared.commands_dropped.load(),
            seeks: self.seeks,
        };

        let snapshot = PlaybackSnapshot {
            state: self.player.state(),
            current_time: self.player.current_time(),
            duration: self.player.duration(),
            volume: self.player.volume(),
            speed: self.player.speed(),
            has_media: self.player.has_media(),
            has_audio: self.audio.is_some(),
            eof: self.player.is_eof(),
            backend_status: if self.video.is_some() {
                VideoBackendStatus::Software
            } else {
                VideoBackendStatus::Inactive
            },
            audio_sink: self.audio.as_ref().and_then(|a| a.sink_name()),
            stats,
        };

        *self.shared.snapshot.write() = snapshot;
    }

    /// Abort reads, stop both pipelines, unload the media
    fn teardown(&mut self) {
        if self.video.is_none() && self.audio.is_none() && !self.player.has_media() {
            return;
        }

        self.player.abort_reads();

        *self.shared.video.write() = None;
        if let Some(video) = self.video.take() {
            video.stop();
        }

        *self.shared.audio_clock.write() = None;
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }

        let was = self.player.state();
        self.player.close();
        if was != PlayerState::Stopped {
            self.emit(CoreEvent::StateChanged { from: was, to: PlayerState::Stopped });
        }
        debug!("Session torn down");
    }
}

/// Queue an event for subscribers without blocking the caller
fn publish_event(events: &Sender<CoreEvent>, event: CoreEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => debug!("Event queue full, dropped {:?}", event),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_events_are_bounded() {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        for _ in 0..EVENT_QUEUE_CAPACITY * 2 {
            publish_event(&tx, CoreEvent::EndOfMedia);
        }
        assert_eq!(rx.len(), EVENT_QUEUE_CAPACITY);

        // draining makes room again
        rx.try_recv().unwrap();
        publish_event(&tx, CoreEvent::SeekCompleted { target: 3.0 });
        assert_eq!(rx.len(), EVENT_QUEUE_CAPACITY);
        assert!(matches!(rx.try_iter().last(), Some(CoreEvent::SeekCompleted { .. })));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let (tx, rx) = bounded(1);
        drop(rx);
        publish_event(&tx, CoreEvent::EndOfMedia);
    }
}
