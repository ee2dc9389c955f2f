//! Audio decode thread, device pull and the audio master clock

use super::ring::{ByteRing, RingWatermarks, Throttle};
use super::sink::{open_sink, AudioSink};
use super::volume::{VolumeRamp, DEFAULT_RAMP_FRAMES};
use crate::decoder::AudioFormat;
use crate::playback::PtsOffset;
use crate::player::{Player, MAX_SPEED, MAX_VOLUME, MIN_SPEED, MIN_VOLUME};
use crate::utils::config::AudioConfig;
use crate::utils::error::{PlaybackError, Result};
use crate::utils::clamp;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Counters for the audio path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AudioStats {
    /// Chunks written to the ring
    pub chunks_written: u64,

    /// Chunks thrown away by a reset
    pub chunks_discarded: u64,

    /// Device pulls that could not be filled completely
    pub underruns: u64,

    /// Times the writer hit the target watermark
    pub throttle_events: u64,

    /// Bytes handed to the device
    pub bytes_played: u64,
}

struct AudioState {
    ring: ByteRing,
    marks: RingWatermarks,
    throttle: Throttle,

    /// Bytes the device asked for in its latest pull
    device_queued: usize,

    /// Bytes of the chunk being written that are not in the ring yet
    unwritten: usize,

    /// End of the audio handed to the ring, rebased seconds
    decoded_end: Option<f64>,

    expected_start: f64,

    /// Seek generation of the current segment; chunks stamped older are stale
    generation: u64,

    paused: bool,
    paused_since: Option<Instant>,
    paused_total: Duration,

    ramp: VolumeRamp,
    speed: f64,

    /// Fractional source frames carried between pulls at speed != 1
    phase: f64,
    scratch: Vec<f32>,

    stats: AudioStats,
}

impl AudioState {
    fn level(&self) -> usize {
        self.ring.used() + self.device_queued
    }
}

struct AudioShared {
    state: Mutex<AudioState>,
    can_write: Condvar,
    running: AtomicBool,
    format: AudioFormat,
    player: Arc<Player>,
    offset: Arc<PtsOffset>,
}

impl AudioShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Handle the device side uses to pull output audio
#[derive(Clone)]
pub struct DevicePull {
    shared: Arc<AudioShared>,
}

impl DevicePull {
    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    /// Fill `out` with interleaved samples
    ///
    /// Never waits for the decoder: whatever the ring cannot supply is
    /// silence and counts as an underrun. Nothing is consumed while paused.
    pub fn pull(&self, out: &mut [f32]) {
        let channels = self.shared.format.channels.max(1) as usize;
        let bytes_per_frame = self.shared.format.bytes_per_frame();
        let mut state = self.shared.state.lock();

        if state.paused {
            out.fill(0.0);
            return;
        }

        state.device_queued = out.len() * std::mem::size_of::<f32>();
        let out_frames = out.len() / channels;

        let filled_frames = if state.speed == 1.0 {
            let read = state.ring.read(bytemuck::cast_slice_mut(&mut out[..out_frames * channels]));
            read / bytes_per_frame
        } else {
            resample_from_ring(&mut state, out, channels, bytes_per_frame)
        };

        if filled_frames < out_frames {
            out[filled_frames * channels..].fill(0.0);
            state.stats.underruns += 1;
        }

        let AudioState { ramp, stats, .. } = &mut *state;
        ramp.apply(&mut out[..filled_frames * channels], channels);
        stats.bytes_played += (filled_frames * bytes_per_frame) as u64;
        drop(state);

        self.shared.can_write.notify_one();
    }
}

/// Consume `out_frames * speed` source frames and stretch them linearly over `out`
///
/// Returns the number of output frames filled.
fn resample_from_ring(state: &mut AudioState, out: &mut [f32], channels: usize, bytes_per_frame: usize) -> usize {
    let out_frames = out.len() / channels;
    state.phase += out_frames as f64 * state.speed;
    let wanted = state.phase.floor() as usize;
    state.phase -= wanted as f64;

    let AudioState { ring, scratch, speed, .. } = state;
    scratch.resize(wanted * channels, 0.0);
    let read = ring.read(bytemuck::cast_slice_mut(&mut scratch[..]));
    let source_frames = read / bytes_per_frame;
    if source_frames == 0 {
        return 0;
    }

    let produced = ((source_frames as f64 / *speed).round() as usize).min(out_frames);
    let step = source_frames as f64 / produced.max(1) as f64;

    for frame in 0..produced {
        let position = frame as f64 * step;
        let index = (position as usize).min(source_frames - 1);
        let next = (index + 1).min(source_frames - 1);
        let fraction = (position - index as f64) as f32;

        for ch in 0..channels {
            let a = scratch[index * channels + ch];
            let b = scratch[next * channels + ch];
            out[frame * channels + ch] = a * (1.0 - fraction) + b * fraction;
        }
    }
    produced
}

/// Cloneable read-only view of the audio master clock
#[derive(Clone)]
pub struct AudioClock {
    shared: Arc<AudioShared>,
}

impl AudioClock {
    /// Playback position implied by what has been decoded but not heard yet
    ///
    /// `None` until the first chunk of the segment has been written.
    pub fn now(&self) -> Option<f64> {
        let state = self.shared.state.lock();
        let end = state.decoded_end?;
        let buffered = state.ring.used() + state.unwritten;
        let in_flight = state.device_queued as f64 * state.speed;
        let seconds = (buffered as f64 + in_flight) / self.shared.format.bytes_per_second() as f64;
        Some((end - seconds).max(state.expected_start))
    }
}

/// Audio decode thread, ring and sink
pub struct AudioOutput {
    shared: Arc<AudioShared>,
    thread: Option<JoinHandle<()>>,
    sink: Option<Box<dyn AudioSink>>,
}

impl AudioOutput {
    /// Build the ring for `format`, start the decode thread and open the sink
    pub fn start(
        player: Arc<Player>,
        offset: Arc<PtsOffset>,
        format: AudioFormat,
        config: &AudioConfig,
    ) -> Result<Self> {
        if format.sample_rate == 0 || format.channels == 0 {
            return Err(PlaybackError::Audio(format!("unusable audio format {:?}", format)));
        }

        let mut output = Self::detached(player, offset, format, config)?;
        output.sink = Some(open_sink(config.sink, output.device_pull()));
        Ok(output)
    }

    /// Start the decode thread without a sink; the caller pulls through [`Self::device_pull`]
    pub fn detached(
        player: Arc<Player>,
        offset: Arc<PtsOffset>,
        format: AudioFormat,
        config: &AudioConfig,
    ) -> Result<Self> {
        let bytes_per_frame = format.bytes_per_frame();
        let ring = ByteRing::new((format.bytes_per_second() as f64 * config.ring_seconds) as usize, bytes_per_frame);
        let marks = RingWatermarks::new(ring.size(), config.callback_chunk_bytes, config.target_ratio, config.resume_ratio);
        debug!(
            "Audio ring {} bytes, target {} resume {} ({} Hz, {} ch)",
            marks.size, marks.target, marks.resume, format.sample_rate, format.channels
        );

        let paused = !player.state().is_playing();
        let shared = Arc::new(AudioShared {
            state: Mutex::new(AudioState {
                ring,
                marks,
                throttle: Throttle::default(),
                device_queued: 0,
                unwritten: 0,
                decoded_end: None,
                expected_start: offset.expected_start(),
                generation: player.seek_generation(),
                paused,
                paused_since: paused.then(Instant::now),
                paused_total: Duration::ZERO,
                ramp: VolumeRamp::new(player.volume(), DEFAULT_RAMP_FRAMES, config.ramp_type),
                speed: player.speed(),
                phase: 0.0,
                scratch: Vec::new(),
                stats: AudioStats::default(),
            }),
            can_write: Condvar::new(),
            running: AtomicBool::new(true),
            format,
            player,
            offset,
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("audio-decode".to_string())
            .spawn(move || decode_loop(thread_shared))
            .map_err(|e| PlaybackError::Allocation(format!("Failed to spawn audio thread: {}", e)))?;

        Ok(Self { shared, thread: Some(thread), sink: None })
    }

    pub fn device_pull(&self) -> DevicePull {
        DevicePull { shared: Arc::clone(&self.shared) }
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    /// Sink name, `None` when detached
    pub fn sink_name(&self) -> Option<&'static str> {
        self.sink.as_ref().map(|sink| sink.name())
    }

    pub fn clock(&self) -> AudioClock {
        AudioClock { shared: Arc::clone(&self.shared) }
    }

    pub fn master_clock(&self) -> Option<f64> {
        self.clock().now()
    }

    /// Pause or resume output without touching the ring or the thread
    pub fn set_paused(&mut self, paused: bool) {
        {
            let mut state = self.shared.state.lock();
            match (paused, state.paused_since) {
                (true, None) => state.paused_since = Some(Instant::now()),
                (false, Some(since)) => {
                    state.paused_total += since.elapsed();
                    state.paused_since = None;
                }
                _ => {}
            }
            state.paused = paused;
        }
        self.shared.can_write.notify_all();

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.set_paused(paused) {
                warn!("Audio sink {} failed to {}: {}", sink.name(), if paused { "pause" } else { "resume" }, e);
            }
        }
    }

    /// Total wall time spent paused
    pub fn paused_total(&self) -> Duration {
        let state = self.shared.state.lock();
        state.paused_total + state.paused_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Clamp and ramp to a new volume, returning the effective value
    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = clamp(volume, MIN_VOLUME, MAX_VOLUME);
        self.shared.state.lock().ramp.set_target(volume);
        volume
    }

    /// Clamp and apply a new speed, returning the effective value
    pub fn set_speed(&self, speed: f64) -> f64 {
        let speed = clamp(speed, MIN_SPEED, MAX_SPEED);
        let mut state = self.shared.state.lock();
        state.speed = speed;
        state.phase = 0.0;
        speed
    }

    /// Drop buffered audio and clock state and start a new segment
    pub fn reset(&self, expected_start: f64) {
        {
            let mut state = self.shared.state.lock();
            state.generation = self.shared.player.seek_generation();
            state.ring.clear();
            state.throttle.reset();
            state.device_queued = 0;
            state.unwritten = 0;
            state.decoded_end = None;
            state.expected_start = expected_start;
            state.phase = 0.0;
        }
        self.shared.can_write.notify_all();
        debug!("Audio output reset to {:.3}s", expected_start);
    }

    /// Bytes in the ring
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().ring.used()
    }

    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.ring.used() == 0 && state.unwritten == 0
    }

    pub fn watermarks(&self) -> RingWatermarks {
        self.shared.state.lock().marks
    }

    pub fn stats(&self) -> AudioStats {
        self.shared.state.lock().stats
    }

    /// Close the sink, then stop and join the decode thread
    ///
    /// A thread blocked waiting for packets only returns once the demuxer is
    /// aborted, see [`Player::abort_reads`].
    pub fn stop(&mut self) {
        self.sink = None;
        self.shared.running.store(false, Ordering::Release);
        self.shared.can_write.notify_all();
        self.shared.player.wake();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Audio decode thread panicked");
            }
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait while the throttle is engaged; returns false once stopped
fn wait_for_room(shared: &AudioShared) -> bool {
    let mut state = shared.state.lock();
    loop {
        if !shared.is_running() {
            return false;
        }

        let level = state.level();
        let marks = state.marks;
        let was_engaged = state.throttle.is_engaged();
        if !state.throttle.update(level, &marks) {
            return true;
        }
        if !was_engaged {
            state.stats.throttle_events += 1;
        }
        shared.can_write.wait_for(&mut state, IDLE_WAIT);
    }
}

fn decode_loop(shared: Arc<AudioShared>) {
    info!("Audio decode thread started");

    while shared.is_running() {
        if !shared.player.state().is_playing() {
            shared.player.wait_until_playing(IDLE_WAIT);
            continue;
        }

        if !wait_for_room(&shared) {
            break;
        }
        let Some(decoded) = shared.player.decode_audio() else {
            shared.player.park(IDLE_WAIT);
            continue;
        };

        let mut state = shared.state.lock();
        let generation = decoded.generation;
        if generation != state.generation {
            state.stats.chunks_discarded += 1;
            continue;
        }

        let start = shared.offset.rebase(decoded.pts);
        let previous_end = state.decoded_end.unwrap_or(start);
        state.decoded_end = Some(start.max(previous_end) + decoded.duration);

        let data = &decoded.unit.data;
        let mut written = 0;
        state.unwritten = data.len();
        while written < data.len() {
            written += state.ring.write(&data[written..]);
            state.unwritten = data.len() - written;
            if written == data.len() {
                break;
            }
            shared.can_write.wait_for(&mut state, IDLE_WAIT);
            if !shared.is_running() || state.generation != generation {
                break;
            }
        }

        if state.generation == generation {
            state.unwritten = 0;
            state.stats.chunks_written += 1;
        }
    }

    info!("Audio decode thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RampType;
    use crate::player::PlayerState;
    use crate::source::{DecodeOptions, SyntheticOpener, SyntheticSpec};
    use std::path::Path;

    fn setup(spec: SyntheticSpec) -> (Arc<Player>, Arc<PtsOffset>, AudioOutput) {
        let player = Arc::new(Player::default());
        let info = player
            .open(&SyntheticOpener::new(spec), Path::new("clip"), &DecodeOptions::default(), 64)
            .unwrap();
        let offset = Arc::new(PtsOffset::new(0.0));
        let output = AudioOutput::detached(
            Arc::clone(&player),
            Arc::clone(&offset),
            info.audio_format().unwrap(),
            &AudioConfig::default(),
        )
        .unwrap();
        (player, offset, output)
    }

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn teardown(player: &Player, mut output: AudioOutput) {
        player.abort_reads();
        output.stop();
    }

    #[test]
    fn test_clock_absent_until_first_chunk() {
        let (player, _offset, output) = setup(SyntheticSpec::default());
        assert_eq!(output.master_clock(), None);
        teardown(&player, output);
    }

    #[test]
    fn test_decoder_stops_at_target_watermark() {
        let (player, _offset, output) = setup(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();

        let marks = output.watermarks();
        assert!(wait_for(|| output.buffered() >= marks.target));
        thread::sleep(Duration::from_millis(100));

        // one chunk may land after the check that engaged the throttle
        assert!(output.buffered() < marks.target + 1024 * 8 + 1);
        assert!(output.stats().throttle_events >= 1);
        teardown(&player, output);
    }

    #[test]
    fn test_clock_tracks_consumed_audio() {
        let (player, _offset, mut output) = setup(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();
        output.set_paused(false);
        assert!(wait_for(|| output.buffered() >= output.watermarks().target));

        let before = output.master_clock().unwrap();
        assert!(before.abs() < 0.01, "clock at {}", before);

        // a quarter second of stereo at 48 kHz; it stays in flight until the next pull
        let pull = output.device_pull();
        let mut out = vec![0.0f32; 12_000 * 2];
        pull.pull(&mut out);
        assert!(out.iter().any(|s| *s != 0.0));
        assert!((output.master_clock().unwrap() - before).abs() < 0.01);

        let mut tail = vec![0.0f32; 16 * 2];
        pull.pull(&mut tail);
        let after = output.master_clock().unwrap();
        assert!(after > before + 0.2, "clock {} -> {}", before, after);
        teardown(&player, output);
    }

    #[test]
    fn test_paused_pull_is_silent_and_consumes_nothing() {
        let (player, _offset, mut output) = setup(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();
        assert!(wait_for(|| output.buffered() > 0));

        output.set_paused(true);
        let buffered = output.buffered();
        let mut out = vec![1.0f32; 512];
        output.device_pull().pull(&mut out);

        assert!(out.iter().all(|s| *s == 0.0));
        assert!(output.buffered() >= buffered);
        assert_eq!(output.stats().bytes_played, 0);
        teardown(&player, output);
    }

    #[test]
    fn test_empty_ring_underruns() {
        let (player, _offset, mut output) = setup(SyntheticSpec::default());
        output.set_paused(false);

        let mut out = vec![1.0f32; 256];
        output.device_pull().pull(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(output.stats().underruns, 1);
        teardown(&player, output);
    }

    #[test]
    fn test_double_speed_drains_twice_as_fast() {
        let (player, _offset, mut output) = setup(SyntheticSpec::default());
        player.set_state(PlayerState::Playing).unwrap();
        assert!(wait_for(|| output.buffered() >= output.watermarks().target));

        // freeze the writer so the ring only shrinks
        player.set_state(PlayerState::Paused).unwrap();
        thread::sleep(Duration::from_millis(60));
        output.set_paused(false);
        assert_eq!(output.set_speed(5.0), 2.0);

        let before = output.buffered();
        let mut out = vec![0.0f32; 1024 * 2];
        output.device_pull().pull(&mut out);
        assert_eq!(before - output.buffered(), 2048 * 8);
        teardown(&player, output);
    }

    #[test]
    fn test_reset_clears_ring_and_clock() {
        let (player, offset, output) = setup(SyntheticSpec::with_duration(30.0));
        player.set_state(PlayerState::Playing).unwrap();
        assert!(wait_for(|| output.master_clock().is_some()));

        player.request_seek(12.0).unwrap();
        player
            .apply_seek(|target| {
                output.reset(target);
                offset.reset(target);
            })
            .unwrap();

        assert!(wait_for(|| output.master_clock().is_some()));
        let clock = output.master_clock().unwrap();
        assert!(clock >= 12.0 && clock < 12.1, "clock at {}", clock);
        teardown(&player, output);
    }

    #[test]
    fn test_configured_ramp_shapes_volume_changes() {
        let player = Arc::new(Player::default());
        let info = player
            .open(&SyntheticOpener::new(SyntheticSpec::default()), Path::new("clip"), &DecodeOptions::default(), 64)
            .unwrap();
        let config = AudioConfig { ramp_type: RampType::SCurve, ..AudioConfig::default() };
        let output = AudioOutput::detached(
            Arc::clone(&player),
            Arc::new(PtsOffset::new(0.0)),
            info.audio_format().unwrap(),
            &config,
        )
        .unwrap();

        output.set_volume(0.0);
        let ramp = output.shared.state.lock().ramp.clone();
        assert_eq!(ramp.ramp_type(), RampType::SCurve);
        assert!(ramp.is_ramping());
        teardown(&player, output);
    }

    #[test]
    fn test_volume_and_speed_are_clamped() {
        let (player, _offset, output) = setup(SyntheticSpec::default());
        assert_eq!(output.set_volume(1.5), 1.0);
        assert_eq!(output.set_volume(-1.0), 0.0);
        assert_eq!(output.set_speed(0.1), 0.25);
        teardown(&player, output);
    }
}
