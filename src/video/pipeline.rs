//! Video decode thread and clock-gated frame release

use super::clock::FallbackClock;
use super::frame_queue::{FramePool, SlotId, VideoFrame, VideoFrameQueue, VideoStats};
use crate::decoder::{PixelLayout, VideoStreamInfo};
use crate::playback::PtsOffset;
use crate::player::Player;
use crate::utils::config::VideoConfig;
use crate::utils::error::{PlaybackError, Result};
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the decode thread parks before re-checking its flags
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Pool slots beyond the queue: one pending upload, one lent to the presenter
const EXTRA_SLOTS: usize = 2;

struct VideoState {
    pool: FramePool,
    queue: VideoFrameQueue,
    pending: Option<SlotId>,
    fallback: FallbackClock,

    /// Seek generation of the current segment; frames stamped older are stale
    generation: u64,

    stats: VideoStats,
}

struct VideoShared {
    state: Mutex<VideoState>,
    can_push: Condvar,
    running: AtomicBool,
    player: Arc<Player>,
    offset: Arc<PtsOffset>,
    release_threshold: f64,
}

impl VideoShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Decoded frame lent to the presenter
///
/// The buffer belongs to the pipeline's pool; dropping the lease hands it
/// back and lets the decode thread reuse the slot.
pub struct RenderFrame {
    slot: SlotId,
    frame: Option<VideoFrame>,
    shared: Arc<VideoShared>,
}

impl RenderFrame {
    /// Rebased presentation time in seconds
    pub fn pts(&self) -> f64 {
        self.frame.as_ref().map_or(0.0, |f| f.pts)
    }

    pub fn width(&self) -> u32 {
        self.frame.as_ref().map_or(0, |f| f.width)
    }

    pub fn height(&self) -> u32 {
        self.frame.as_ref().map_or(0, |f| f.height)
    }

    pub fn layout(&self) -> Option<PixelLayout> {
        self.frame.as_ref().map(|f| f.layout)
    }

    /// Row stride of the first plane in bytes
    pub fn stride(&self) -> usize {
        self.frame.as_ref().map_or(0, VideoFrame::stride)
    }

    /// Plane slices with their row strides
    pub fn planes(&self) -> Vec<(&[u8], usize)> {
        self.frame.as_ref().map(VideoFrame::planes).unwrap_or_default()
    }
}

impl std::fmt::Debug for RenderFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFrame")
            .field("slot", &self.slot)
            .field("pts", &self.pts())
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Drop for RenderFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.shared.state.lock().pool.restore(self.slot, frame);
            self.shared.can_push.notify_one();
        }
    }
}

/// Video decode thread plus the queue it feeds
pub struct VideoPipeline {
    shared: Arc<VideoShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Allocate the frame pool for `stream` and start the decode thread
    pub fn start(
        player: Arc<Player>,
        offset: Arc<PtsOffset>,
        stream: &VideoStreamInfo,
        config: &VideoConfig,
    ) -> Result<Self> {
        let queue = VideoFrameQueue::new(config.frame_queue_capacity);
        let pool = FramePool::new(queue.capacity() + EXTRA_SLOTS, stream.width, stream.height, stream.layout);
        debug!(
            "Video pipeline: {} queued frames, {} pool slots of {}x{} {:?}",
            queue.capacity(),
            pool.capacity(),
            stream.width,
            stream.height,
            stream.layout
        );

        let speed = player.speed();
        let shared = Arc::new(VideoShared {
            state: Mutex::new(VideoState {
                pool,
                queue,
                pending: None,
                fallback: FallbackClock::new(speed),
                generation: player.seek_generation(),
                stats: VideoStats::default(),
            }),
            can_push: Condvar::new(),
            running: AtomicBool::new(true),
            player,
            offset,
            release_threshold: config.release_threshold_ms / 1000.0,
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || decode_loop(thread_shared))
            .map_err(|e| PlaybackError::Allocation(format!("Failed to spawn video thread: {}", e)))?;

        Ok(Self { shared, thread: Mutex::new(Some(thread)) })
    }

    /// Hand out the next frame once its time has come
    ///
    /// # Arguments
    ///
    /// * `master_clock` - Audio clock in seconds, `None` to use the wall-clock fallback
    ///
    /// # Returns
    ///
    /// The frame to present, or `None` when nothing is due yet. Never blocks
    /// on the decode thread.
    pub fn get_frame_for_render(&self, master_clock: Option<f64>) -> Option<RenderFrame> {
        let mut state = self.shared.state.lock();

        if state.pending.is_none() {
            if let Some(slot) = state.queue.pop() {
                state.pending = Some(slot);
                self.shared.can_push.notify_one();
            }
        }

        let slot = state.pending?;
        let pts = state.pool.frame(slot)?.pts;
        let clock = match master_clock {
            Some(clock) => clock,
            None => state.fallback.gate(pts),
        };

        let delay = pts - clock;
        if delay > self.shared.release_threshold {
            return None;
        }

        state.pending = None;
        let frame = state.pool.lend(slot)?;
        state.stats.frames_presented += 1;
        trace!("Releasing frame {:.3}s against clock {:.3}s", pts, clock);

        Some(RenderFrame {
            slot,
            frame: Some(frame),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Throw away queued and pending frames and start a new segment
    pub fn reset(&self, expected_start: f64) {
        let mut state = self.shared.state.lock();
        state.generation = self.shared.player.seek_generation();

        let mut discarded = 0;
        let queued: Vec<SlotId> = state.queue.drain().collect();
        for slot in queued.into_iter().chain(state.pending.take()) {
            state.pool.release(slot);
            discarded += 1;
        }
        state.stats.frames_discarded += discarded;
        state.fallback.reset();
        drop(state);

        self.shared.can_push.notify_all();
        debug!("Video pipeline reset to {:.3}s ({} frames discarded)", expected_start, discarded);
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.state.lock().fallback.set_paused(paused);
    }

    pub fn set_speed(&self, speed: f64) {
        self.shared.state.lock().fallback.set_speed(speed);
    }

    /// Wall-clock fallback value, `None` until the first frame was gated
    pub fn fallback_clock(&self) -> Option<f64> {
        self.shared.state.lock().fallback.now()
    }

    /// Nothing queued and nothing pending
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.queue.is_empty() && state.pending.is_none()
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn stats(&self) -> VideoStats {
        self.shared.state.lock().stats
    }

    /// Stop and join the decode thread
    ///
    /// A thread blocked waiting for packets only returns once the demuxer is
    /// aborted, see [`Player::abort_reads`].
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.can_push.notify_all();
        self.shared.player.wake();

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Video decode thread panicked");
            }
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(shared: Arc<VideoShared>) {
    debug!("Video decode thread started");

    while shared.is_running() {
        {
            let mut state = shared.state.lock();
            while (state.queue.is_full() || state.pool.free_count() == 0) && shared.is_running() {
                shared.can_push.wait_for(&mut state, IDLE_WAIT);
            }
        }
        if !shared.is_running() {
            break;
        }

        if !shared.player.state().is_playing() {
            shared.player.wait_until_playing(IDLE_WAIT);
            continue;
        }

        let Some(decoded) = shared.player.decode_frame() else {
            shared.player.park(IDLE_WAIT);
            continue;
        };

        let mut state = shared.state.lock();
        if decoded.generation != state.generation {
            state.stats.frames_discarded += 1;
            continue;
        }

        let pts = shared.offset.rebase(decoded.pts);
        let picture = &decoded.unit;
        let Some(slot) = state.pool.fill(pts, picture.width, picture.height, picture.layout, &picture.data) else {
            state.stats.frames_discarded += 1;
            continue;
        };

        match state.queue.push(slot) {
            Ok(()) => {
                state.stats.frames_queued += 1;
                state.stats.max_depth = state.stats.max_depth.max(state.queue.len());
            }
            Err(slot) => {
                state.pool.release(slot);
                state.stats.frames_discarded += 1;
            }
        }
    }

    debug!("Video decode thread exiting");
}
