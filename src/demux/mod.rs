//! Packet source for ccsync
//!
//! A dedicated read thread pulls compressed packets out of the container and
//! deposits them into one bounded queue per elementary stream. Decoders pop
//! from those queues; a full queue blocks the read thread, an empty one blocks
//! the decoder until a packet, end of stream or a stop request arrives.

mod ffmpeg_reader;
mod packet_queue;

pub use ffmpeg_reader::FfmpegReader;
pub use packet_queue::{PacketQueue, DEFAULT_PACKET_QUEUE_CAPACITY};

use crate::utils::error::{PlaybackError, Result};
use ffmpeg_next as ffmpeg;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Elementary stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Compressed payload of a packet
pub enum PacketPayload {
    /// Packet read by FFmpeg, moved through the queue without copying
    Codec(ffmpeg::Packet),

    /// Raw bytes from a non-FFmpeg container
    Bytes(Vec<u8>),
}

impl std::fmt::Debug for PacketPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketPayload::Codec(packet) => write!(f, "Codec({} bytes)", packet.size()),
            PacketPayload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// One compressed packet routed to a stream
#[derive(Debug)]
pub struct Packet {
    /// Destination stream
    pub kind: StreamKind,

    /// Presentation time in seconds, when the container knows it
    pub pts: Option<f64>,

    /// Duration in seconds (0 when unknown)
    pub duration: f64,

    /// Starts a keyframe
    pub key: bool,

    /// Compressed data
    pub payload: PacketPayload,
}

/// What one container read produced
#[derive(Debug)]
pub enum ReadOutcome {
    /// Packet for one of the selected streams
    Packet(Packet),

    /// Packet for a stream nobody decodes
    Skipped,

    /// Container exhausted
    End,
}

/// Result of popping from a packet queue
#[derive(Debug)]
pub enum PopResult {
    /// Next packet in stream order
    Packet(Packet),

    /// The stream has no more packets until the next seek
    Eof,

    /// A stop was requested (seek or teardown in progress)
    Aborted,
}

/// Source of compressed packets
///
/// Implemented by the FFmpeg container reader and by the synthetic source.
/// The reader is moved onto the read thread while it runs and handed back
/// when the thread is joined, so implementations only need `Send`.
pub trait ContainerReader: Send {
    /// Read the next packet
    ///
    /// # Returns
    ///
    /// A routed packet, a skipped packet, end of container, or an error that
    /// the read loop treats as end of container
    fn read_packet(&mut self) -> Result<ReadOutcome>;

    /// Reposition to the last keyframe at or before `seconds`
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// Whether the container has a selected audio stream
    fn has_audio(&self) -> bool;
}

/// Packet counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub skipped_packets: u64,
}

/// State guarded by the demuxer lock
struct QueueState {
    video: PacketQueue<Packet>,
    audio: PacketQueue<Packet>,
    eof: bool,
    stop_requested: bool,
    thread_running: bool,
    stats: DemuxStats,
}

impl QueueState {
    fn queue_mut(&mut self, kind: StreamKind) -> &mut PacketQueue<Packet> {
        match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
        }
    }
}

struct DemuxShared {
    state: Mutex<QueueState>,
    can_read_video: Condvar,
    can_read_audio: Condvar,
    can_write: Condvar,
}

impl DemuxShared {
    fn can_read(&self, kind: StreamKind) -> &Condvar {
        match kind {
            StreamKind::Video => &self.can_read_video,
            StreamKind::Audio => &self.can_read_audio,
        }
    }

    fn wake_all(&self) {
        self.can_read_video.notify_all();
        self.can_read_audio.notify_all();
        self.can_write.notify_all();
    }

    /// Queue a packet, blocking while its queue is full. Returns false when stopped.
    fn push_blocking(&self, packet: Packet) -> bool {
        let kind = packet.kind;
        let mut state = self.state.lock();

        while state.queue_mut(kind).is_full() && !state.stop_requested {
            self.can_write.wait(&mut state);
        }
        if state.stop_requested {
            return false;
        }

        if state.queue_mut(kind).push(packet).is_err() {
            // unreachable while the wait above holds the lock
            return false;
        }
        match kind {
            StreamKind::Video => state.stats.video_packets += 1,
            StreamKind::Audio => state.stats.audio_packets += 1,
        }
        drop(state);

        self.can_read(kind).notify_one();
        true
    }
}

/// Thread handle plus the reader while the thread is parked
struct ReaderControl {
    reader: Option<Box<dyn ContainerReader>>,
    thread: Option<JoinHandle<Box<dyn ContainerReader>>>,
}

/// Container demuxer with a dedicated read thread
pub struct Demuxer {
    shared: Arc<DemuxShared>,
    control: Mutex<ReaderControl>,
    has_audio: bool,
}

impl Demuxer {
    /// Wrap an opened container reader; the read thread is not started yet
    pub fn open(reader: Box<dyn ContainerReader>, queue_capacity: usize) -> Self {
        let has_audio = reader.has_audio();

        Self {
            shared: Arc::new(DemuxShared {
                state: Mutex::new(QueueState {
                    video: PacketQueue::new(queue_capacity),
                    audio: PacketQueue::new(queue_capacity),
                    eof: false,
                    stop_requested: false,
                    thread_running: false,
                    stats: DemuxStats::default(),
                }),
                can_read_video: Condvar::new(),
                can_read_audio: Condvar::new(),
                can_write: Condvar::new(),
            }),
            control: Mutex::new(ReaderControl {
                reader: Some(reader),
                thread: None,
            }),
            has_audio,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Start the read thread if it is not running
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock();
        Self::start_locked(&self.shared, &mut control)
    }

    fn start_locked(shared: &Arc<DemuxShared>, control: &mut ReaderControl) -> Result<()> {
        if control.thread.is_some() {
            return Ok(());
        }

        let reader = control.reader.take()
            .ok_or_else(|| crate::internal_error!("demuxer has no reader"))?;

        {
            let mut state = shared.state.lock();
            state.stop_requested = false;
            state.eof = false;
            state.thread_running = true;
        }

        let thread_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || read_loop(reader, thread_shared))
            .map_err(|e| {
                shared.state.lock().thread_running = false;
                PlaybackError::Allocation(format!("Failed to spawn demux thread: {}", e))
            })?;

        control.thread = Some(handle);
        debug!("Demux thread started");
        Ok(())
    }

    /// Stop the read thread and wait for it to exit
    pub fn stop(&self) {
        let mut control = self.control.lock();
        Self::stop_locked(&self.shared, &mut control);
    }

    fn stop_locked(shared: &DemuxShared, control: &mut ReaderControl) {
        {
            let mut state = shared.state.lock();
            state.stop_requested = true;
        }
        shared.wake_all();

        if let Some(handle) = control.thread.take() {
            match handle.join() {
                Ok(reader) => control.reader = Some(reader),
                Err(_) => warn!("Demux thread panicked; container is no longer readable"),
            }
        }
    }

    /// Request a stop without joining, so blocked pops return `Aborted`
    pub fn abort(&self) {
        self.shared.state.lock().stop_requested = true;
        self.shared.wake_all();
    }

    /// Reposition the container and restart reading from `seconds`
    ///
    /// On failure the queued packets are kept, reading resumes where it was
    /// and `PlaybackError::Seek` is returned.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let target = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let mut control = self.control.lock();

        Self::stop_locked(&self.shared, &mut control);

        let result = match control.reader.as_mut() {
            Some(reader) => reader.seek(target),
            None => Err(PlaybackError::Seek("container is not readable".to_string())),
        };

        if result.is_ok() {
            let mut state = self.shared.state.lock();
            state.video.clear();
            state.audio.clear();
        }

        Self::start_locked(&self.shared, &mut control)?;

        match result {
            Ok(()) => {
                info!("Demuxer repositioned to {:.3}s", target);
                Ok(())
            }
            Err(e) => {
                warn!("Demuxer seek to {:.3}s failed: {}", target, e);
                Err(match e {
                    PlaybackError::Seek(_) => e,
                    other => PlaybackError::Seek(other.to_string()),
                })
            }
        }
    }

    /// Pop the next packet for a stream, blocking until one is available
    pub fn pop_packet(&self, kind: StreamKind) -> PopResult {
        if kind == StreamKind::Audio && !self.has_audio {
            return PopResult::Eof;
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(packet) = state.queue_mut(kind).pop() {
                drop(state);
                self.shared.can_write.notify_one();
                return PopResult::Packet(packet);
            }
            if state.stop_requested {
                return PopResult::Aborted;
            }
            if state.eof {
                return PopResult::Eof;
            }
            if !state.thread_running {
                return PopResult::Aborted;
            }
            self.shared.can_read(kind).wait(&mut state);
        }
    }

    /// Whether the read thread has reached the end of the container
    pub fn is_eof(&self) -> bool {
        self.shared.state.lock().eof
    }

    /// Queued packet counts as (video, audio)
    pub fn queue_depths(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.video.len(), state.audio.len())
    }

    pub fn stats(&self) -> DemuxStats {
        self.shared.state.lock().stats
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(mut reader: Box<dyn ContainerReader>, shared: Arc<DemuxShared>) -> Box<dyn ContainerReader> {
    loop {
        if shared.state.lock().stop_requested {
            break;
        }

        match reader.read_packet() {
            Ok(ReadOutcome::Packet(packet)) => {
                if !shared.push_blocking(packet) {
                    break;
                }
            }
            Ok(ReadOutcome::Skipped) => {
                shared.state.lock().stats.skipped_packets += 1;
            }
            Ok(ReadOutcome::End) => {
                debug!("End of container reached");
                break;
            }
            Err(e) => {
                warn!("Container read failed, treating as end of stream: {}", e);
                break;
            }
        }
    }

    {
        let mut state = shared.state.lock();
        state.eof = true;
        state.thread_running = false;
    }
    shared.wake_all();

    reader
}
