//! Stream decoders for ccsync
//!
//! A [`StreamDecoder`] drives one codec through the receive/submit loop,
//! pulling packets from the demuxer on demand, and keeps the stream's
//! presentation time and lifecycle. The codec itself sits behind the
//! [`UnitCodec`] trait so FFmpeg and the synthetic source are interchangeable.

mod ffmpeg_decoder;
mod stream_info;

pub use ffmpeg_decoder::{FfmpegAudioCodec, FfmpegVideoCodec};
pub use stream_info::{AudioStreamInfo, MediaInfo, VideoStreamInfo};

use crate::demux::{Demuxer, Packet, PopResult, StreamKind};
use crate::utils::error::Result;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

/// Fallback video frame rate when the stream does not declare one
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Fallback audio sample rate when the stream does not declare one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Per-stream lifecycle
///
/// `Draining` means end-of-input was submitted to the codec and only
/// buffered output remains; `Ended` is terminal until the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamLifecycle {
    Idle,
    Draining,
    Ended,
}

/// Events that move a stream through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The packet source reported end of stream and end-of-input was submitted
    EndOfInput,

    /// The codec reported that it has no more output
    Finished,

    /// The codec failed unrecoverably
    Failed,

    /// Buffered codec state was discarded (after a seek)
    Flush,
}

impl StreamLifecycle {
    /// Transition table; `None` marks an illegal move
    pub fn next(self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent::*;
        use StreamLifecycle::*;

        match (self, event) {
            (_, Flush) => Some(Idle),
            (Idle, EndOfInput) => Some(Draining),
            (Idle, Finished) | (Idle, Failed) => Some(Ended),
            (Draining, Finished) | (Draining, Failed) => Some(Ended),
            (Draining, EndOfInput) => None,
            (Ended, _) => None,
        }
    }
}

/// Output layout of decoded pictures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// One interleaved 8-bit RGBA plane
    Rgba,

    /// Three 8-bit planes, chroma subsampled 2x2
    Yuv420p,
}

/// Position of one plane inside a packed picture buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub offset: usize,
    pub stride: usize,
    pub rows: usize,
}

impl PixelLayout {
    /// Plane geometry for a tightly packed picture of the given size
    pub fn planes(self, width: u32, height: u32) -> Vec<PlaneGeometry> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelLayout::Rgba => vec![PlaneGeometry { offset: 0, stride: w * 4, rows: h }],
            PixelLayout::Yuv420p => {
                let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
                let luma = w * h;
                let chroma = cw * ch;
                vec![
                    PlaneGeometry { offset: 0, stride: w, rows: h },
                    PlaneGeometry { offset: luma, stride: cw, rows: ch },
                    PlaneGeometry { offset: luma + chroma, stride: cw, rows: ch },
                ]
            }
        }
    }

    /// Total packed size in bytes
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        self.planes(width, height)
            .iter()
            .map(|p| p.stride * p.rows)
            .sum()
    }
}

/// Decoded picture as produced by a video codec
#[derive(Debug, Clone)]
pub struct Picture {
    /// Timestamp carried by the frame, in seconds
    pub timestamp: Option<f64>,

    /// Nominal frame duration in seconds
    pub duration: f64,

    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,

    /// Tightly packed planes, see [`PixelLayout::planes`]
    pub data: Vec<u8>,
}

/// Decoded audio as produced by an audio codec: interleaved native-endian f32
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Timestamp carried by the frame, in seconds
    pub timestamp: Option<f64>,

    /// Sample frames (one sample per channel)
    pub frames: usize,

    /// Output sample rate
    pub sample_rate: u32,

    /// Sample bytes
    pub data: Vec<u8>,
}

/// Fixed output format of the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }
}

/// Common timing accessors of decoded units
pub trait TimedUnit {
    /// Timestamp reported by the codec, if any
    fn timestamp(&self) -> Option<f64>;

    /// Duration used to extrapolate the next timestamp
    fn duration(&self) -> f64;
}

impl TimedUnit for Picture {
    fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

impl TimedUnit for AudioChunk {
    fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f64 / self.sample_rate as f64
        }
    }
}

/// What a codec returned from one receive call
#[derive(Debug)]
pub enum CodecStatus<U> {
    /// A decoded unit
    Unit(U),

    /// The codec needs another packet (or end-of-input) before it can produce output
    NeedsInput,

    /// The codec has been fully drained
    Finished,
}

/// Decode-one-unit contract of the external codec library
pub trait UnitCodec: Send {
    type Unit: TimedUnit;

    /// Try to take one decoded unit out of the codec
    ///
    /// # Returns
    ///
    /// A unit, a request for more input, or completion. An `Err` means the
    /// codec failed unrecoverably.
    fn receive(&mut self) -> Result<CodecStatus<Self::Unit>>;

    /// Submit one compressed packet
    fn submit(&mut self, packet: Packet) -> Result<()>;

    /// Signal that no more packets will follow
    fn submit_end(&mut self) -> Result<()>;

    /// Discard buffered codec state
    fn flush(&mut self);
}

pub type VideoCodec = dyn UnitCodec<Unit = Picture>;
pub type AudioCodec = dyn UnitCodec<Unit = AudioChunk>;

/// Where stream decoders get their packets from
pub trait PacketSource {
    fn pop_packet(&self, kind: StreamKind) -> PopResult;
}

impl PacketSource for Demuxer {
    fn pop_packet(&self, kind: StreamKind) -> PopResult {
        Demuxer::pop_packet(self, kind)
    }
}

/// A unit with the presentation time the decoder assigned to it
#[derive(Debug, Clone)]
pub struct Decoded<U> {
    /// Stream presentation time in seconds
    pub pts: f64,

    /// Duration in seconds
    pub duration: f64,

    /// Seek generation the unit was decoded under
    pub generation: u64,

    pub unit: U,
}

/// Decode counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub units_decoded: u64,
    pub units_skipped: u64,
    pub packets_submitted: u64,
}

/// Codec plus per-stream timing and lifecycle
pub struct StreamDecoder<U> {
    codec: Box<dyn UnitCodec<Unit = U>>,
    kind: StreamKind,
    lifecycle: StreamLifecycle,
    pts: f64,
    next_pts: Option<f64>,
    seek_floor: Option<f64>,
    stats: DecoderStats,
}

impl<U: TimedUnit> StreamDecoder<U> {
    pub fn new(codec: Box<dyn UnitCodec<Unit = U>>, kind: StreamKind) -> Self {
        Self {
            codec,
            kind,
            lifecycle: StreamLifecycle::Idle,
            pts: 0.0,
            next_pts: None,
            seek_floor: None,
            stats: DecoderStats::default(),
        }
    }

    /// Decode the next unit, pulling packets from `source` as needed
    ///
    /// Returns `None` when the stream has ended (see [`Self::lifecycle`]) or
    /// when the packet source was aborted by a stop request.
    pub fn decode_next(&mut self, source: &dyn PacketSource) -> Option<Decoded<U>> {
        if self.lifecycle == StreamLifecycle::Ended {
            return None;
        }

        loop {
            match self.codec.receive() {
                Ok(CodecStatus::Unit(unit)) => {
                    let pts = unit.timestamp()
                        .or(self.next_pts)
                        .unwrap_or(self.pts);
                    let duration = unit.duration();
                    self.pts = pts;
                    self.next_pts = Some(pts + duration);

                    if let Some(floor) = self.seek_floor {
                        if pts < floor && pts + duration <= floor {
                            self.stats.units_skipped += 1;
                            trace!("{:?} unit at {:.3}s precedes seek target {:.3}s", self.kind, pts, floor);
                            continue;
                        }
                        self.seek_floor = None;
                    }

                    self.stats.units_decoded += 1;
                    return Some(Decoded { pts, duration, generation: 0, unit });
                }
                Ok(CodecStatus::NeedsInput) => {
                    if self.lifecycle == StreamLifecycle::Draining {
                        self.apply(LifecycleEvent::Finished);
                        return None;
                    }

                    match source.pop_packet(self.kind) {
                        PopResult::Packet(packet) => {
                            if let Err(e) = self.codec.submit(packet) {
                                warn!("{:?} decoder rejected packet, ending stream: {}", self.kind, e);
                                self.apply(LifecycleEvent::Failed);
                                return None;
                            }
                            self.stats.packets_submitted += 1;
                        }
                        PopResult::Eof => {
                            if let Err(e) = self.codec.submit_end() {
                                warn!("{:?} decoder failed to drain: {}", self.kind, e);
                                self.apply(LifecycleEvent::Failed);
                                return None;
                            }
                            self.apply(LifecycleEvent::EndOfInput);
                        }
                        PopResult::Aborted => return None,
                    }
                }
                Ok(CodecStatus::Finished) => {
                    self.apply(LifecycleEvent::Finished);
                    return None;
                }
                Err(e) => {
                    warn!("{:?} decode failure, ending stream: {}", self.kind, e);
                    self.apply(LifecycleEvent::Failed);
                    return None;
                }
            }
        }
    }

    /// Discard buffered codec state and return to `Idle`
    pub fn flush(&mut self) {
        self.codec.flush();
        self.apply(LifecycleEvent::Flush);
        self.next_pts = None;
    }

    /// Set the presentation time (after a seek)
    pub fn set_pts(&mut self, pts: f64) {
        self.pts = pts;
        self.next_pts = None;
    }

    /// Skip units that end before `floor` on the next decode
    pub fn set_seek_floor(&mut self, floor: Option<f64>) {
        self.seek_floor = floor;
    }

    pub fn pts(&self) -> f64 {
        self.pts
    }

    pub fn lifecycle(&self) -> StreamLifecycle {
        self.lifecycle
    }

    pub fn is_ended(&self) -> bool {
        self.lifecycle == StreamLifecycle::Ended
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn apply(&mut self, event: LifecycleEvent) {
        match self.lifecycle.next(event) {
            Some(next) => {
                if next != self.lifecycle {
                    debug!("{:?} stream {:?} -> {:?}", self.kind, self.lifecycle, next);
                }
                self.lifecycle = next;
            }
            None => debug!("{:?} stream ignored {:?} while {:?}", self.kind, event, self.lifecycle),
        }
    }
}
