//! Audio path for ccsync
//!
//! The decode thread writes interleaved `f32` audio into a byte ring,
//! throttled by two watermarks. A sink (the cpal device, or a real-time
//! ticker for headless runs) drains the ring through [`DevicePull`]. The
//! amount decoded but not yet heard gives the master clock every other
//! stream is timed against.

mod cpal_output;
mod output;
mod ring;
mod sink;
mod volume;

pub use cpal_output::CpalSink;
pub use output::{AudioClock, AudioOutput, AudioStats, DevicePull};
pub use ring::{ByteRing, RingWatermarks, Throttle, MIN_RING_BYTES};
pub use sink::{open_sink, AudioSink, ClockedSink, CLOCKED_PERIOD};
pub use volume::{RampType, VolumeRamp, DEFAULT_RAMP_FRAMES};
