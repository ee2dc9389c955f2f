//! Video path for ccsync
//!
//! A decode thread fills pre-allocated frame slots and queues them; the
//! presenter pulls frames with [`VideoPipeline::get_frame_for_render`], which
//! releases each one only when the master clock (or the wall-clock fallback)
//! reaches its presentation time.

mod clock;
mod frame_queue;
mod pipeline;

pub use clock::FallbackClock;
pub use frame_queue::{
    FramePool, SlotId, VideoFrame, VideoFrameQueue, VideoStats, MAX_FRAME_QUEUE_CAPACITY,
    MIN_FRAME_QUEUE_CAPACITY,
};
pub use pipeline::{RenderFrame, VideoPipeline};
