//! Decoded frame storage
//!
//! Picture buffers are allocated once per stream at its resolution and live
//! in a [`FramePool`] addressed by [`SlotId`]. The [`VideoFrameQueue`] only
//! moves slot ids, so pushing, promoting and presenting a frame never
//! allocates or copies picture data beyond the single copy out of the codec.

use crate::decoder::{PixelLayout, PlaneGeometry};
use std::collections::VecDeque;

/// Smallest and largest supported frame queue capacity
pub const MIN_FRAME_QUEUE_CAPACITY: usize = 4;
pub const MAX_FRAME_QUEUE_CAPACITY: usize = 8;

/// Index of a buffer in the pool
pub type SlotId = usize;

/// One pre-allocated picture buffer
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Rebased presentation time in seconds
    pub pts: f64,

    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,

    /// Tightly packed planes
    pub data: Vec<u8>,
}

impl VideoFrame {
    fn blank(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            pts: 0.0,
            width,
            height,
            layout,
            data: vec![0; layout.buffer_size(width, height)],
        }
    }

    /// Plane slices with their row strides
    pub fn planes(&self) -> Vec<(&[u8], usize)> {
        self.layout
            .planes(self.width, self.height)
            .into_iter()
            .map(|PlaneGeometry { offset, stride, rows }| {
                let end = (offset + stride * rows).min(self.data.len());
                (&self.data[offset.min(end)..end], stride)
            })
            .collect()
    }

    /// Row stride of the first plane
    pub fn stride(&self) -> usize {
        self.layout
            .planes(self.width, self.height)
            .first()
            .map(|plane| plane.stride)
            .unwrap_or(0)
    }
}

/// Owned buffer pool indexed by slot id
///
/// A slot is in exactly one of three places: the free list, the pool (filled
/// and referenced by the queue or the pending slot), or lent out to a
/// presenter, in which case its buffer is outside the pool until returned.
#[derive(Debug)]
pub struct FramePool {
    slots: Vec<Option<VideoFrame>>,
    free: Vec<SlotId>,
}

impl FramePool {
    /// Allocate `count` buffers of the given picture size
    pub fn new(count: usize, width: u32, height: u32, layout: PixelLayout) -> Self {
        let count = count.max(1);
        Self {
            slots: (0..count).map(|_| Some(VideoFrame::blank(width, height, layout))).collect(),
            free: (0..count).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Take a free slot and fill it with a picture
    ///
    /// Returns `None` when every slot is in use.
    pub fn fill(&mut self, pts: f64, width: u32, height: u32, layout: PixelLayout, data: &[u8]) -> Option<SlotId> {
        let slot = self.free.pop()?;
        let Some(frame) = self.slots[slot].as_mut() else {
            return None;
        };

        frame.pts = pts;
        frame.width = width;
        frame.height = height;
        frame.layout = layout;
        if frame.data.len() != data.len() {
            frame.data.resize(data.len(), 0);
        }
        frame.data.copy_from_slice(data);
        Some(slot)
    }

    pub fn frame(&self, slot: SlotId) -> Option<&VideoFrame> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Return a filled slot to the free list
    pub fn release(&mut self, slot: SlotId) {
        if slot < self.slots.len() && self.slots[slot].is_some() && !self.free.contains(&slot) {
            self.free.push(slot);
        }
    }

    /// Move a slot's buffer out of the pool
    pub fn lend(&mut self, slot: SlotId) -> Option<VideoFrame> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Put a lent buffer back and free its slot
    pub fn restore(&mut self, slot: SlotId, frame: VideoFrame) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(frame);
            self.free.push(slot);
        }
    }
}

/// Counters for the video path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct VideoStats {
    /// Frames pushed into the queue
    pub frames_queued: u64,

    /// Frames handed to the presenter
    pub frames_presented: u64,

    /// Frames thrown away by a reset (seek or stop)
    pub frames_discarded: u64,

    /// Deepest queue seen
    pub max_depth: usize,
}

/// Bounded FIFO of filled slots
#[derive(Debug)]
pub struct VideoFrameQueue {
    slots: VecDeque<SlotId>,
    capacity: usize,
}

impl VideoFrameQueue {
    /// Create a queue; capacity is clamped to 4..=8
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_FRAME_QUEUE_CAPACITY, MAX_FRAME_QUEUE_CAPACITY);
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, slot: SlotId) -> Result<(), SlotId> {
        if self.is_full() {
            return Err(slot);
        }
        self.slots.push_back(slot);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<SlotId> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every queued slot, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_capacity_is_clamped() {
        assert_eq!(VideoFrameQueue::new(1).capacity(), 4);
        assert_eq!(VideoFrameQueue::new(6).capacity(), 6);
        assert_eq!(VideoFrameQueue::new(64).capacity(), 8);
    }

    #[test]
    fn test_queue_fifo_and_bound() {
        let mut queue = VideoFrameQueue::new(4);
        for slot in 0..4 {
            queue.push(slot).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.push(9), Err(9));

        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pool_fill_lend_restore() {
        let mut pool = FramePool::new(2, 4, 2, PixelLayout::Rgba);
        let data = vec![7u8; 32];

        let a = pool.fill(1.0, 4, 2, PixelLayout::Rgba, &data).unwrap();
        let b = pool.fill(2.0, 4, 2, PixelLayout::Rgba, &data).unwrap();
        assert_ne!(a, b);
        assert!(pool.fill(3.0, 4, 2, PixelLayout::Rgba, &data).is_none());

        let frame = pool.lend(a).unwrap();
        assert_eq!(frame.pts, 1.0);
        assert_eq!(frame.data, data);
        assert!(pool.frame(a).is_none());

        pool.restore(a, frame);
        assert_eq!(pool.free_count(), 1);

        pool.release(b);
        pool.release(b);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_frame_planes() {
        let mut pool = FramePool::new(1, 4, 4, PixelLayout::Yuv420p);
        let data: Vec<u8> = (0..24).collect();
        let slot = pool.fill(0.0, 4, 4, PixelLayout::Yuv420p, &data).unwrap();

        let frame = pool.frame(slot).unwrap();
        let planes = frame.planes();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].0.len(), 16);
        assert_eq!(planes[1], (&data[16..20], 2));
        assert_eq!(planes[2], (&data[20..24], 2));
        assert_eq!(frame.stride(), 4);
    }
}
