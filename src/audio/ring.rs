//! Byte ring between the audio decode thread and the device
//!
//! The ring holds interleaved `f32` output audio as raw bytes. Its fill level
//! plus the bytes the device has asked for but not played yet drive a
//! two-watermark throttle: decoding stops at the target watermark and only
//! resumes once the level has fallen to the resume watermark.

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

/// Smallest ring, in bytes
pub const MIN_RING_BYTES: usize = 32768;

/// Device pulls the target watermark must leave room for
const MIN_TARGET_CHUNKS: usize = 4;

/// Throttle thresholds in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingWatermarks {
    pub size: usize,
    pub target: usize,
    pub resume: usize,
}

impl RingWatermarks {
    /// Derive the thresholds for a ring of `size` bytes
    ///
    /// # Arguments
    ///
    /// * `size` - Ring capacity in bytes
    /// * `chunk_bytes` - Typical device pull size in bytes
    /// * `target_ratio` - Target as a fraction of `size`
    /// * `resume_ratio` - Resume as a fraction of the target
    pub fn new(size: usize, chunk_bytes: usize, target_ratio: f64, resume_ratio: f64) -> Self {
        let target = ((size as f64 * target_ratio) as usize)
            .max(MIN_TARGET_CHUNKS * chunk_bytes)
            .min(size);
        let resume = (target as f64 * resume_ratio) as usize;

        Self { size, target, resume: resume.min(target) }
    }
}

/// Hysteresis between the two watermarks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    engaged: bool,
}

impl Throttle {
    /// Feed the current level; returns whether the writer must wait
    pub fn update(&mut self, level: usize, marks: &RingWatermarks) -> bool {
        if self.engaged {
            if level <= marks.resume {
                self.engaged = false;
            }
        } else if level >= marks.target {
            self.engaged = true;
        }
        self.engaged
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn reset(&mut self) {
        self.engaged = false;
    }
}

/// Fixed-size byte FIFO
pub struct ByteRing {
    rb: HeapRb<u8>,
}

impl ByteRing {
    /// Allocate a ring of at least [`MIN_RING_BYTES`], rounded down to whole `align`-byte frames
    pub fn new(size: usize, align: usize) -> Self {
        let align = align.max(1);
        let size = size.max(MIN_RING_BYTES) / align * align;
        Self { rb: HeapRb::new(size.max(align)) }
    }

    pub fn size(&self) -> usize {
        self.rb.capacity().get()
    }

    pub fn used(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn free(&self) -> usize {
        self.rb.vacant_len()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    /// Copy as much of `data` as fits; returns the bytes written
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.rb.push_slice(data)
    }

    /// Copy out up to `out.len()` bytes; returns the bytes read
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.rb.pop_slice(out)
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }
}

impl std::fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRing")
            .field("size", &self.size())
            .field("used", &self.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_watermarks_for_one_second_stereo() {
        let marks = RingWatermarks::new(384_000, 4096, 0.75, 0.5);
        assert_eq!(marks.target, 288_000);
        assert_eq!(marks.resume, 144_000);
    }

    #[test]
    fn test_watermarks_floor_and_cap() {
        // a quarter of the ring is below four callback chunks
        let marks = RingWatermarks::new(32768, 4096, 0.25, 0.5);
        assert_eq!(marks.target, 16384);

        // four chunks exceed the ring itself
        let marks = RingWatermarks::new(32768, 16384, 0.75, 0.5);
        assert_eq!(marks.target, 32768);
        assert_eq!(marks.resume, 16384);
    }

    #[test]
    fn test_throttle_hysteresis() {
        let marks = RingWatermarks { size: 100, target: 75, resume: 37 };
        let mut throttle = Throttle::default();

        assert!(!throttle.update(74, &marks));
        assert!(throttle.update(75, &marks));
        assert!(throttle.update(50, &marks));
        assert!(throttle.update(38, &marks));
        assert!(!throttle.update(37, &marks));
        assert!(!throttle.update(60, &marks));
    }

    #[test]
    fn test_ring_size_is_frame_aligned() {
        let ring = ByteRing::new(1000, 8);
        assert_eq!(ring.size(), MIN_RING_BYTES);

        let ring = ByteRing::new(40_001, 12);
        assert_eq!(ring.size() % 12, 0);
        assert!(ring.size() <= 40_001);
    }

    #[test]
    fn test_ring_write_read() {
        let mut ring = ByteRing::new(MIN_RING_BYTES, 1);
        let data: Vec<u8> = (0..=255).collect();

        assert_eq!(ring.write(&data), 256);
        assert_eq!(ring.used(), 256);

        let mut out = [0u8; 100];
        assert_eq!(ring.read(&mut out), 100);
        assert_eq!(&out[..], &data[..100]);

        ring.clear();
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.free(), ring.size());
    }

    #[test]
    fn test_write_stops_when_full() {
        let mut ring = ByteRing::new(MIN_RING_BYTES, 1);
        let data = vec![1u8; MIN_RING_BYTES + 10];
        assert_eq!(ring.write(&data), MIN_RING_BYTES);
        assert!(ring.is_full());
        assert_eq!(ring.write(&data), 0);
    }

    proptest! {
        #[test]
        fn prop_used_never_exceeds_size(ops in prop::collection::vec((any::<bool>(), 0usize..20_000), 1..50)) {
            let mut ring = ByteRing::new(MIN_RING_BYTES, 8);
            let mut expected = 0usize;
            let buffer = vec![0u8; 20_000];
            let mut out = vec![0u8; 20_000];

            for (is_write, len) in ops {
                if is_write {
                    expected += ring.write(&buffer[..len]);
                } else {
                    expected -= ring.read(&mut out[..len]);
                }
                prop_assert!(ring.used() <= ring.size());
                prop_assert_eq!(ring.used(), expected);
            }
        }

        #[test]
        fn prop_watermarks_are_ordered(size in MIN_RING_BYTES..2_000_000usize, chunk in 256usize..16_384) {
            let marks = RingWatermarks::new(size, chunk, 0.75, 0.5);
            prop_assert!(marks.resume <= marks.target);
            prop_assert!(marks.target <= marks.size);
        }
    }
}
